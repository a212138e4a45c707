//! Error types for the `czm-export` crate.
//!
//! This module defines [`CzmError`], the unified error type returned by all
//! fallible operations in the crate. Variants fall into three groups:
//!
//! - **Whole-file preconditions** ([`UnsupportedManufacturer`],
//!   [`UnsupportedTransferSyntax`], [`MissingPixelData`],
//!   [`InvalidFrameCount`], [`FrameSplit`]) abort a file before any frame is
//!   touched.
//! - **Per-frame failures** ([`NoHeaderMarker`], [`GeometryMismatch`],
//!   codec errors) are local to one frame; whether the export continues is
//!   decided by [`ErrorPolicy`](crate::ErrorPolicy).
//! - **Ambient failures** (I/O, FFmpeg, `image`, cancellation).
//!
//! [`UnsupportedManufacturer`]: CzmError::UnsupportedManufacturer
//! [`UnsupportedTransferSyntax`]: CzmError::UnsupportedTransferSyntax
//! [`MissingPixelData`]: CzmError::MissingPixelData
//! [`InvalidFrameCount`]: CzmError::InvalidFrameCount
//! [`FrameSplit`]: CzmError::FrameSplit
//! [`NoHeaderMarker`]: CzmError::NoHeaderMarker
//! [`GeometryMismatch`]: CzmError::GeometryMismatch

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `czm-export` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CzmError {
    /// The container file could not be opened or parsed.
    #[error("Failed to open container at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`DicomContainer::open`](crate::DicomContainer::open).
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The dataset was not produced by the expected vendor.
    #[error("Unsupported manufacturer {found:?} (expected a name starting with {expected:?})")]
    UnsupportedManufacturer {
        /// Manufacturer recorded in the dataset, or `"<missing>"`.
        found: String,
        /// Manufacturer prefix required by the active profile.
        expected: String,
    },

    /// The dataset is not encoded with the expected transfer syntax.
    #[error("Unsupported transfer syntax {found:?} (expected {expected:?})")]
    UnsupportedTransferSyntax {
        /// Transfer syntax UID recorded in the file meta group.
        found: String,
        /// Transfer syntax UID required by the active profile.
        expected: String,
    },

    /// The dataset carries no Pixel Data element.
    #[error("No pixel data found in the dataset")]
    MissingPixelData,

    /// The Number of Frames element could not be interpreted.
    #[error("Invalid frame count {0:?}")]
    InvalidFrameCount(String),

    /// The pixel data could not be divided into the declared number of frames.
    #[error("Failed to split pixel data into frames: {0}")]
    FrameSplit(String),

    /// No JP2 header marker exists anywhere in a frame.
    #[error("No JP2 header marker found in a scrambled frame of {length} bytes")]
    NoHeaderMarker {
        /// Length of the scrambled frame.
        length: usize,
    },

    /// The fixed block layout does not fit this frame.
    #[error("Block layout does not fit a {length}-byte frame with header at {offset}: {reason}")]
    GeometryMismatch {
        /// Length of the scrambled frame.
        length: usize,
        /// Resolved header offset.
        offset: usize,
        /// Which part of the layout failed.
        reason: String,
    },

    /// A single frame failed while the export was running with
    /// [`ErrorPolicy::Abort`](crate::ErrorPolicy::Abort).
    #[error("Frame {} failed: {source}", FrameLabel(.index))]
    Frame {
        /// Index of the failing frame, `None` for the single-frame path.
        index: Option<usize>,
        /// What went wrong.
        #[source]
        source: Box<CzmError>,
    },

    /// The recovered codestream could not be decoded.
    #[error("Failed to decode codestream: {0}")]
    Codec(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while encoding the output raster.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl CzmError {
    /// Returns `true` for the errors that reject a whole file before any
    /// frame is processed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CzmError::UnsupportedManufacturer { .. }
                | CzmError::UnsupportedTransferSyntax { .. }
                | CzmError::MissingPixelData
                | CzmError::InvalidFrameCount(_)
                | CzmError::FrameSplit(_)
        )
    }
}

impl From<FfmpegError> for CzmError {
    fn from(error: FfmpegError) -> Self {
        CzmError::FfmpegError(error.to_string())
    }
}

struct FrameLabel<'a>(&'a Option<usize>);

impl std::fmt::Display for FrameLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self.0 {
            Some(index) => write!(f, "{index:03}"),
            None => write!(f, "(single)"),
        }
    }
}
