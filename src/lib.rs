//! # czm-export
//!
//! Recover viewable images from Carl Zeiss Meditec DICOM files.
//!
//! Zeiss instruments store each frame as a JPEG 2000 file that has been
//! scrambled: every seventh byte is XOR-ed and the file is cut into blocks
//! written out of order. `czm-export` undoes the scrambling, decodes the
//! recovered codestream through FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate, and writes
//! standard PNG, TIFF or BMP images.
//!
//! ## Quick Start
//!
//! ### Export a File
//!
//! ```no_run
//! use czm_export::{ErrorPolicy, ExportOptions, export_file};
//!
//! let report = export_file("scan.dcm", "out", ExportOptions::new(ErrorPolicy::Continue)).unwrap();
//! println!("{} image(s), {} failure(s)", report.written.len(), report.failures.len());
//! ```
//!
//! ### Descramble One Frame
//!
//! ```no_run
//! use czm_export::descramble;
//!
//! let scrambled = std::fs::read("frame.bin").unwrap();
//! let codestream = descramble(&scrambled).unwrap();
//! std::fs::write("frame.jp2", codestream).unwrap();
//! ```
//!
//! ### Inspect Before Exporting
//!
//! ```no_run
//! use czm_export::{DicomContainer, SourceProfile, validate_source};
//!
//! let container = DicomContainer::open("scan.dcm").unwrap();
//! print!("{}", validate_source(&container, &SourceProfile::default()));
//! ```
//!
//! ## Output Layout
//!
//! Images are written under `<root>/<patient>/<date>/<laterality>/`:
//! multi-frame datasets as `<study>/000.png`, `<study>/001.png`, …,
//! single-frame datasets as `<study>.png`. Missing identifiers become
//! `UNKNOWN`.
//!
//! ## Features
//!
//! - **Descrambling**: XOR removal, header location and block reassembly
//! - **Frame splitting**: Basic Offset Table, one fragment per frame, or
//!   end-of-codestream grouping
//! - **Pluggable codec and container**: [`ImageCodec`] and
//!   [`ContainerSource`] traits with FFmpeg and `dicom-object` defaults
//! - **Error policy**: abort on the first bad frame, or skip and report
//! - **Progress & cancellation**: callbacks and [`CancellationToken`]
//! - **Validation**: check a file before exporting it
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `rayon` | `ExportOptions::with_parallel` spreads frames across rayon threads |
//!
//! ## Requirements
//!
//! FFmpeg development libraries, built with the JPEG 2000 decoder, must be
//! installed on your system.

pub mod codec;
pub mod configuration;
pub mod container;
pub mod descramble;
pub mod dicom;
pub mod error;
pub mod frames;
pub mod layout;
pub mod metadata;
#[cfg(feature = "rayon")]
mod parallel;
pub mod pipeline;
pub mod progress;
pub mod validation;

pub use codec::{CodecLogLevel, FfmpegCodec, ImageCodec, set_codec_log_level};
pub use configuration::{ErrorPolicy, ExportOptions, OutputFormat};
pub use container::{
    CARL_ZEISS_MEDITEC, ContainerSource, JPEG_2000_LOSSLESS, MemoryContainer, OwnedPixelData,
    PixelData, SourceProfile, StudyIdentifiers,
};
pub use descramble::{
    BLOCK_LAYOUT, HEADER_MARKER, OffsetResolution, XOR_KEY, XOR_STRIDE, deobfuscate, descramble,
    block_ranges, descramble_with_resolution, estimate_header_offset, reassemble, resolve_offset,
};
pub use dicom::DicomContainer;
pub use error::CzmError;
pub use frames::{FrameCountField, Frames, single_frame, split_frames};
pub use layout::{FrameTarget, OutputLayout, UNKNOWN};
pub use metadata::{ContainerMetadata, PixelDataKind, PixelDataSummary};
pub use pipeline::{ExportReport, Exporter, FrameFailure, export_file};
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo};
pub use validation::{ValidationReport, validate_source};
