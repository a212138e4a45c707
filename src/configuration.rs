//! Export configuration.
//!
//! [`ExportOptions`] is a builder that threads the source profile, the
//! per-frame error policy, output format, progress callbacks and
//! cancellation through [`Exporter`](crate::Exporter) without polluting
//! every function signature.
//!
//! [`ExportOptions`] has no `Default`: callers must state whether a failing
//! frame aborts the whole dataset.
//!
//! # Example
//!
//! ```no_run
//! use czm_export::{CancellationToken, ErrorPolicy, ExportOptions, OutputFormat};
//!
//! let token = CancellationToken::new();
//! let options = ExportOptions::new(ErrorPolicy::Continue)
//!     .with_output_format(OutputFormat::Tiff)
//!     .with_cancellation(token.clone());
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use image::ImageFormat;

use crate::container::{SourceProfile, StudyIdentifiers};
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// What to do when one frame of a multi-frame dataset fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop at the first failing frame and return its error.
    Abort,
    /// Record the failure in the [`ExportReport`](crate::ExportReport) and
    /// carry on with the next frame.
    Continue,
}

/// Raster format of the exported images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Portable Network Graphics. This is the default.
    #[default]
    Png,
    /// Tagged Image File Format.
    Tiff,
    /// Windows bitmap (8-bit rasters only).
    Bmp,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Bmp => "bmp",
        }
    }

    /// Map to the corresponding `image` crate format.
    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::Bmp => ImageFormat::Bmp,
        }
    }

    /// Parse a user-supplied extension such as `png` or `.TIF`.
    pub fn from_extension(value: &str) -> Option<Self> {
        match value.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }
}

/// Configuration for one or more exports.
#[derive(Clone)]
pub struct ExportOptions {
    pub(crate) policy: ErrorPolicy,
    pub(crate) profile: SourceProfile,
    pub(crate) output_format: OutputFormat,
    pub(crate) fallbacks: StudyIdentifiers,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
    pub(crate) parallel: bool,
    pub(crate) overwrite: bool,
}

impl Debug for ExportOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExportOptions")
            .field("policy", &self.policy)
            .field("profile", &self.profile)
            .field("output_format", &self.output_format)
            .field("fallbacks", &self.fallbacks)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("parallel", &self.parallel)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

impl ExportOptions {
    /// Create options with the given per-frame error policy.
    ///
    /// Everything else starts at its default: the Zeiss profile, PNG output,
    /// no progress callback, no cancellation, batch size 1, sequential
    /// processing, existing images overwritten.
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            profile: SourceProfile::carl_zeiss_meditec(),
            output_format: OutputFormat::default(),
            fallbacks: StudyIdentifiers::default(),
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
            parallel: false,
            overwrite: true,
        }
    }

    /// The per-frame error policy.
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// The source profile checked before any frame work.
    pub fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    /// The raster format of exported images.
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Replace the vendor / transfer syntax expectations.
    #[must_use]
    pub fn with_profile(mut self, profile: SourceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the output raster format.
    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Identifiers used when the dataset lacks its own, before falling
    /// back to [`UNKNOWN`](crate::UNKNOWN).
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: StudyIdentifiers) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, the export stops before the next frame
    /// and returns [`CzmError::Cancelled`](crate::CzmError::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Process the frames of a multi-frame dataset on rayon worker threads.
    ///
    /// Has no effect unless the crate is built with the `rayon` feature.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Whether existing images may be replaced. When `false`, a frame whose
    /// image already exists fails with an I/O error.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
