//! The per-file export pipeline.
//!
//! [`Exporter`] ties the pieces together. For every dataset it checks the
//! [`SourceProfile`](crate::SourceProfile), works out the
//! [`OutputLayout`], then takes one of two paths:
//!
//! - **Number of Frames present**: the pixel data is split into frames and
//!   each frame goes through descramble → `NNN.jp2` → decode → transpose →
//!   `NNN.<ext>`, after which `NNN.jp2` is removed.
//! - **Number of Frames absent**: the whole pixel buffer is one frame,
//!   written as `<study>.<ext>` beside the study directory, without
//!   transposing.
//!
//! Frames never share state. A failing frame is either recorded in the
//! [`ExportReport`] or turned into [`CzmError::Frame`], as the
//! [`ErrorPolicy`] says.
//!
//! # Example
//!
//! ```no_run
//! use czm_export::{DicomContainer, ErrorPolicy, ExportOptions, Exporter, FfmpegCodec};
//!
//! let container = DicomContainer::open("scan.dcm")?;
//! let exporter = Exporter::new(FfmpegCodec::new(), ExportOptions::new(ErrorPolicy::Continue));
//! let report = exporter.export(&container, "out")?;
//! for failure in &report.failures {
//!     eprintln!("{failure}");
//! }
//! # Ok::<(), czm_export::CzmError>(())
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::{Error as IoError, ErrorKind},
    path::{Path, PathBuf},
};

use crate::{
    codec::{FfmpegCodec, ImageCodec},
    configuration::{ErrorPolicy, ExportOptions},
    container::{ContainerSource, PixelData},
    descramble::{OffsetResolution, descramble_with_resolution, log_resolution},
    dicom::DicomContainer,
    error::CzmError,
    frames::{single_frame, split_frames},
    layout::{FrameTarget, OutputLayout},
    progress::ProgressTracker,
};

/// How far each frame is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Decode and encode the final raster; the codestream is temporary.
    Images,
    /// Stop after writing the recovered codestream.
    Codestreams,
}

/// Result of one successful frame.
#[derive(Debug)]
pub(crate) struct FrameOutcome {
    pub(crate) written: PathBuf,
    pub(crate) resolution: OffsetResolution,
}

/// A frame that failed under [`ErrorPolicy::Continue`].
#[derive(Debug)]
pub struct FrameFailure {
    /// Frame index, `None` on the single-frame path.
    pub index: Option<usize>,
    /// What went wrong.
    pub error: CzmError,
}

impl Display for FrameFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.index {
            Some(index) => write!(f, "frame {index:03}: {}", self.error),
            None => write!(f, "single frame: {}", self.error),
        }
    }
}

/// Outcome of exporting one dataset.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Files written, in frame order.
    pub written: Vec<PathBuf>,
    /// Frames that failed, in frame order.
    pub failures: Vec<FrameFailure>,
    /// Declared frame count, `None` for single-frame datasets.
    pub frame_count: Option<u32>,
    /// Frames whose header was not where the length predicted.
    pub offset_disagreements: usize,
}

impl ExportReport {
    fn new(frame_count: Option<u32>) -> Self {
        Self {
            frame_count,
            ..Self::default()
        }
    }

    /// Returns `true` if every frame was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(
        &mut self,
        index: Option<usize>,
        outcome: Result<FrameOutcome, CzmError>,
        policy: ErrorPolicy,
    ) -> Result<(), CzmError> {
        match outcome {
            Ok(outcome) => {
                if !outcome.resolution.matched_estimate() {
                    self.offset_disagreements += 1;
                }
                self.written.push(outcome.written);
                Ok(())
            }
            Err(error) => match policy {
                ErrorPolicy::Abort => Err(CzmError::Frame {
                    index,
                    source: Box::new(error),
                }),
                ErrorPolicy::Continue => {
                    let failure = FrameFailure { index, error };
                    log::warn!("Skipping {failure}");
                    self.failures.push(failure);
                    Ok(())
                }
            },
        }
    }
}

/// Exports the frames of one container at a time.
#[derive(Debug)]
pub struct Exporter<C: ImageCodec = FfmpegCodec> {
    codec: C,
    options: ExportOptions,
}

impl<C: ImageCodec> Exporter<C> {
    /// Create an exporter that decodes and encodes through `codec`.
    pub fn new(codec: C, options: ExportOptions) -> Self {
        Self { codec, options }
    }

    /// The options this exporter runs with.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// The codec this exporter runs with.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Export every frame of `source` under `output_root`.
    ///
    /// # Errors
    ///
    /// - Whole-file preconditions ([`CzmError::UnsupportedManufacturer`],
    ///   [`CzmError::UnsupportedTransferSyntax`],
    ///   [`CzmError::MissingPixelData`], [`CzmError::InvalidFrameCount`],
    ///   [`CzmError::FrameSplit`]) before any file is written.
    /// - [`CzmError::Frame`] for the first failing frame under
    ///   [`ErrorPolicy::Abort`].
    /// - [`CzmError::Cancelled`] if the cancellation token fires.
    /// - [`CzmError::IoError`] if an output directory cannot be created.
    pub fn export<S: ContainerSource + ?Sized>(
        &self,
        source: &S,
        output_root: impl AsRef<Path>,
    ) -> Result<ExportReport, CzmError> {
        self.run(source, output_root.as_ref(), Stage::Images)
    }

    /// Write the recovered JPEG 2000 files of `source` without decoding
    /// them.
    ///
    /// Files land where [`export`](Self::export) writes its temporary
    /// codestreams and are kept.
    ///
    /// # Errors
    ///
    /// As [`export`](Self::export), minus codec failures.
    pub fn export_codestreams<S: ContainerSource + ?Sized>(
        &self,
        source: &S,
        output_root: impl AsRef<Path>,
    ) -> Result<ExportReport, CzmError> {
        self.run(source, output_root.as_ref(), Stage::Codestreams)
    }

    fn run<S: ContainerSource + ?Sized>(
        &self,
        source: &S,
        output_root: &Path,
        stage: Stage,
    ) -> Result<ExportReport, CzmError> {
        let pixel_data = self.options.profile.check(source)?;
        let frame_count = source
            .frame_count()
            .map(|field| field.parse())
            .transpose()?;

        let identifiers = source.identifiers().or(&self.options.fallbacks);
        let study_stem = source.study_stem();
        let layout = OutputLayout::new(output_root, &identifiers, &study_stem);

        let report = match frame_count {
            Some(count) => self.export_frames(&pixel_data, count, &layout, stage)?,
            None => self.export_single(&pixel_data, &layout, stage)?,
        };

        log::info!(
            "{study_stem}: wrote {} file(s), {} frame(s) failed",
            report.written.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn export_frames(
        &self,
        pixel_data: &PixelData<'_>,
        frame_count: u32,
        layout: &OutputLayout,
        stage: Stage,
    ) -> Result<ExportReport, CzmError> {
        let frames = split_frames(pixel_data, frame_count)?;
        fs::create_dir_all(layout.frame_directory())?;
        log::debug!(
            "Exporting {frame_count} frame(s) to {}",
            layout.frame_directory().display()
        );

        let mut report = ExportReport::new(Some(frame_count));
        let mut tracker = ProgressTracker::new(
            self.options.progress.clone(),
            Some(u64::from(frame_count)),
            self.options.batch_size,
        );

        #[cfg(feature = "rayon")]
        if self.options.parallel {
            let outcomes =
                crate::parallel::export_frames_parallel(self, frames.collect(), layout, stage, tracker);
            for (index, outcome) in outcomes {
                if matches!(outcome, Err(CzmError::Cancelled)) {
                    return Err(CzmError::Cancelled);
                }
                report.record(Some(index), outcome, self.options.policy)?;
            }
            return Ok(report);
        }

        for (index, bytes) in frames {
            if self.options.is_cancelled() {
                return Err(CzmError::Cancelled);
            }
            let target = layout.indexed(index, self.options.output_format);
            let outcome = self.process_frame(&bytes, &target, stage);
            tracker.advance(Some(index));
            report.record(Some(index), outcome, self.options.policy)?;
        }
        tracker.finish();

        Ok(report)
    }

    fn export_single(
        &self,
        pixel_data: &PixelData<'_>,
        layout: &OutputLayout,
        stage: Stage,
    ) -> Result<ExportReport, CzmError> {
        if self.options.is_cancelled() {
            return Err(CzmError::Cancelled);
        }
        fs::create_dir_all(layout.parent_directory())?;

        let bytes = single_frame(pixel_data);
        let target = layout.single(self.options.output_format);
        log::debug!("Exporting single frame to {}", target.image.display());

        let mut tracker =
            ProgressTracker::new(self.options.progress.clone(), Some(1), self.options.batch_size);
        let outcome = self.process_frame(&bytes, &target, stage);
        tracker.advance(None);
        tracker.finish();

        let mut report = ExportReport::new(None);
        report.record(None, outcome, self.options.policy)?;
        Ok(report)
    }

    /// Take one scrambled frame through to its output file.
    pub(crate) fn process_frame(
        &self,
        frame: &[u8],
        target: &FrameTarget,
        stage: Stage,
    ) -> Result<FrameOutcome, CzmError> {
        let written = match stage {
            Stage::Images => &target.image,
            Stage::Codestreams => &target.codestream,
        };
        if !self.options.overwrite && written.exists() {
            return Err(CzmError::IoError(IoError::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", written.display()),
            )));
        }

        let (codestream, resolution) = descramble_with_resolution(frame)?;
        log_resolution(&resolution);
        fs::write(&target.codestream, &codestream)?;

        if stage == Stage::Images {
            let decoded = self.codec.decode(&target.codestream);
            remove_codestream(&target.codestream);

            let mut raster = decoded?;
            if target.transpose {
                raster = self.codec.transpose(raster);
            }
            self.codec
                .encode(&raster, &target.image, self.options.output_format)?;
        }

        log::debug!("Wrote {}", written.display());
        Ok(FrameOutcome {
            written: written.clone(),
            resolution,
        })
    }
}

fn remove_codestream(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        log::warn!(
            "Failed to remove temporary codestream {}: {error}",
            path.display()
        );
    }
}

/// Open a DICOM file and export it with FFmpeg.
///
/// # Errors
///
/// [`CzmError::FileOpen`] if the file cannot be parsed, otherwise as
/// [`Exporter::export`].
///
/// # Example
///
/// ```no_run
/// use czm_export::{ErrorPolicy, ExportOptions, export_file};
///
/// let report = export_file("scan.dcm", "out", ExportOptions::new(ErrorPolicy::Abort))?;
/// println!("{} image(s) written", report.written.len());
/// # Ok::<(), czm_export::CzmError>(())
/// ```
pub fn export_file(
    input: impl AsRef<Path>,
    output_root: impl AsRef<Path>,
    options: ExportOptions,
) -> Result<ExportReport, CzmError> {
    let container = DicomContainer::open(input)?;
    Exporter::new(FfmpegCodec::new(), options).export(&container, output_root)
}
