//! Pre-export validation.
//!
//! [`validate_source`] inspects a container and returns a
//! [`ValidationReport`] that states whether an export can start, and what
//! the output will look like. Frames are de-obfuscated in memory to check
//! their header offset against the block layout; nothing is written.
//!
//! # Example
//!
//! ```no_run
//! use czm_export::{DicomContainer, SourceProfile, validate_source};
//!
//! let container = DicomContainer::open("scan.dcm")?;
//! let report = validate_source(&container, &SourceProfile::default());
//! if report.is_valid() {
//!     println!("Ready to export");
//! } else {
//!     for error in &report.errors {
//!         println!("Error: {error}");
//!     }
//! }
//! # Ok::<(), czm_export::CzmError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::{
    container::{ContainerSource, SourceProfile},
    descramble::{block_ranges, deobfuscate, resolve_offset},
    frames::{FrameCountField, normalize_frame_count, single_frame, split_frames},
    layout::UNKNOWN,
    metadata::{ContainerMetadata, PixelDataKind},
};

/// Summary of container validation.
///
/// Contains lists of informational notices, warnings, and errors. Only
/// errors prevent an export.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Informational notices (not problems).
    pub info: Vec<String>,
    /// Non-fatal issues that may affect the export.
    pub warnings: Vec<String>,
    /// Fatal issues that will reject the file.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if no errors were found.
    ///
    /// Warnings do not affect this result.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of issues (info + warnings + errors).
    pub fn issue_count(&self) -> usize {
        self.info.len() + self.warnings.len() + self.errors.len()
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for item in &self.info {
            writeln!(f, "[INFO] {item}")?;
        }
        for item in &self.warnings {
            writeln!(f, "[WARN] {item}")?;
        }
        for item in &self.errors {
            writeln!(f, "[ERROR] {item}")?;
        }
        if self.issue_count() == 0 {
            writeln!(f, "No issues found.")?;
        }
        Ok(())
    }
}

/// Check a container against `profile` and describe the planned export.
pub fn validate_source<S: ContainerSource + ?Sized>(
    source: &S,
    profile: &SourceProfile,
) -> ValidationReport {
    let metadata = ContainerMetadata::from_source(source);
    let mut report = ValidationReport::default();

    // ── Vendor ─────────────────────────────────────────────────────
    match &metadata.manufacturer {
        Some(name) if name.starts_with(&profile.manufacturer_prefix) => {
            report.info.push(format!("Manufacturer: {name}"));
        }
        Some(name) => report.errors.push(format!(
            "Manufacturer {name:?} does not start with {:?}",
            profile.manufacturer_prefix
        )),
        None => report.errors.push("Manufacturer is missing".to_string()),
    }

    // ── Transfer syntax ────────────────────────────────────────────
    if metadata.transfer_syntax == profile.transfer_syntax {
        report
            .info
            .push(format!("Transfer syntax: {}", metadata.transfer_syntax));
    } else {
        report.errors.push(format!(
            "Transfer syntax {} is not {}",
            metadata.transfer_syntax, profile.transfer_syntax
        ));
    }

    // ── Pixel data ─────────────────────────────────────────────────
    let Some(summary) = &metadata.pixel_data else {
        report.errors.push("Pixel Data is missing".to_string());
        return report;
    };
    let kind = match summary.kind {
        PixelDataKind::Native => "native",
        PixelDataKind::Encapsulated => "encapsulated",
    };
    report.info.push(format!(
        "Pixel data: {kind}, {} bytes in {} fragment(s), {} offset table entries",
        summary.bytes, summary.fragments, summary.offset_table_entries
    ));

    // ── Frames ─────────────────────────────────────────────────────
    match &metadata.frame_count {
        None => {
            report
                .info
                .push("No frame count: exported as one untransposed image".to_string());
            if let Some(pixel_data) = source.pixel_data() {
                match layout_problem(&single_frame(&pixel_data)) {
                    Some(LayoutProblem::NoMarker) => report.warnings.push(format!(
                        "Pixel data of {} bytes has no JP2 header",
                        summary.bytes
                    )),
                    Some(LayoutProblem::Geometry) => report.warnings.push(format!(
                        "Pixel data of {} bytes does not fit the block layout",
                        summary.bytes
                    )),
                    None => {}
                }
            }
        }
        Some(field) => check_frame_count(source, field, &mut report),
    }

    // ── Identifiers ────────────────────────────────────────────────
    let identifiers = &metadata.identifiers;
    for (name, value) in [
        ("Patient ID", &identifiers.patient_id),
        ("Acquisition date", &identifiers.date),
        ("Laterality", &identifiers.laterality),
    ] {
        if value.is_none() {
            report
                .warnings
                .push(format!("{name} is missing; {UNKNOWN} is used in its place"));
        }
    }

    report
}

fn check_frame_count<S: ContainerSource + ?Sized>(
    source: &S,
    field: &FrameCountField,
    report: &mut ValidationReport,
) {
    if let FrameCountField::Text(text) = field
        && text.contains('\0')
    {
        report.info.push(format!(
            "Number of Frames {field} is NUL-padded; {:?} is used",
            normalize_frame_count(text)
        ));
    }

    let count = match field.parse() {
        Ok(count) => count,
        Err(error) => {
            report.errors.push(error.to_string());
            return;
        }
    };

    let Some(pixel_data) = source.pixel_data() else {
        return;
    };
    match split_frames(&pixel_data, count) {
        Ok(frames) => {
            report.info.push(format!("{count} frame(s) declared"));
            let (mut unmarked, mut misfit) = (0, 0);
            for (_, bytes) in frames {
                match layout_problem(&bytes) {
                    Some(LayoutProblem::NoMarker) => unmarked += 1,
                    Some(LayoutProblem::Geometry) => misfit += 1,
                    None => {}
                }
            }
            if unmarked > 0 {
                report
                    .warnings
                    .push(format!("{unmarked} frame(s) have no JP2 header"));
            }
            if misfit > 0 {
                report
                    .warnings
                    .push(format!("{misfit} frame(s) do not fit the block layout"));
            }
        }
        Err(error) => report.errors.push(error.to_string()),
    }
}

/// Why a frame would fail to descramble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutProblem {
    NoMarker,
    Geometry,
}

/// Check a scrambled frame against the block layout at its resolved
/// header offset.
fn layout_problem(frame: &[u8]) -> Option<LayoutProblem> {
    let mut plain = frame.to_vec();
    deobfuscate(&mut plain);
    match resolve_offset(&plain) {
        Err(_) => Some(LayoutProblem::NoMarker),
        Ok(resolution) => block_ranges(plain.len(), resolution.offset)
            .err()
            .map(|_| LayoutProblem::Geometry),
    }
}
