//! Container metadata snapshots.
//!
//! [`ContainerMetadata`] collects, in one owned value, everything the
//! exporter looks at in a dataset. It is what `czm-export inspect` prints
//! and what [`validate_source`](crate::validate_source) reasons about.

use crate::{
    container::{ContainerSource, PixelData, StudyIdentifiers},
    frames::FrameCountField,
};

/// How the Pixel Data element is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDataKind {
    /// One defined-length value.
    Native,
    /// An encapsulated fragment sequence.
    Encapsulated,
}

/// Shape of the Pixel Data element.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct PixelDataSummary {
    /// Storage form.
    pub kind: PixelDataKind,
    /// Total payload bytes.
    pub bytes: usize,
    /// Number of fragments (1 for native data).
    pub fragments: usize,
    /// Number of Basic Offset Table entries (0 for native data).
    pub offset_table_entries: usize,
}

impl PixelDataSummary {
    /// Summarise pixel data.
    pub fn of(pixel_data: &PixelData<'_>) -> Self {
        match pixel_data {
            PixelData::Native(bytes) => Self {
                kind: PixelDataKind::Native,
                bytes: bytes.len(),
                fragments: 1,
                offset_table_entries: 0,
            },
            PixelData::Encapsulated {
                offset_table,
                fragments,
            } => Self {
                kind: PixelDataKind::Encapsulated,
                bytes: pixel_data.len(),
                fragments: fragments.len(),
                offset_table_entries: offset_table.len(),
            },
        }
    }
}

/// Export-relevant fields of one dataset.
///
/// # Example
///
/// ```no_run
/// use czm_export::DicomContainer;
///
/// let container = DicomContainer::open("scan.dcm")?;
/// let metadata = container.metadata();
/// println!("Transfer syntax: {}", metadata.transfer_syntax);
/// # Ok::<(), czm_export::CzmError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ContainerMetadata {
    /// Manufacturer (0008,0070).
    pub manufacturer: Option<String>,
    /// Transfer syntax UID.
    pub transfer_syntax: String,
    /// Raw Number of Frames value.
    pub frame_count: Option<FrameCountField>,
    /// Pixel Data shape, if present.
    pub pixel_data: Option<PixelDataSummary>,
    /// Identifiers used for the output layout.
    pub identifiers: StudyIdentifiers,
    /// Source file stem.
    pub study_stem: String,
}

impl ContainerMetadata {
    /// Read the metadata from any container.
    pub fn from_source<S: ContainerSource + ?Sized>(source: &S) -> Self {
        Self {
            manufacturer: source.manufacturer().map(|name| name.into_owned()),
            transfer_syntax: source
                .transfer_syntax()
                .trim_end_matches(['\0', ' '])
                .to_string(),
            frame_count: source.frame_count(),
            pixel_data: source.pixel_data().as_ref().map(PixelDataSummary::of),
            identifiers: source.identifiers(),
            study_stem: source.study_stem().into_owned(),
        }
    }
}
