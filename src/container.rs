//! Container access.
//!
//! The exporter never reads DICOM directly. It talks to a
//! [`ContainerSource`], which exposes only what the pipeline needs: the
//! vendor and transfer syntax checks, the encoded pixel data, the optional
//! frame count, and the identifiers used to build output paths.
//!
//! [`DicomContainer`](crate::DicomContainer) implements the trait on top of
//! `dicom-object`; [`MemoryContainer`] is a plain in-memory implementation
//! for datasets parsed elsewhere.

use std::borrow::Cow;

use crate::error::CzmError;
use crate::frames::FrameCountField;

/// Transfer syntax UID of JPEG 2000 Image Compression (Lossless Only).
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";

/// Manufacturer prefix written by Carl Zeiss Meditec instruments.
pub const CARL_ZEISS_MEDITEC: &str = "Carl Zeiss Meditec";

/// Encoded pixel data as stored in the container.
#[derive(Debug, Clone)]
pub enum PixelData<'a> {
    /// A single contiguous value (defined-length Pixel Data).
    Native(Cow<'a, [u8]>),
    /// An encapsulated fragment sequence.
    Encapsulated {
        /// Basic Offset Table entries; empty when the table is absent.
        offset_table: &'a [u32],
        /// Fragment payloads, without item headers.
        fragments: &'a [Vec<u8>],
    },
}

impl PixelData<'_> {
    /// Total payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            PixelData::Native(bytes) => bytes.len(),
            PixelData::Encapsulated { fragments, .. } => {
                fragments.iter().map(Vec::len).sum()
            }
        }
    }

    /// Returns `true` if there are no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fragments (1 for native data).
    pub fn fragment_count(&self) -> usize {
        match self {
            PixelData::Native(_) => 1,
            PixelData::Encapsulated { fragments, .. } => fragments.len(),
        }
    }
}

/// Identifiers taken from the dataset to name the output directory.
///
/// Values are already truncated to the lengths the layout uses: seven
/// characters of the patient ID, eight of the acquisition date and two of
/// the laterality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyIdentifiers {
    /// Patient ID (0010,0020).
    pub patient_id: Option<String>,
    /// Acquisition date (0008,0022), `YYYYMMDD`.
    pub date: Option<String>,
    /// Laterality (0020,0060), e.g. `OD` or `OS`.
    pub laterality: Option<String>,
}

impl StudyIdentifiers {
    /// Build identifiers from raw dataset strings, trimming padding and
    /// truncating each to its layout length.
    pub fn from_raw(
        patient_id: Option<&str>,
        date: Option<&str>,
        laterality: Option<&str>,
    ) -> Self {
        Self {
            patient_id: clean_identifier(patient_id, 7),
            date: clean_identifier(date, 8),
            laterality: clean_identifier(laterality, 2),
        }
    }

    /// Fill every missing identifier from `fallback`.
    #[must_use]
    pub fn or(self, fallback: &StudyIdentifiers) -> Self {
        Self {
            patient_id: self.patient_id.or_else(|| fallback.patient_id.clone()),
            date: self.date.or_else(|| fallback.date.clone()),
            laterality: self.laterality.or_else(|| fallback.laterality.clone()),
        }
    }
}

fn clean_identifier(value: Option<&str>, max_chars: usize) -> Option<String> {
    let trimmed = value?.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

/// A source of scrambled frames and their metadata.
pub trait ContainerSource {
    /// Manufacturer (0008,0070), if present.
    fn manufacturer(&self) -> Option<Cow<'_, str>>;

    /// Transfer syntax UID from the file meta group.
    fn transfer_syntax(&self) -> Cow<'_, str>;

    /// Encoded Pixel Data, if present.
    fn pixel_data(&self) -> Option<PixelData<'_>>;

    /// Number of Frames (0028,0008), if present.
    fn frame_count(&self) -> Option<FrameCountField>;

    /// Identifiers used for the output layout.
    fn identifiers(&self) -> StudyIdentifiers;

    /// Stem of the source file name, used as the last path segment.
    fn study_stem(&self) -> Cow<'_, str>;
}

/// Vendor and encoding a file must match before any frame is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    /// Required prefix of the Manufacturer value.
    pub manufacturer_prefix: String,
    /// Required transfer syntax UID.
    pub transfer_syntax: String,
}

impl SourceProfile {
    /// Zeiss datasets stored as lossless JPEG 2000.
    pub fn carl_zeiss_meditec() -> Self {
        Self {
            manufacturer_prefix: CARL_ZEISS_MEDITEC.to_string(),
            transfer_syntax: JPEG_2000_LOSSLESS.to_string(),
        }
    }

    /// Check whole-file preconditions and return the pixel data.
    ///
    /// # Errors
    ///
    /// - [`CzmError::UnsupportedManufacturer`] if the manufacturer is missing
    ///   or does not start with the expected prefix.
    /// - [`CzmError::UnsupportedTransferSyntax`] if the transfer syntax
    ///   differs.
    /// - [`CzmError::MissingPixelData`] if there is no pixel data.
    pub fn check<'a, S: ContainerSource + ?Sized>(
        &self,
        source: &'a S,
    ) -> Result<PixelData<'a>, CzmError> {
        let manufacturer = source.manufacturer();
        let manufacturer_matches = manufacturer
            .as_deref()
            .is_some_and(|name| name.starts_with(&self.manufacturer_prefix));
        if !manufacturer_matches {
            return Err(CzmError::UnsupportedManufacturer {
                found: manufacturer
                    .map(Cow::into_owned)
                    .unwrap_or_else(|| "<missing>".to_string()),
                expected: self.manufacturer_prefix.clone(),
            });
        }

        let transfer_syntax = source.transfer_syntax();
        let transfer_syntax = transfer_syntax.trim_end_matches(['\0', ' ']);
        if transfer_syntax != self.transfer_syntax {
            return Err(CzmError::UnsupportedTransferSyntax {
                found: transfer_syntax.to_string(),
                expected: self.transfer_syntax.clone(),
            });
        }

        source.pixel_data().ok_or(CzmError::MissingPixelData)
    }
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self::carl_zeiss_meditec()
    }
}

/// Pixel data owned by a [`MemoryContainer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedPixelData {
    /// A single contiguous value.
    Native(Vec<u8>),
    /// An encapsulated fragment sequence.
    Encapsulated {
        /// Basic Offset Table entries.
        offset_table: Vec<u32>,
        /// Fragment payloads.
        fragments: Vec<Vec<u8>>,
    },
}

/// A [`ContainerSource`] backed by plain values.
///
/// # Example
///
/// ```
/// use czm_export::{MemoryContainer, OwnedPixelData};
///
/// let container = MemoryContainer::new("scan")
///     .with_manufacturer("Carl Zeiss Meditec")
///     .with_pixel_data(OwnedPixelData::Native(vec![0; 16]));
/// assert_eq!(container.frame_count_field(), None);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    study_stem: String,
    manufacturer: Option<String>,
    transfer_syntax: String,
    pixel_data: Option<OwnedPixelData>,
    frame_count: Option<FrameCountField>,
    identifiers: StudyIdentifiers,
}

impl MemoryContainer {
    /// Create an empty container whose output is named after `study_stem`.
    ///
    /// The transfer syntax defaults to [`JPEG_2000_LOSSLESS`].
    pub fn new(study_stem: impl Into<String>) -> Self {
        Self {
            study_stem: study_stem.into(),
            manufacturer: None,
            transfer_syntax: JPEG_2000_LOSSLESS.to_string(),
            pixel_data: None,
            frame_count: None,
            identifiers: StudyIdentifiers::default(),
        }
    }

    /// Set the manufacturer.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the transfer syntax UID.
    #[must_use]
    pub fn with_transfer_syntax(mut self, uid: impl Into<String>) -> Self {
        self.transfer_syntax = uid.into();
        self
    }

    /// Set the pixel data.
    #[must_use]
    pub fn with_pixel_data(mut self, pixel_data: OwnedPixelData) -> Self {
        self.pixel_data = Some(pixel_data);
        self
    }

    /// Set the Number of Frames value.
    #[must_use]
    pub fn with_frame_count(mut self, frame_count: FrameCountField) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    /// Set the output identifiers.
    #[must_use]
    pub fn with_identifiers(mut self, identifiers: StudyIdentifiers) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// The configured Number of Frames value.
    pub fn frame_count_field(&self) -> Option<&FrameCountField> {
        self.frame_count.as_ref()
    }
}

impl ContainerSource for MemoryContainer {
    fn manufacturer(&self) -> Option<Cow<'_, str>> {
        self.manufacturer.as_deref().map(Cow::Borrowed)
    }

    fn transfer_syntax(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.transfer_syntax)
    }

    fn pixel_data(&self) -> Option<PixelData<'_>> {
        self.pixel_data.as_ref().map(|data| match data {
            OwnedPixelData::Native(bytes) => PixelData::Native(Cow::Borrowed(bytes)),
            OwnedPixelData::Encapsulated {
                offset_table,
                fragments,
            } => PixelData::Encapsulated {
                offset_table,
                fragments,
            },
        })
    }

    fn frame_count(&self) -> Option<FrameCountField> {
        self.frame_count.clone()
    }

    fn identifiers(&self) -> StudyIdentifiers {
        self.identifiers.clone()
    }

    fn study_stem(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.study_stem)
    }
}
