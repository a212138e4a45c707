//! DICOM file access through `dicom-object`.
//!
//! [`DicomContainer`] opens a Part 10 file once, keeps the parsed dataset in
//! memory and serves it through [`ContainerSource`]. Pixel Data is exposed
//! as-is: encapsulated fragments for conformant multi-frame datasets, or the
//! raw value for the defined-length single-frame variant Zeiss also writes.

use std::{
    borrow::Cow,
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

use dicom_core::{Tag, value::Value};
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, InMemDicomObject};

use crate::{
    container::{ContainerSource, PixelData, StudyIdentifiers},
    error::CzmError,
    frames::FrameCountField,
    metadata::ContainerMetadata,
};

/// A DICOM file opened for export.
///
/// # Example
///
/// ```no_run
/// use czm_export::{ContainerSource, DicomContainer};
///
/// let container = DicomContainer::open("scan.dcm")?;
/// println!("Manufacturer: {:?}", container.manufacturer());
/// println!("Frames: {:?}", container.frame_count());
/// # Ok::<(), czm_export::CzmError>(())
/// ```
pub struct DicomContainer {
    object: DefaultDicomObject,
    file_path: PathBuf,
}

impl Debug for DicomContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DicomContainer")
            .field("file_path", &self.file_path)
            .field("transfer_syntax", &self.object.meta().transfer_syntax())
            .finish_non_exhaustive()
    }
}

impl DicomContainer {
    /// Open and parse a DICOM file.
    ///
    /// # Errors
    ///
    /// Returns [`CzmError::FileOpen`] if the file cannot be read or is not a
    /// valid DICOM Part 10 file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CzmError> {
        let path = path.as_ref();
        log::debug!("Opening DICOM file: {}", path.display());

        let object = dicom_object::open_file(path).map_err(|error| CzmError::FileOpen {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        Ok(Self {
            object,
            file_path: path.to_path_buf(),
        })
    }

    /// Path the container was opened from.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Snapshot of the fields relevant to export.
    pub fn metadata(&self) -> ContainerMetadata {
        ContainerMetadata::from_source(self)
    }

    fn dataset(&self) -> &InMemDicomObject {
        &self.object
    }

    fn string(&self, tag: Tag) -> Option<Cow<'_, str>> {
        self.dataset()
            .get(tag)
            .and_then(|element| element.value().to_str().ok())
    }
}

impl ContainerSource for DicomContainer {
    fn manufacturer(&self) -> Option<Cow<'_, str>> {
        self.string(tags::MANUFACTURER)
    }

    fn transfer_syntax(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.object.meta().transfer_syntax())
    }

    fn pixel_data(&self) -> Option<PixelData<'_>> {
        let element = self.dataset().get(tags::PIXEL_DATA)?;
        match element.value() {
            Value::PixelSequence(sequence) => Some(PixelData::Encapsulated {
                offset_table: sequence.offset_table(),
                fragments: sequence.fragments(),
            }),
            Value::Primitive(primitive) => Some(PixelData::Native(primitive.to_bytes())),
            _ => None,
        }
    }

    fn frame_count(&self) -> Option<FrameCountField> {
        let element = self.dataset().get(tags::NUMBER_OF_FRAMES)?;
        let value = element.value();
        match value.to_str() {
            Ok(text) => Some(FrameCountField::Text(text.into_owned())),
            Err(_) => value.to_int::<i64>().ok().map(FrameCountField::Integer),
        }
    }

    fn identifiers(&self) -> StudyIdentifiers {
        StudyIdentifiers::from_raw(
            self.string(tags::PATIENT_ID).as_deref(),
            self.string(tags::ACQUISITION_DATE).as_deref(),
            self.string(tags::LATERALITY).as_deref(),
        )
    }

    fn study_stem(&self) -> Cow<'_, str> {
        self.file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy())
            .unwrap_or(Cow::Borrowed("study"))
    }
}
