//! Output paths.
//!
//! Every exported file lands under
//! `<root>/<patient>/<date>/<laterality>/<study>`:
//!
//! - multi-frame datasets become a directory of `000.png`, `001.png`, …
//! - single-frame datasets become one `<study>.png` file.
//!
//! Missing identifiers are replaced by [`UNKNOWN`]. Identifiers come from
//! the dataset, so each one is reduced to a single path component: path
//! separators become underscores and `.`/`..` become [`UNKNOWN`].

use std::path::{Path, PathBuf};

use crate::{configuration::OutputFormat, container::StudyIdentifiers};

/// Placeholder for identifiers that are absent from the dataset.
pub const UNKNOWN: &str = "UNKNOWN";

/// Extension of the temporary codestream files.
pub const CODESTREAM_EXTENSION: &str = "jp2";

/// Where one dataset's images are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    /// `<root>/<patient>/<date>/<laterality>/<study>` without extension.
    study_path: PathBuf,
}

impl OutputLayout {
    /// Build the layout for one dataset.
    ///
    /// Dots in `study_stem` are replaced by underscores so that the stem
    /// never gains a spurious extension.
    pub fn new(root: impl AsRef<Path>, identifiers: &StudyIdentifiers, study_stem: &str) -> Self {
        let segment = |value: &Option<String>| path_component(value.as_deref().unwrap_or(UNKNOWN));
        let study_path = root
            .as_ref()
            .join(segment(&identifiers.patient_id))
            .join(segment(&identifiers.date))
            .join(segment(&identifiers.laterality))
            .join(path_component(&study_stem.replace('.', "_")));
        Self { study_path }
    }

    /// Directory holding the indexed frames of a multi-frame dataset.
    pub fn frame_directory(&self) -> &Path {
        &self.study_path
    }

    /// Directory holding the image of a single-frame dataset.
    pub fn parent_directory(&self) -> &Path {
        self.study_path.parent().unwrap_or(&self.study_path)
    }

    /// Paths for frame `index` of a multi-frame dataset.
    pub fn indexed(&self, index: usize, format: OutputFormat) -> FrameTarget {
        let name = format!("{index:03}");
        FrameTarget {
            index: Some(index),
            codestream: self
                .study_path
                .join(format!("{name}.{CODESTREAM_EXTENSION}")),
            image: self
                .study_path
                .join(format!("{name}.{}", format.extension())),
            transpose: true,
        }
    }

    /// Paths for the only frame of a single-frame dataset.
    pub fn single(&self, format: OutputFormat) -> FrameTarget {
        FrameTarget {
            index: None,
            codestream: self.study_path.with_extension(CODESTREAM_EXTENSION),
            image: self.study_path.with_extension(format.extension()),
            transpose: false,
        }
    }
}

/// Reduce `value` to one relative path component.
fn path_component(value: &str) -> String {
    let component: String = value
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    match component.as_str() {
        "" | "." | ".." => UNKNOWN.to_string(),
        _ => component,
    }
}

/// Files touched while exporting one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTarget {
    /// Frame index, `None` on the single-frame path.
    pub index: Option<usize>,
    /// Temporary codestream written before decoding.
    pub codestream: PathBuf,
    /// Final raster image.
    pub image: PathBuf,
    /// Whether the decoded raster is transposed before encoding.
    pub transpose: bool,
}
