//! Frame boundaries.
//!
//! Multi-frame datasets store one JPEG 2000 file per frame inside an
//! encapsulated fragment sequence (DICOM PS3.5 A.4). [`split_frames`] groups
//! the fragments back into frames and yields them lazily, in declaration
//! order, through a [`Frames`] iterator.
//!
//! Zeiss writes Number of Frames as a string that is sometimes NUL-padded
//! with trailing garbage; [`FrameCountField::parse`] keeps only the text
//! before the first NUL.

use std::{borrow::Cow, ops::Range, vec::IntoIter};

use crate::{container::PixelData, error::CzmError};

/// JPEG 2000 End of Codestream marker.
const END_OF_CODESTREAM: [u8; 2] = [0xFF, 0xD9];

/// How many trailing bytes of a fragment are searched for the EOC marker.
const END_OF_CODESTREAM_WINDOW: usize = 10;

/// Size of an item header (tag + length) in an encapsulated sequence.
const ITEM_HEADER_LENGTH: u64 = 8;

/// The Number of Frames value as stored in the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameCountField {
    /// A string value, possibly NUL-padded.
    Text(String),
    /// An integer value.
    Integer(i64),
}

impl FrameCountField {
    /// Parse the declared frame count.
    ///
    /// Text values are cut at the first NUL and trimmed before parsing, so
    /// `"3\09"` reads as 3.
    ///
    /// # Errors
    ///
    /// Returns [`CzmError::InvalidFrameCount`] if the value is not a
    /// positive integer.
    ///
    /// # Example
    ///
    /// ```
    /// use czm_export::FrameCountField;
    ///
    /// let field = FrameCountField::Text("3\09".to_string());
    /// assert_eq!(field.parse().unwrap(), 3);
    /// ```
    pub fn parse(&self) -> Result<u32, CzmError> {
        let count = match self {
            FrameCountField::Text(text) => {
                let number = normalize_frame_count(text);
                number
                    .parse::<u32>()
                    .map_err(|_| CzmError::InvalidFrameCount(text.clone()))?
            }
            FrameCountField::Integer(value) => u32::try_from(*value)
                .map_err(|_| CzmError::InvalidFrameCount(value.to_string()))?,
        };

        if count == 0 {
            return Err(CzmError::InvalidFrameCount(self.to_string()));
        }
        Ok(count)
    }
}

impl std::fmt::Display for FrameCountField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameCountField::Text(text) => write!(f, "{text:?}"),
            FrameCountField::Integer(value) => write!(f, "{value}"),
        }
    }
}

/// The part of a frame count string before the first NUL, trimmed.
pub fn normalize_frame_count(raw: &str) -> &str {
    raw.split('\0').next().unwrap_or_default().trim()
}

#[derive(Clone, Copy)]
enum FrameSource<'a> {
    Native(&'a [u8]),
    Fragments(&'a [Vec<u8>]),
}

/// Ordered frames of a multi-frame dataset.
///
/// Yields `(frame_index, bytes)` pairs. Frames that span a single fragment
/// are borrowed; frames spread over several fragments are concatenated.
pub struct Frames<'a> {
    source: FrameSource<'a>,
    extents: IntoIter<Range<usize>>,
    next_index: usize,
}

impl<'a> Iterator for Frames<'a> {
    type Item = (usize, Cow<'a, [u8]>);

    fn next(&mut self) -> Option<Self::Item> {
        let extent = self.extents.next()?;
        let bytes = match self.source {
            FrameSource::Native(bytes) => Cow::Borrowed(&bytes[extent]),
            FrameSource::Fragments(fragments) => match &fragments[extent] {
                [single] => Cow::Borrowed(single.as_slice()),
                several => Cow::Owned(several.concat()),
            },
        };
        let index = self.next_index;
        self.next_index += 1;
        Some((index, bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.extents.size_hint()
    }
}

impl ExactSizeIterator for Frames<'_> {}

/// Divide pixel data into `frame_count` frames.
///
/// # Errors
///
/// Returns [`CzmError::FrameSplit`] if the data cannot be divided into
/// exactly `frame_count` non-empty frames.
pub fn split_frames<'a>(
    pixel_data: &'a PixelData<'_>,
    frame_count: u32,
) -> Result<Frames<'a>, CzmError> {
    let frame_count = frame_count as usize;
    if frame_count == 0 {
        return Err(CzmError::FrameSplit("frame count is zero".to_string()));
    }

    let (source, extents) = match pixel_data {
        PixelData::Native(bytes) => (
            FrameSource::Native(bytes.as_ref()),
            split_native(bytes.len(), frame_count)?,
        ),
        PixelData::Encapsulated {
            offset_table,
            fragments,
        } => (
            FrameSource::Fragments(*fragments),
            group_fragments(offset_table, fragments, frame_count)?,
        ),
    };

    log::debug!("Split pixel data into {} frames", extents.len());

    Ok(Frames {
        source,
        extents: extents.into_iter(),
        next_index: 0,
    })
}

/// The whole pixel buffer as one frame.
///
/// Used when the dataset has no Number of Frames element; fragments are
/// concatenated.
pub fn single_frame<'a>(pixel_data: &'a PixelData<'_>) -> Cow<'a, [u8]> {
    match pixel_data {
        PixelData::Native(bytes) => Cow::Borrowed(bytes.as_ref()),
        PixelData::Encapsulated { fragments, .. } => match fragments {
            [single] => Cow::Borrowed(single.as_slice()),
            several => Cow::Owned(several.concat()),
        },
    }
}

fn split_native(length: usize, frame_count: usize) -> Result<Vec<Range<usize>>, CzmError> {
    if length == 0 || length % frame_count != 0 {
        return Err(CzmError::FrameSplit(format!(
            "{length} bytes of native pixel data cannot hold {frame_count} equal frames"
        )));
    }
    let frame_length = length / frame_count;
    Ok((0..frame_count)
        .map(|index| index * frame_length..(index + 1) * frame_length)
        .collect())
}

fn group_fragments(
    offset_table: &[u32],
    fragments: &[Vec<u8>],
    frame_count: usize,
) -> Result<Vec<Range<usize>>, CzmError> {
    if fragments.len() < frame_count {
        return Err(CzmError::FrameSplit(format!(
            "{} fragments cannot hold {frame_count} frames",
            fragments.len()
        )));
    }

    if !offset_table.is_empty() {
        return group_by_offset_table(offset_table, fragments, frame_count);
    }

    if fragments.len() == frame_count {
        return Ok((0..frame_count).map(|index| index..index + 1).collect());
    }

    if frame_count == 1 {
        return Ok(vec![0..fragments.len()]);
    }

    group_by_end_of_codestream(fragments, frame_count)
}

fn group_by_offset_table(
    offset_table: &[u32],
    fragments: &[Vec<u8>],
    frame_count: usize,
) -> Result<Vec<Range<usize>>, CzmError> {
    if offset_table.len() != frame_count {
        return Err(CzmError::FrameSplit(format!(
            "offset table lists {} frames, dataset declares {frame_count}",
            offset_table.len()
        )));
    }

    let mut extents: Vec<Range<usize>> = Vec::with_capacity(frame_count);
    let mut position = 0u64;
    for (fragment_index, fragment) in fragments.iter().enumerate() {
        let frame = offset_table.partition_point(|&offset| u64::from(offset) <= position);
        if frame == 0 {
            return Err(CzmError::FrameSplit(format!(
                "fragment {fragment_index} at byte {position} precedes the first frame offset"
            )));
        }
        let frame = frame - 1;

        if extents.len() == frame + 1 {
            if let Some(extent) = extents.last_mut() {
                extent.end = fragment_index + 1;
            }
        } else if extents.len() == frame {
            extents.push(fragment_index..fragment_index + 1);
        } else {
            return Err(CzmError::FrameSplit(format!(
                "offset table entry {} matches no fragment boundary",
                extents.len()
            )));
        }

        position += ITEM_HEADER_LENGTH + fragment.len() as u64;
    }

    if extents.len() != frame_count {
        return Err(CzmError::FrameSplit(format!(
            "offset table resolved {} frames, dataset declares {frame_count}",
            extents.len()
        )));
    }
    Ok(extents)
}

fn group_by_end_of_codestream(
    fragments: &[Vec<u8>],
    frame_count: usize,
) -> Result<Vec<Range<usize>>, CzmError> {
    let mut extents = Vec::with_capacity(frame_count);
    let mut start = 0;
    for (index, fragment) in fragments.iter().enumerate() {
        let tail = &fragment[fragment.len().saturating_sub(END_OF_CODESTREAM_WINDOW)..];
        if tail.windows(2).any(|pair| pair == END_OF_CODESTREAM) {
            extents.push(start..index + 1);
            start = index + 1;
        }
    }
    if start < fragments.len() {
        extents.push(start..fragments.len());
    }

    if extents.len() != frame_count {
        return Err(CzmError::FrameSplit(format!(
            "found {} end-of-codestream markers, dataset declares {frame_count} frames",
            extents.len()
        )));
    }
    Ok(extents)
}
