//! Recovery of JPEG 2000 codestreams from scrambled CZM frames.
//!
//! Zeiss instruments store each frame's JP2 file in an obfuscated form: every
//! seventh byte is XOR-ed with `0x5A` and the file is cut into blocks that are
//! written out of order. [`descramble`] reverses both steps.
//!
//! The header offset is first estimated from the frame length and then
//! verified against the position of the JP2 signature box marker. The marker
//! position always wins; a mismatch is logged because it hints that a frame
//! does not follow the expected geometry.
//!
//! # Example
//!
//! ```no_run
//! use czm_export::descramble;
//!
//! let scrambled = std::fs::read("frame.bin")?;
//! let codestream = descramble(&scrambled)?;
//! std::fs::write("frame.jp2", &codestream)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::ops::Range;

use crate::error::CzmError;

/// Key applied to every seventh byte of a scrambled frame.
pub const XOR_KEY: u8 = 0x5A;

/// Distance between two obfuscated bytes.
pub const XOR_STRIDE: usize = 7;

/// First four bytes of the JP2 signature box (`LBox = 12`).
pub const HEADER_MARKER: [u8; 4] = [0x00, 0x00, 0x00, 0x0C];

/// Length of the block that starts at the header offset.
pub const HEADER_BLOCK_LENGTH: usize = 253;

/// One end of a block in the scrambled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// A fixed byte position.
    At(usize),
    /// A position relative to the resolved header offset.
    Header(usize),
    /// The end of the frame.
    End,
}

impl Bound {
    fn resolve(self, header_offset: usize, length: usize) -> Option<usize> {
        match self {
            Bound::At(position) => Some(position),
            Bound::Header(delta) => header_offset.checked_add(delta),
            Bound::End => Some(length),
        }
    }
}

/// A half-open range of the de-obfuscated frame copied verbatim into the
/// codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Inclusive start.
    pub start: Bound,
    /// Exclusive end.
    pub end: Bound,
}

const fn block(start: Bound, end: Bound) -> Block {
    Block { start, end }
}

/// Blocks of the scrambled frame in codestream order.
///
/// Concatenating these ranges of the de-obfuscated frame yields the original
/// JP2 file. The fixed positions only hold for frames whose header lies at or
/// beyond byte 1016.
pub const BLOCK_LAYOUT: [Block; 8] = [
    block(Bound::Header(0), Bound::Header(HEADER_BLOCK_LENGTH)),
    block(Bound::At(993), Bound::At(1016)),
    block(Bound::At(276), Bound::At(763)),
    block(Bound::At(23), Bound::At(276)),
    block(Bound::At(1016), Bound::Header(0)),
    block(Bound::At(0), Bound::At(23)),
    block(Bound::At(763), Bound::At(993)),
    block(Bound::Header(HEADER_BLOCK_LENGTH), Bound::End),
];

/// Where the JP2 header was found, and whether the length-based estimate
/// agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetResolution {
    /// Authoritative header offset (position of the first marker).
    pub offset: usize,
    /// Offset predicted from the frame length alone.
    pub estimated: usize,
}

impl OffsetResolution {
    /// Returns `true` when the estimate matched the marker position.
    pub fn matched_estimate(&self) -> bool {
        self.offset == self.estimated
    }
}

/// Estimated header offset for a frame of `length` bytes: `floor(length * 3 / 5)`.
pub fn estimate_header_offset(length: usize) -> usize {
    length / 5 * 3 + (length % 5) * 3 / 5
}

/// Undo the periodic XOR in place.
///
/// The operation is its own inverse, so it also re-applies the obfuscation.
pub fn deobfuscate(frame: &mut [u8]) {
    for byte in frame.iter_mut().step_by(XOR_STRIDE) {
        *byte ^= XOR_KEY;
    }
}

/// Locate the JP2 header in an already de-obfuscated frame.
///
/// Scans the whole buffer for [`HEADER_MARKER`]; the first hit is the
/// offset. The estimate is reported alongside so the caller can decide
/// whether a disagreement is worth surfacing.
///
/// # Errors
///
/// Returns [`CzmError::NoHeaderMarker`] if the marker does not occur.
pub fn resolve_offset(frame: &[u8]) -> Result<OffsetResolution, CzmError> {
    let estimated = estimate_header_offset(frame.len());

    let offset = frame
        .windows(HEADER_MARKER.len())
        .position(|window| window == HEADER_MARKER)
        .ok_or(CzmError::NoHeaderMarker {
            length: frame.len(),
        })?;

    Ok(OffsetResolution { offset, estimated })
}

/// Resolve every [`BLOCK_LAYOUT`] range for a frame of `length` bytes with
/// its header at `header_offset`.
///
/// # Errors
///
/// Returns [`CzmError::GeometryMismatch`] if a block is inverted or falls
/// outside the frame, or if the blocks do not cover exactly `length` bytes.
pub fn block_ranges(length: usize, header_offset: usize) -> Result<Vec<Range<usize>>, CzmError> {
    let mismatch = |reason: String| CzmError::GeometryMismatch {
        length,
        offset: header_offset,
        reason,
    };

    let mut ranges = Vec::with_capacity(BLOCK_LAYOUT.len());
    for (position, block) in BLOCK_LAYOUT.iter().enumerate() {
        let start = block.start.resolve(header_offset, length);
        let end = block.end.resolve(header_offset, length);
        match (start, end) {
            (Some(start), Some(end)) if start <= end && end <= length => ranges.push(start..end),
            _ => {
                return Err(mismatch(format!(
                    "block {position} ({:?}..{:?}) resolves to {start:?}..{end:?}",
                    block.start, block.end
                )));
            }
        }
    }

    let covered: usize = ranges.iter().map(|range| range.end - range.start).sum();
    if covered != length {
        return Err(mismatch(format!(
            "reassembled {covered} bytes instead of {length}"
        )));
    }

    Ok(ranges)
}

/// Concatenate the [`BLOCK_LAYOUT`] ranges of a de-obfuscated frame.
///
/// # Errors
///
/// See [`block_ranges`].
pub fn reassemble(frame: &[u8], header_offset: usize) -> Result<Vec<u8>, CzmError> {
    let mut codestream = Vec::with_capacity(frame.len());
    for range in block_ranges(frame.len(), header_offset)? {
        codestream.extend_from_slice(&frame[range]);
    }
    Ok(codestream)
}

/// Descramble one frame and report how its header offset was resolved.
///
/// Unlike [`descramble`] this does not log; the caller decides what to do
/// with an estimate mismatch.
///
/// # Errors
///
/// - [`CzmError::NoHeaderMarker`] if the frame holds no JP2 header.
/// - [`CzmError::GeometryMismatch`] if the block layout does not fit.
pub fn descramble_with_resolution(
    frame: &[u8],
) -> Result<(Vec<u8>, OffsetResolution), CzmError> {
    let mut plain = frame.to_vec();
    deobfuscate(&mut plain);

    let resolution = resolve_offset(&plain)?;
    let codestream = reassemble(&plain, resolution.offset)?;

    Ok((codestream, resolution))
}

/// Descramble one frame into a JPEG 2000 file.
///
/// Logs a warning when the header was not where the frame length
/// predicted.
///
/// # Errors
///
/// See [`descramble_with_resolution`].
pub fn descramble(frame: &[u8]) -> Result<Vec<u8>, CzmError> {
    let (codestream, resolution) = descramble_with_resolution(frame)?;
    log_resolution(&resolution);
    Ok(codestream)
}

pub(crate) fn log_resolution(resolution: &OffsetResolution) {
    if !resolution.matched_estimate() {
        log::warn!(
            "JP2 header found at offset {} rather than the expected {}",
            resolution.offset,
            resolution.estimated
        );
    }
}
