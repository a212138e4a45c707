//! Shared helpers for integration tests.
//!
//! Scrambled frames are built by running the block layout backwards over a
//! synthetic codestream, so every test knows exactly what descrambling
//! must produce.

#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use czm_export::{
    BLOCK_LAYOUT, CzmError, FrameCountField, HEADER_MARKER, ImageCodec, MemoryContainer,
    OwnedPixelData, StudyIdentifiers, deobfuscate, descramble::Bound,
};
use image::{DynamicImage, GrayImage, Luma};

pub const ZEISS: &str = "Carl Zeiss Meditec";

/// A fake JP2 file of `length` bytes: the signature box marker followed by
/// bytes that are never zero, so the marker occurs exactly once.
pub fn codestream(length: usize, seed: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..length)
        .map(|index| ((index * 31 + 7 + seed * 13) % 251 + 1) as u8)
        .collect();
    bytes[..HEADER_MARKER.len()].copy_from_slice(&HEADER_MARKER);
    bytes
}

fn resolve(bound: Bound, offset: usize, length: usize) -> usize {
    match bound {
        Bound::At(position) => position,
        Bound::Header(delta) => offset + delta,
        Bound::End => length,
    }
}

/// Scramble `codestream` so that its header lands at `offset`.
pub fn scramble(codestream: &[u8], offset: usize) -> Vec<u8> {
    let length = codestream.len();
    let mut plain = vec![0u8; length];
    let mut cursor = 0;
    for block in BLOCK_LAYOUT {
        let start = resolve(block.start, offset, length);
        let end = resolve(block.end, offset, length);
        plain[start..end].copy_from_slice(&codestream[cursor..cursor + (end - start)]);
        cursor += end - start;
    }
    assert_eq!(cursor, length, "layout must consume the whole codestream");
    deobfuscate(&mut plain);
    plain
}

/// A frame with no header marker anywhere.
pub fn unmarked_frame(length: usize) -> Vec<u8> {
    vec![0x11; length]
}

/// An encapsulated Zeiss container holding one fragment per frame.
pub fn multi_frame_container(frames: Vec<Vec<u8>>, frame_count: FrameCountField) -> MemoryContainer {
    MemoryContainer::new("study.1")
        .with_manufacturer(ZEISS)
        .with_pixel_data(OwnedPixelData::Encapsulated {
            offset_table: Vec::new(),
            fragments: frames,
        })
        .with_frame_count(frame_count)
        .with_identifiers(StudyIdentifiers::from_raw(
            Some("P000001"),
            Some("20240131"),
            Some("OD"),
        ))
}

/// What a [`RecordingCodec`] saw.
#[derive(Debug, Default)]
pub struct CodecLog {
    pub decoded: Vec<(PathBuf, Vec<u8>)>,
    pub transposed: usize,
    pub encoded: Vec<PathBuf>,
}

/// [`ImageCodec`] that records its calls and returns a 3×2 raster.
#[derive(Debug, Default)]
pub struct RecordingCodec {
    pub log: Mutex<CodecLog>,
    pub fail_decode: bool,
}

impl RecordingCodec {
    pub fn failing() -> Self {
        Self {
            fail_decode: true,
            ..Self::default()
        }
    }

    pub fn decoded(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.log.lock().unwrap().decoded.clone()
    }

    pub fn transposed(&self) -> usize {
        self.log.lock().unwrap().transposed
    }

    pub fn encoded(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().encoded.clone()
    }
}

impl ImageCodec for RecordingCodec {
    fn decode(&self, codestream: &Path) -> Result<DynamicImage, CzmError> {
        let bytes = std::fs::read(codestream)?;
        self.log
            .lock()
            .unwrap()
            .decoded
            .push((codestream.to_path_buf(), bytes));
        if self.fail_decode {
            return Err(CzmError::Codec("refusing to decode".to_string()));
        }
        Ok(DynamicImage::ImageLuma8(GrayImage::from_fn(3, 2, |x, y| {
            Luma([(y * 3 + x) as u8])
        })))
    }

    fn transpose(&self, raster: DynamicImage) -> DynamicImage {
        self.log.lock().unwrap().transposed += 1;
        czm_export::codec::transpose(raster)
    }

    fn encode(
        &self,
        raster: &DynamicImage,
        path: &Path,
        format: czm_export::OutputFormat,
    ) -> Result<(), CzmError> {
        self.log.lock().unwrap().encoded.push(path.to_path_buf());
        raster.save_with_format(path, format.image_format())?;
        Ok(())
    }
}
