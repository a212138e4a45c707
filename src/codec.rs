//! Decoding recovered codestreams and encoding rasters.
//!
//! The exporter hands each recovered JP2 file to an [`ImageCodec`]. The
//! default implementation, [`FfmpegCodec`], decodes through FFmpeg's
//! JPEG 2000 decoder and encodes with the `image` crate. Bit depth is kept:
//! 8-bit grayscale stays [`DynamicImage::ImageLuma8`], deeper grayscale
//! becomes [`DynamicImage::ImageLuma16`], anything else is converted to RGB8.
//!
//! FFmpeg prints its own diagnostics to stderr, independently of the `log`
//! facade. Use [`set_codec_log_level`] to tune them.

use std::path::Path;

use ffmpeg_next::{
    codec::context::Context as CodecContext,
    format::Pixel,
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};

use crate::{configuration::OutputFormat, error::CzmError};

/// Decodes recovered codestreams and writes the final rasters.
///
/// Implementations must be [`Send`] and [`Sync`] because frames may be
/// exported from rayon worker threads.
pub trait ImageCodec: Send + Sync {
    /// Decode the JPEG 2000 file at `codestream`.
    fn decode(&self, codestream: &Path) -> Result<DynamicImage, CzmError>;

    /// Swap the raster axes.
    ///
    /// Multi-frame datasets store their frames column-major, so the pipeline
    /// transposes them before encoding. Single frames are left as decoded.
    fn transpose(&self, raster: DynamicImage) -> DynamicImage {
        transpose(raster)
    }

    /// Encode `raster` to `path` in `format`.
    fn encode(
        &self,
        raster: &DynamicImage,
        path: &Path,
        format: OutputFormat,
    ) -> Result<(), CzmError> {
        raster.save_with_format(path, format.image_format())?;
        Ok(())
    }
}

/// Swap rows and columns: pixel `(x, y)` moves to `(y, x)`.
pub fn transpose(raster: DynamicImage) -> DynamicImage {
    raster.rotate90().fliph()
}

/// [`ImageCodec`] backed by FFmpeg's JPEG 2000 decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegCodec;

impl FfmpegCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for FfmpegCodec {
    fn decode(&self, codestream: &Path) -> Result<DynamicImage, CzmError> {
        log::debug!("Decoding codestream: {}", codestream.display());

        ffmpeg_next::init()
            .map_err(|error| CzmError::Codec(format!("FFmpeg initialisation failed: {error}")))?;

        let mut input_context = ffmpeg_next::format::input(codestream).map_err(|error| {
            CzmError::Codec(format!("failed to open {}: {error}", codestream.display()))
        })?;

        let (stream_index, codec_parameters) = {
            let stream = input_context.streams().best(Type::Video).ok_or_else(|| {
                CzmError::Codec(format!("{} holds no picture", codestream.display()))
            })?;
            (stream.index(), stream.parameters())
        };
        let decoder_context = CodecContext::from_parameters(codec_parameters)?;
        let mut decoder = decoder_context.decoder().video()?;

        let mut decoded_frame = VideoFrame::empty();
        for (stream, packet) in input_context.packets() {
            if stream.index() != stream_index {
                continue;
            }
            decoder.send_packet(&packet)?;
            if decoder.receive_frame(&mut decoded_frame).is_ok() {
                return convert_frame_to_image(&decoded_frame);
            }
        }

        decoder.send_eof()?;
        if decoder.receive_frame(&mut decoded_frame).is_ok() {
            return convert_frame_to_image(&decoded_frame);
        }

        Err(CzmError::Codec(format!(
            "no picture could be decoded from {}",
            codestream.display()
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RasterKind {
    Gray8,
    Gray16,
    Rgb8,
}

impl RasterKind {
    fn for_source(format: Pixel) -> Self {
        match format {
            Pixel::GRAY8 => RasterKind::Gray8,
            Pixel::GRAY16LE
            | Pixel::GRAY16BE
            | Pixel::GRAY12LE
            | Pixel::GRAY12BE
            | Pixel::GRAY10LE
            | Pixel::GRAY10BE => RasterKind::Gray16,
            _ => RasterKind::Rgb8,
        }
    }

    fn pixel(self) -> Pixel {
        match self {
            RasterKind::Gray8 => Pixel::GRAY8,
            RasterKind::Gray16 => Pixel::GRAY16LE,
            RasterKind::Rgb8 => Pixel::RGB24,
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            RasterKind::Gray8 => 1,
            RasterKind::Gray16 => 2,
            RasterKind::Rgb8 => 3,
        }
    }
}

/// Convert a decoded frame to an [`image::DynamicImage`], converting the
/// pixel format only when FFmpeg's output is not already the target.
fn convert_frame_to_image(decoded_frame: &VideoFrame) -> Result<DynamicImage, CzmError> {
    let width = decoded_frame.width();
    let height = decoded_frame.height();
    let kind = RasterKind::for_source(decoded_frame.format());

    let converted;
    let frame = if decoded_frame.format() == kind.pixel() {
        decoded_frame
    } else {
        let mut scaler = ScalingContext::get(
            decoded_frame.format(),
            width,
            height,
            kind.pixel(),
            width,
            height,
            ScalingFlags::POINT,
        )?;
        let mut target = VideoFrame::empty();
        scaler.run(decoded_frame, &mut target)?;
        converted = target;
        &converted
    };

    let buffer = frame_to_buffer(frame, width, height, kind.bytes_per_pixel());
    let malformed = || CzmError::Codec(format!("decoded {width}x{height} frame has a short plane"));

    let image = match kind {
        RasterKind::Gray8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, buffer).ok_or_else(malformed)?)
        }
        RasterKind::Gray16 => {
            let samples = buffer
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let gray: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(width, height, samples).ok_or_else(malformed)?;
            DynamicImage::ImageLuma16(gray)
        }
        RasterKind::Rgb8 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, buffer).ok_or_else(malformed)?)
        }
    };
    Ok(image)
}

/// Copy the first plane of a frame into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × bytes
/// per pixel); the padding is dropped.
fn frame_to_buffer(frame: &VideoFrame, width: u32, height: u32, bytes_per_pixel: usize) -> Vec<u8> {
    let stride = frame.stride(0);
    let row_length = (width as usize) * bytes_per_pixel;
    let data = frame.data(0);

    if stride == row_length {
        data[..row_length * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_length * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_length]);
        }
        buffer
    }
}

/// Verbosity of FFmpeg's own stderr output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecLogLevel {
    /// Print nothing.
    Quiet,
    /// Unrecoverable and recoverable errors.
    Error,
    /// Errors and warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl CodecLogLevel {
    /// Parse a level name such as `quiet` or `warn`.
    pub fn from_name(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" | "off" => Some(CodecLogLevel::Quiet),
            "error" => Some(CodecLogLevel::Error),
            "warning" | "warn" => Some(CodecLogLevel::Warning),
            "info" => Some(CodecLogLevel::Info),
            "debug" => Some(CodecLogLevel::Debug),
            _ => None,
        }
    }

    fn to_ffmpeg_level(self) -> Level {
        match self {
            CodecLogLevel::Quiet => Level::Quiet,
            CodecLogLevel::Error => Level::Error,
            CodecLogLevel::Warning => Level::Warning,
            CodecLogLevel::Info => Level::Info,
            CodecLogLevel::Debug => Level::Debug,
        }
    }
}

/// Set FFmpeg's internal log verbosity.
///
/// This does **not** affect messages emitted through the `log` crate.
pub fn set_codec_log_level(level: CodecLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_swaps_axes() {
        let raster = GrayImage::from_fn(3, 2, |x, y| Luma([(y * 3 + x) as u8]));
        let transposed = transpose(DynamicImage::ImageLuma8(raster.clone())).into_luma8();
        assert_eq!(transposed.dimensions(), (2, 3));
        for (x, y, pixel) in raster.enumerate_pixels() {
            assert_eq!(transposed.get_pixel(y, x), pixel);
        }
    }

    #[test]
    fn log_level_names() {
        assert_eq!(CodecLogLevel::from_name("WARN"), Some(CodecLogLevel::Warning));
        assert_eq!(CodecLogLevel::from_name("off"), Some(CodecLogLevel::Quiet));
        assert_eq!(CodecLogLevel::from_name("trace"), None);
    }

    #[test]
    fn gray_sources_keep_their_depth() {
        assert_eq!(RasterKind::for_source(Pixel::GRAY8), RasterKind::Gray8);
        assert_eq!(RasterKind::for_source(Pixel::GRAY12LE), RasterKind::Gray16);
        assert_eq!(RasterKind::for_source(Pixel::YUV420P), RasterKind::Rgb8);
    }
}
