//! Thumbnail codec.
//!
//! Three routines back the CPU-bound pipeline stages:
//!
//! - **Downsample**: decode the original bytes (format sniffed from the
//!   content), apply the EXIF orientation, and shrink so the longest edge
//!   fits the requested pixel size. Smaller images are never upscaled.
//! - **Encode**: compress the downsampled bitmap as JPEG when it has no
//!   alpha channel, PNG otherwise.
//! - **Decompress**: decode encoded thumbnail bytes back into a displayable
//!   bitmap.
//!
//! All routines are synchronous; the pipeline runs them on the blocking
//! thread pool.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};

use crate::error::CodecError;
use crate::request::Thumbnail;

/// Default compression quality ratio (0.0-1.0).
pub const DEFAULT_COMPRESSION_QUALITY: f32 = 0.8;

/// Minimum JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Codec
// =============================================================================

/// Downsamples, encodes and decompresses thumbnails.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailCodec {
    compression_quality: f32,
}

impl Default for ThumbnailCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_QUALITY)
    }
}

impl ThumbnailCodec {
    /// Create a codec encoding JPEGs at `compression_quality` (0.0-1.0).
    pub fn new(compression_quality: f32) -> Self {
        Self {
            compression_quality,
        }
    }

    /// The configured compression quality ratio.
    pub fn compression_quality(&self) -> f32 {
        self.compression_quality
    }

    /// Decode `source` and scale it so its longest edge is at most
    /// `max_pixel_size`, preserving aspect ratio and orientation.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is empty, its format is unknown, or it
    /// fails to decode.
    pub fn downsample(
        &self,
        source: &[u8],
        max_pixel_size: u32,
    ) -> Result<DynamicImage, CodecError> {
        if source.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(decode_error)?;
        let mut decoder = reader.into_decoder().map_err(decode_error)?;
        let orientation = decoder
            .orientation()
            .unwrap_or(Orientation::NoTransforms);

        let mut img = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        img.apply_orientation(orientation);

        let max_pixel_size = max_pixel_size.max(1);
        if img.width().max(img.height()) > max_pixel_size {
            img = img.resize(max_pixel_size, max_pixel_size, FilterType::Triangle);
        }

        Ok(img)
    }

    /// Encode a bitmap: JPEG at the configured quality when opaque, PNG
    /// when it carries alpha.
    pub fn encode(&self, img: &DynamicImage) -> Result<Bytes, CodecError> {
        let mut output = Vec::new();

        if img.color().has_alpha() {
            let img: Cow<'_, DynamicImage> = match img {
                DynamicImage::ImageLumaA8(_)
                | DynamicImage::ImageRgba8(_)
                | DynamicImage::ImageLumaA16(_)
                | DynamicImage::ImageRgba16(_) => Cow::Borrowed(img),
                _ => Cow::Owned(DynamicImage::ImageRgba8(img.to_rgba8())),
            };
            img.write_with_encoder(PngEncoder::new(&mut output))
                .map_err(encode_error)?;
        } else {
            let img: Cow<'_, DynamicImage> = match img {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(img),
                DynamicImage::ImageLuma16(_) => Cow::Owned(DynamicImage::ImageLuma8(img.to_luma8())),
                _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
            };
            let quality = jpeg_quality_for(self.compression_quality);
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut output, quality))
                .map_err(encode_error)?;
        }

        Ok(Bytes::from(output))
    }

    /// Decode encoded thumbnail bytes for display.
    pub fn decompress(&self, data: &[u8]) -> Result<Thumbnail, CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let img = image::load_from_memory(data).map_err(decode_error)?;
        Ok(Arc::new(img))
    }

    /// Get image dimensions without fully decoding.
    ///
    /// Returns `(width, height)` in pixels.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), CodecError> {
        ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(decode_error)?
            .into_dimensions()
            .map_err(decode_error)
    }
}

fn decode_error(e: impl ToString) -> CodecError {
    CodecError::Decode {
        message: e.to_string(),
    }
}

fn encode_error(e: impl ToString) -> CodecError {
    CodecError::Encode {
        message: e.to_string(),
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Map a compression quality ratio (0.0-1.0) to a JPEG quality (1-100).
///
/// Out-of-range and NaN ratios are clamped.
#[inline]
pub fn jpeg_quality_for(ratio: f32) -> u8 {
    let quality = (ratio * 100.0).round();
    if quality.is_nan() {
        return MIN_JPEG_QUALITY;
    }
    (quality.clamp(MIN_JPEG_QUALITY as f32, MAX_JPEG_QUALITY as f32)) as u8
}

/// Check that a compression quality ratio is within 0.0-1.0.
#[inline]
pub fn is_valid_compression_quality(ratio: f32) -> bool {
    (0.0..=1.0).contains(&ratio)
}

// =============================================================================
// Tests
// =============================================================================
