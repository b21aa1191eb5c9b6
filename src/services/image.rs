// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persona image validation and compression.
//!
//! Admin uploads are bounded before they reach the blob store:
//! - Validation: JPEG/PNG/WebP only, at most 5 MiB
//! - Compression: longer side capped at 1024 px (aspect ratio kept),
//!   Lanczos3 resampling, re-encoded as JPEG at quality 80
//!
//! The output is always `image/jpeg`, whatever the input format.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use std::io::Cursor;

/// Longest side of a compressed image, in pixels.
pub const MAX_DIMENSION: u32 = 1024;
/// JPEG quality factor (0-100).
pub const JPEG_QUALITY: u8 = 80;
/// Upload size ceiling in bytes.
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
/// Media types accepted by the upload picker.
pub const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];
/// Media type of every compressed image.
pub const OUTPUT_MEDIA_TYPE: &str = "image/jpeg";

/// An uploaded file as received: declared media type plus raw bytes.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Media type without parameters, lower-cased.
    fn essence(&self) -> String {
        self.media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

/// Re-encoded image ready for upload.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub media_type: &'static str,
}

/// Upload rejected before compression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Only image files are allowed (JPEG, PNG, or WebP)")]
    UnsupportedType(String),

    #[error("File size must be less than 5MB")]
    TooLarge(usize),

    #[error("File is empty")]
    Empty,
}

/// Compression failure. Neither variant is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompressionError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Check the declared type and size of an upload.
///
/// Type is checked first, so a large PDF reports the type problem.
pub fn validate_image_file(file: &ImageFile) -> Result<(), ValidationError> {
    let media_type = file.essence();
    if !ALLOWED_TYPES.contains(&media_type.as_str()) {
        return Err(ValidationError::UnsupportedType(media_type));
    }
    if file.size() == 0 {
        return Err(ValidationError::Empty);
    }
    if file.size() > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge(file.size()));
    }
    Ok(())
}

/// Dimensions after capping the longer side at [`MAX_DIMENSION`].
///
/// Images already within bounds are never upscaled. The shorter side is
/// rounded to the nearest pixel (halves round up) and is at least 1.
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return (width, height);
    }

    let scale_side = |short: u32, long: u32| -> u32 {
        let (short, long, max) = (short as u64, long as u64, MAX_DIMENSION as u64);
        let rounded = (2 * max * short + long) / (2 * long);
        rounded.max(1) as u32
    };

    if width > height {
        (MAX_DIMENSION, scale_side(height, width))
    } else {
        (scale_side(width, height), MAX_DIMENSION)
    }
}

/// Decode, downscale and re-encode an image as JPEG.
///
/// Callers are expected to have run [`validate_image_file`] first. This is
/// CPU-bound; async callers should use `spawn_blocking`.
pub fn compress_image(file: &ImageFile) -> Result<CompressedImage, CompressionError> {
    let source = decode_source(&file.bytes)?;

    let (width, height) = (source.width(), source.height());
    let (target_width, target_height) = target_dimensions(width, height);

    let resized = if (target_width, target_height) == (width, height) {
        source
    } else {
        source.resize_exact(target_width, target_height, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel.
    let rgb = resized.into_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .write_image(
            rgb.as_raw(),
            target_width,
            target_height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| CompressionError::Encode(e.to_string()))?;

    tracing::debug!(
        source_type = %file.media_type,
        source_bytes = file.size(),
        width,
        height,
        target_width,
        target_height,
        compressed_bytes = bytes.len(),
        "Image compressed"
    );

    Ok(CompressedImage {
        bytes,
        width: target_width,
        height: target_height,
        media_type: OUTPUT_MEDIA_TYPE,
    })
}

/// Decode the source bytes into a bitmap.
///
/// The reader borrows `bytes` and is dropped before this returns, on the
/// success path and on every error path.
fn decode_source(bytes: &[u8]) -> Result<DynamicImage, CompressionError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CompressionError::Decode(e.to_string()))?;

    if reader.format().is_none() {
        return Err(CompressionError::Decode(
            "unrecognized image format".to_string(),
        ));
    }

    reader
        .decode()
        .map_err(|e| CompressionError::Decode(e.to_string()))
}

/// Human-readable byte count ("0 Bytes", "1.5 KB", "5 MB").
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{scaled:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
