// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Image preparation for captioning requests.
//!
//! Images are decoded, shrunk so the longest edge fits [`MAX_DIMENSION`],
//! re-encoded as JPEG and base64 encoded for the request body.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

/// Longest edge sent to a backend.
pub const MAX_DIMENSION: u32 = 1536;

const JPEG_QUALITY: u8 = 90;

pub struct EncodedImage {
    pub base64: String,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// Contain within `max` on both axes, shrink-only.
pub fn compute_target(orig: (u32, u32), max: u32) -> (u32, u32) {
    let (w, h) = orig;
    if w <= max && h <= max {
        return (w, h);
    }
    if w > h {
        let scaled = (h as f64 * max as f64 / w as f64).round().max(1.0) as u32;
        (max, scaled)
    } else {
        let scaled = (w as f64 * max as f64 / h as f64).round().max(1.0) as u32;
        (scaled, max)
    }
}

pub fn decode(bytes: &[u8]) -> image::ImageResult<DynamicImage> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
}

/// Decode, downscale and encode. CPU bound; run it off the async workers.
pub fn prepare(bytes: &[u8]) -> image::ImageResult<EncodedImage> {
    let decoded = decode(bytes)?;
    let (orig_w, orig_h) = (decoded.width(), decoded.height());
    let (target_w, target_h) = compute_target((orig_w, orig_h), MAX_DIMENSION);
    let resized = if (target_w, target_h) != (orig_w, orig_h) {
        decoded.resize_exact(target_w, target_h, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = resized.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;

    Ok(EncodedImage {
        base64: base64_simd::STANDARD.encode_to_string(&jpeg),
        mime: "image/jpeg",
        width: rgb.width(),
        height: rgb.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(w, h);
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_compute_target_shrink_only() {
        assert_eq!(compute_target((800, 600), 1536), (800, 600));
        assert_eq!(compute_target((1536, 1536), 1536), (1536, 1536));
        assert_eq!(compute_target((3072, 1000), 1536), (1536, 500));
        assert_eq!(compute_target((1000, 4000), 1536), (384, 1536));
        assert_eq!(compute_target((2000, 2000), 1536), (1536, 1536));
    }

    #[test]
    fn test_compute_target_never_zero() {
        assert_eq!(compute_target((100_000, 10), 1536), (1536, 1));
    }

    #[test]
    fn test_prepare_downscales_large_image() {
        let encoded = prepare(&png_bytes(2000, 500)).unwrap();
        assert_eq!((encoded.width, encoded.height), (1536, 384));
        assert_eq!(encoded.mime, "image/jpeg");
        assert!(encoded.data_url().starts_with("data:image/jpeg;base64,"));

        let raw = base64_simd::STANDARD
            .decode_to_vec(encoded.base64.as_bytes())
            .unwrap();
        assert_eq!(&raw[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_prepare_rejects_garbage() {
        assert!(prepare(b"not an image").is_err());
    }
}
