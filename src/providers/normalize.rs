//! Re-encoding of provider output.
//!
//! Whatever a provider returns (PNG with alpha, WebP, an oversized JPEG)
//! leaves here as a square RGB JPEG no larger than the configured limits.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, RgbImage};

use crate::{ImageConfig, PlatingError, Result};

/// Quality is never lowered below this while shrinking output.
const MIN_QUALITY: u8 = 40;
const QUALITY_STEP: u8 = 10;

/// Below this side length we stop halving and give up.
const MIN_SIDE: u32 = 64;

/// Output bounds for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Longest allowed side in pixels.
    pub max_side: u32,
    /// Initial JPEG quality (1-100).
    pub quality: u8,
    pub max_bytes: u64,
}

impl NormalizeOptions {
    pub fn new(max_side: u32, config: &ImageConfig) -> Self {
        Self {
            max_side,
            quality: config.image_quality,
            max_bytes: config.max_image_bytes(),
        }
    }
}

/// Decode, square, bound and re-encode an image.
///
/// Fails when the payload is not a decodable image or cannot be brought
/// under `max_bytes`.
pub fn normalize(bytes: &[u8], options: &NormalizeOptions) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let mut rgb = center_square(&flatten(decoded));
    if rgb.width() == 0 {
        return Err(PlatingError::Image("image has no pixels".to_string()));
    }

    let side = rgb.width().min(options.max_side.max(1));
    if side < rgb.width() {
        rgb = imageops::resize(&rgb, side, side, FilterType::Lanczos3);
    }

    let mut quality = options.quality.clamp(1, 100);
    loop {
        let encoded = encode_jpeg(&rgb, quality)?;
        if encoded.len() as u64 <= options.max_bytes {
            return Ok(encoded);
        }
        if quality > MIN_QUALITY {
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            continue;
        }
        let half = rgb.width() / 2;
        if half < MIN_SIDE {
            return Err(PlatingError::Image(format!(
                "cannot fit image under {} bytes",
                options.max_bytes
            )));
        }
        rgb = imageops::resize(&rgb, half, half, FilterType::Lanczos3);
    }
}

/// [`normalize`] on the blocking pool; decoding and encoding are CPU-bound.
pub async fn normalize_blocking(bytes: Vec<u8>, options: NormalizeOptions) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || normalize(&bytes, &options))
        .await
        .map_err(|e| PlatingError::Image(format!("normalization task failed: {e}")))?
}

/// Composite any transparency onto white.
fn flatten(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }
    let rgba = image.into_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| {
            let a = u16::from(a);
            ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn center_square(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let side = w.min(h);
    imageops::crop_imm(image, (w - side) / 2, (h - side) / 2, side, side).to_image()
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(out.into_inner())
}
