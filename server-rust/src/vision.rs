//! Small image toolbox shared by the detectors.
//!
//! Everything operates on `image::RgbImage`; the whole pipeline speaks RGB.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use aoi_types::RoiRect;

/// JPEG quality for every artifact the pipeline writes.
pub const JPEG_QUALITY: u8 = 95;

// ── Basic ops ─────────────────────────────────────────────────────────────────

/// Crop a frame to an ROI rectangle, clamped to the frame bounds.
/// Returns `None` when the clamped rectangle is empty.
pub fn crop(frame: &RgbImage, rect: RoiRect) -> Option<RgbImage> {
    let (fw, fh) = frame.dimensions();
    let x1 = rect.x1.clamp(0, i64::from(fw)) as u32;
    let y1 = rect.y1.clamp(0, i64::from(fh)) as u32;
    let x2 = rect.x2.clamp(0, i64::from(fw)) as u32;
    let y2 = rect.y2.clamp(0, i64::from(fh)) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Rotate by a multiple of 90 degrees, expanding the canvas (a 90/270
/// rotation swaps width and height; nothing is cropped).
pub fn rotate(img: &RgbImage, rotation: i64) -> RgbImage {
    match rotation.rem_euclid(360) {
        90 => imageops::rotate90(img),
        180 => imageops::rotate180(img),
        270 => imageops::rotate270(img),
        _ => img.clone(),
    }
}

pub fn resize_to(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(img, width, height, imageops::FilterType::Triangle)
}

/// Mean RGB of the whole image.
pub fn mean_rgb(img: &RgbImage) -> [u8; 3] {
    let count = (img.width() as u64 * img.height() as u64).max(1);
    let mut sums = [0u64; 3];
    for px in img.pixels() {
        sums[0] += u64::from(px.0[0]);
        sums[1] += u64::from(px.0[1]);
        sums[2] += u64::from(px.0[2]);
    }
    [
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ]
}

/// Percentage (0..=100) of pixels with every channel inside the inclusive
/// `[lower, upper]` box.
pub fn in_range_percentage(img: &RgbImage, lower: [u8; 3], upper: [u8; 3]) -> f64 {
    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let matching = img
        .pixels()
        .filter(|px| {
            (0..3).all(|c| px.0[c] >= lower[c] && px.0[c] <= upper[c])
        })
        .count() as u64;
    matching as f64 / total as f64 * 100.0
}

// ── Denoise ───────────────────────────────────────────────────────────────────

const NLM_TEMPLATE_RADIUS: i64 = 3; // 7x7 patch
const NLM_SEARCH_RADIUS: i64 = 10; // 21x21 window

/// Non-local-means denoise over a 7x7 patch / 21x21 search window.
/// `strength` is the filter parameter h; the compare path uses 10, the
/// color path uses a gentler 5.
pub fn denoise(img: &RgbImage, strength: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let (wi, hi) = (w as i64, h as i64);
    let h2 = (strength * strength).max(1e-6);
    let mut out = RgbImage::new(w, h);

    let pixel_at = |x: i64, y: i64| -> [u8; 3] {
        // Edge handling by clamping keeps patches full-size.
        let cx = x.clamp(0, wi - 1) as u32;
        let cy = y.clamp(0, hi - 1) as u32;
        img.get_pixel(cx, cy).0
    };

    let patch_distance = |x0: i64, y0: i64, x1: i64, y1: i64| -> f32 {
        let mut dist = 0f32;
        for dy in -NLM_TEMPLATE_RADIUS..=NLM_TEMPLATE_RADIUS {
            for dx in -NLM_TEMPLATE_RADIUS..=NLM_TEMPLATE_RADIUS {
                let a = pixel_at(x0 + dx, y0 + dy);
                let b = pixel_at(x1 + dx, y1 + dy);
                for c in 0..3 {
                    let d = f32::from(a[c]) - f32::from(b[c]);
                    dist += d * d;
                }
            }
        }
        let n = ((2 * NLM_TEMPLATE_RADIUS + 1) * (2 * NLM_TEMPLATE_RADIUS + 1) * 3) as f32;
        dist / n
    };

    for y in 0..hi {
        for x in 0..wi {
            let mut weight_sum = 0f32;
            let mut acc = [0f32; 3];
            for sy in -NLM_SEARCH_RADIUS..=NLM_SEARCH_RADIUS {
                for sx in -NLM_SEARCH_RADIUS..=NLM_SEARCH_RADIUS {
                    let (nx, ny) = (x + sx, y + sy);
                    if nx < 0 || ny < 0 || nx >= wi || ny >= hi {
                        continue;
                    }
                    let weight = (-patch_distance(x, y, nx, ny) / h2).exp();
                    let px = pixel_at(nx, ny);
                    weight_sum += weight;
                    for c in 0..3 {
                        acc[c] += weight * f32::from(px[c]);
                    }
                }
            }
            let px = out.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                px.0[c] = (acc[c] / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

// ── Similarity ────────────────────────────────────────────────────────────────

/// Cosine similarity of two feature vectors. Degenerate inputs (empty,
/// mismatched length, zero norm) score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}

// ── Codec helpers ─────────────────────────────────────────────────────────────

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf.into_inner())
}

pub fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}

pub fn save_jpeg(path: &Path, img: &RgbImage) -> Result<(), image::ImageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
    }
    let mut file = std::fs::File::create(path).map_err(image::ImageError::IoError)?;
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut file, JPEG_QUALITY))
}
