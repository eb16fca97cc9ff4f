//! Letterbox / uniform border detection.
//!
//! The image is compared against a synthetic background in its own complementary
//! colour, so a uniform frame of any colour turns into a flat field while the
//! content keeps texture. Adaptive thresholding + Canny then trace where the
//! content starts, and the bounding box of the outer contours becomes the crop.
//!
//! Heuristic by nature: anything degenerate (uniform image, no contours, a box
//! that collapses under the margin, a panic inside imageproc) yields
//! `CropDecision::NoCrop` and the caller keeps the full frame.

use std::panic::{self, AssertUnwindSafe};

use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use serde::Serialize;
use tracing::{debug, warn};

use super::{panic_message, ProcessingError};
use crate::config::CROP_MARGIN_PX;

/// Images smaller than this on either side are not analysed.
const MIN_ANALYSIS_DIMENSION: u32 = 16;

/// Noise-suppression blur, roughly a 5x5 Gaussian kernel.
const DENOISE_SIGMA: f32 = 1.1;

/// Adaptive threshold block never drops below this (pixels, odd).
const MIN_BLOCK_SIZE: u32 = 11;

/// Canny low threshold as a fraction of the high one.
const CANNY_LOW_RATIO: f32 = 0.3;

/// Crop rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// True when the rectangle lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width >= 1
            && self.height >= 1
            && self.x.saturating_add(self.width) <= width
            && self.y.saturating_add(self.height) <= height
    }
}

/// Why the detector declined to crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoCropReason {
    /// Image too small to analyse.
    TooSmall,
    /// Edge map produced no outer contours (uniform image).
    NoContours,
    /// Contours existed but enclosed no pixels.
    EmptyMask,
    /// The content box vanished once the margin was removed.
    MarginCollapsed,
    /// The analysis itself failed; the original frame is kept.
    Failed(String),
}

/// Outcome of border detection. `NoCrop` is the fail-open branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CropDecision {
    Crop(CropRect),
    NoCrop(NoCropReason),
}

impl CropDecision {
    pub fn rect(&self) -> Option<CropRect> {
        match self {
            Self::Crop(rect) => Some(*rect),
            Self::NoCrop(_) => None,
        }
    }
}

/// Complementary-colour letterbox detector.
///
/// Plain value type: construct one per pipeline, no shared state.
#[derive(Debug, Clone)]
pub struct BorderDetector {
    margin: u32,
}

impl Default for BorderDetector {
    fn default() -> Self {
        Self {
            margin: CROP_MARGIN_PX,
        }
    }
}

impl BorderDetector {
    pub fn with_margin(margin: u32) -> Self {
        Self { margin }
    }

    /// Crop rectangle, or `None` when the image should be kept whole.
    pub fn detect_crop(&self, image: &DynamicImage) -> Option<CropRect> {
        self.decide(image).rect()
    }

    /// Full decision including the reason for not cropping.
    pub fn decide(&self, image: &DynamicImage) -> CropDecision {
        let rgb = image.to_rgb8();
        let analysis = panic::catch_unwind(AssertUnwindSafe(|| self.analyze(&rgb)));

        let result = match analysis {
            Ok(result) => result,
            Err(payload) => Err(ProcessingError::CropDetection(panic_message(payload.as_ref()))),
        };

        match result {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Border detection failed, keeping original frame");
                CropDecision::NoCrop(NoCropReason::Failed(e.to_string()))
            }
        }
    }

    /// Apply the decision: returns the cropped image (or the input untouched).
    pub fn crop(&self, image: DynamicImage) -> (DynamicImage, CropDecision) {
        let decision = self.decide(&image);
        match decision {
            CropDecision::Crop(rect) => {
                let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
                (cropped, decision)
            }
            CropDecision::NoCrop(_) => (image, decision),
        }
    }

    fn analyze(&self, rgb: &RgbImage) -> Result<CropDecision, ProcessingError> {
        let (w, h) = rgb.dimensions();
        if w < MIN_ANALYSIS_DIMENSION || h < MIN_ANALYSIS_DIMENSION {
            return Ok(CropDecision::NoCrop(NoCropReason::TooSmall));
        }

        let complement = complementary_color(rgb);
        let diff = difference_from_background(rgb, complement);
        let blurred = gaussian_blur_f32(&diff, DENOISE_SIGMA);

        let brightness = mean_intensity(&blurred);
        if !brightness.is_finite() {
            return Err(ProcessingError::CropDetection(format!(
                "non-finite mean brightness on {w}x{h} image"
            )));
        }
        let block_size = adaptive_block_size(w, h);
        let c = adaptive_offset(brightness);
        let binary = adaptive_gaussian_threshold(&blurred, block_size, c);

        // Otsu on a two-level image lands on the low level; floor at 1 so a
        // flat field never counts as an edge.
        let high = (otsu_level(&binary) as f32).max(1.0);
        let edges = canny(&binary, high * CANNY_LOW_RATIO, high);

        let contours = find_contours::<i32>(&edges);
        let outer: Vec<_> = contours
            .iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer))
            .collect();

        debug!(
            size = format!("{w}x{h}"),
            complement = ?complement,
            block_size,
            c,
            otsu = high,
            contours = outer.len(),
            "Border analysis"
        );

        if outer.is_empty() {
            return Ok(CropDecision::NoCrop(NoCropReason::NoContours));
        }

        // Filling every outer contour and boxing the filled mask gives the same
        // box as boxing the contour points themselves.
        let bbox = outer
            .iter()
            .flat_map(|c| c.points.iter())
            .filter(|p| p.x >= 0 && p.y >= 0 && (p.x as u32) < w && (p.y as u32) < h)
            .fold(None, |acc: Option<(u32, u32, u32, u32)>, p| {
                let (x, y) = (p.x as u32, p.y as u32);
                Some(match acc {
                    None => (x, y, x, y),
                    Some((min_x, min_y, max_x, max_y)) => {
                        (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                    }
                })
            });

        let Some((min_x, min_y, max_x, max_y)) = bbox else {
            return Ok(CropDecision::NoCrop(NoCropReason::EmptyMask));
        };

        Ok(match shrink_box(min_x, min_y, max_x, max_y, self.margin, w, h) {
            Some(rect) => CropDecision::Crop(rect),
            None => CropDecision::NoCrop(NoCropReason::MarginCollapsed),
        })
    }
}

/// Per-channel `255 - mean(channel)`.
pub fn complementary_color(rgb: &RgbImage) -> [u8; 3] {
    let count = (rgb.width() as u64 * rgb.height() as u64).max(1);
    let mut sums = [0u64; 3];
    for p in rgb.pixels() {
        for (sum, &v) in sums.iter_mut().zip(p.0.iter()) {
            *sum += v as u64;
        }
    }
    let mut out = [0u8; 3];
    for (o, sum) in out.iter_mut().zip(sums) {
        let mean = (sum as f64 / count as f64).round() as u8;
        *o = 255 - mean;
    }
    out
}

/// Grayscale of `|pixel - background|` against a uniform background colour.
pub fn difference_from_background(rgb: &RgbImage, background: [u8; 3]) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y).0;
        let d = |i: usize| (p[i] as i16 - background[i] as i16).unsigned_abs() as f32;
        let luma = 0.299 * d(0) + 0.587 * d(1) + 0.114 * d(2);
        Luma([luma.round().min(255.0) as u8])
    })
}

/// `max(11, min(w, h) / 50)`, bumped to the next odd number.
pub fn adaptive_block_size(width: u32, height: u32) -> u32 {
    let block = MIN_BLOCK_SIZE.max(width.min(height) / 50);
    if block % 2 == 0 {
        block + 1
    } else {
        block
    }
}

/// `max(2, mean_brightness / 32)`.
pub fn adaptive_offset(mean_brightness: f32) -> f32 {
    (mean_brightness / 32.0).max(2.0)
}

/// Binary threshold against a Gaussian-weighted local mean minus `c`.
///
/// Sigma follows the usual kernel-size relation `0.3 * ((k - 1) / 2 - 1) + 0.8`.
pub fn adaptive_gaussian_threshold(gray: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(gray, sigma.max(0.1));
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let src = gray.get_pixel(x, y).0[0] as f32;
        let threshold = local_mean.get_pixel(x, y).0[0] as f32 - c;
        if src > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn mean_intensity(gray: &GrayImage) -> f32 {
    let count = gray.width() as u64 * gray.height() as u64;
    if count == 0 {
        return f32::NAN;
    }
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    (sum as f64 / count as f64) as f32
}

/// Pull an inclusive box in by `margin` on every side, clamped to the image.
fn shrink_box(
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    margin: u32,
    width: u32,
    height: u32,
) -> Option<CropRect> {
    let x0 = min_x.saturating_add(margin);
    let y0 = min_y.saturating_add(margin);
    let x1 = max_x.saturating_sub(margin).min(width.saturating_sub(1));
    let y1 = max_y.saturating_sub(margin).min(height.saturating_sub(1));
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some(CropRect {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Black frame of `border` px around a striped colour block.
    fn letterboxed(width: u32, height: u32, border: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let inside = x >= border && x < width - border && y >= border && y < height - border;
            if !inside {
                Rgb([0, 0, 0])
            } else if (x / 10) % 2 == 0 {
                Rgb([210, 180, 150])
            } else {
                Rgb([70, 110, 160])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Deterministic noise so failures reproduce.
    fn noise(width: u32, height: u32, seed: u32) -> DynamicImage {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        let img = RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            Rgb([b[0], b[1], b[2]])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn uniform_image_is_not_cropped() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 90, Rgb([40, 40, 40])));
        let decision = BorderDetector::default().decide(&img);
        assert_eq!(decision, CropDecision::NoCrop(NoCropReason::NoContours));
        assert!(BorderDetector::default().detect_crop(&img).is_none());
    }

    #[test]
    fn uniform_white_image_is_not_cropped() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])));
        assert!(BorderDetector::default().detect_crop(&img).is_none());
    }

    #[test]
    fn tiny_image_is_not_analysed() {
        let img = noise(8, 8, 3);
        assert_eq!(
            BorderDetector::default().decide(&img),
            CropDecision::NoCrop(NoCropReason::TooSmall)
        );
    }

    #[test]
    fn black_letterbox_is_removed() {
        let img = letterboxed(200, 160, 30);
        let rect = BorderDetector::default()
            .detect_crop(&img)
            .expect("letterbox should be detected");

        assert!(rect.fits_within(200, 160));
        assert!(rect.x >= 20 && rect.y >= 20, "crop starts inside the frame: {rect:?}");
        assert!(rect.x + rect.width <= 180, "crop ends inside the frame: {rect:?}");
        assert!(rect.y + rect.height <= 140, "crop ends inside the frame: {rect:?}");
        assert!(rect.width >= 100 && rect.height >= 60, "content kept: {rect:?}");
    }

    #[test]
    fn crop_returns_smaller_image() {
        let img = letterboxed(200, 160, 30);
        let (cropped, decision) = BorderDetector::default().crop(img);
        let rect = decision.rect().unwrap();
        assert_eq!(cropped.dimensions(), (rect.width, rect.height));
        assert!(cropped.width() < 200);
    }

    #[test]
    fn no_crop_keeps_image_untouched() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([9, 9, 9])));
        let (out, decision) = BorderDetector::default().crop(img);
        assert!(decision.rect().is_none());
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn crop_always_within_bounds() {
        let detector = BorderDetector::default();
        for (i, (w, h)) in [(16, 16), (17, 40), (64, 33), (100, 100), (150, 61)]
            .into_iter()
            .enumerate()
        {
            let img = noise(w, h, i as u32 + 1);
            if let Some(rect) = detector.detect_crop(&img) {
                assert!(rect.fits_within(w, h), "{rect:?} escapes {w}x{h}");
            }
        }
    }

    #[test]
    fn large_margin_collapses_box() {
        let img = letterboxed(64, 64, 20);
        let decision = BorderDetector::with_margin(40).decide(&img);
        assert_eq!(decision, CropDecision::NoCrop(NoCropReason::MarginCollapsed));
    }

    #[test]
    fn block_size_is_odd_and_at_least_eleven() {
        assert_eq!(adaptive_block_size(100, 100), 11);
        assert_eq!(adaptive_block_size(600, 1200), 13);
        assert_eq!(adaptive_block_size(1000, 2000), 21);
        assert_eq!(adaptive_block_size(1100, 1100), 23);
        for dims in [(1, 1), (551, 900), (4000, 3000)] {
            let b = adaptive_block_size(dims.0, dims.1);
            assert!(b >= 11 && b % 2 == 1);
        }
    }

    #[test]
    fn adaptive_offset_has_floor_of_two() {
        assert_eq!(adaptive_offset(0.0), 2.0);
        assert_eq!(adaptive_offset(32.0), 2.0);
        assert_eq!(adaptive_offset(128.0), 4.0);
    }

    #[test]
    fn complement_of_uniform_color() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([0, 100, 255]));
        assert_eq!(complementary_color(&rgb), [255, 155, 0]);
    }

    #[test]
    fn difference_against_own_color_is_black() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([12, 34, 56]));
        let diff = difference_from_background(&rgb, [12, 34, 56]);
        assert!(diff.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn shrink_box_clamps_and_collapses() {
        let rect = shrink_box(10, 10, 89, 49, 5, 100, 60).unwrap();
        assert_eq!(rect, CropRect { x: 15, y: 15, width: 70, height: 30 });
        assert!(shrink_box(10, 10, 18, 18, 5, 100, 100).is_none());
    }
}
