//! Colour-mode detection and normalisation, plus EXIF orientation.
//!
//! Decoders expand palette and CMYK data on load, so the original mode is
//! read from the file header and carried alongside the decoded buffer.

use std::io::Cursor;

use image::DynamicImage;

use crate::models::ColorMode;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_COLOR_TYPE_PALETTE: u8 = 3;

/// Read EXIF tag 0x0112 (Orientation). 1 (normal) when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value. Unknown values are identity.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Header-only detection of the modes a decoder hides: PNG palette and
/// four-component (CMYK) JPEG. `None` means the decoded colour type is accurate.
pub fn sniff_color_mode(bytes: &[u8]) -> Option<ColorMode> {
    if bytes.starts_with(&PNG_SIGNATURE) {
        // signature(8) + length(4) + "IHDR"(4) + width(4) + height(4) + depth(1)
        return match (bytes.get(12..16), bytes.get(25)) {
            (Some(b"IHDR"), Some(&PNG_COLOR_TYPE_PALETTE)) => Some(ColorMode::Palette),
            _ => None,
        };
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return match jpeg_component_count(bytes) {
            Some(4) => Some(ColorMode::Cmyk),
            _ => None,
        };
    }
    None
}

/// Mode and alpha flag of a source file: header sniff first, decoded type otherwise.
pub fn detect_color_mode(bytes: &[u8], decoded: &DynamicImage) -> (ColorMode, bool) {
    let decoded_mode = ColorMode::from_color_type(decoded.color());
    let has_alpha = decoded.color().has_alpha();
    match sniff_color_mode(bytes) {
        Some(mode) => (mode, has_alpha),
        None => (decoded_mode, has_alpha),
    }
}

/// Walk JPEG marker segments up to the first SOFn and return its component count.
fn jpeg_component_count(bytes: &[u8]) -> Option<u8> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // length(2) + precision(1) + height(2) + width(2), then component count
            return bytes.get(pos + 9).copied();
        }
        if marker == 0xDA || len < 2 {
            return None;
        }
        pos += 2 + len;
    }
    None
}

/// Bring a decoded buffer to RGB8, or RGBA8 when the source carried alpha.
///
/// CMYK always becomes RGB. Palette sources become RGB, or RGBA when the
/// palette had transparency.
pub fn normalize_color(image: DynamicImage, original_mode: ColorMode, original_has_alpha: bool) -> DynamicImage {
    let want_alpha = match original_mode {
        ColorMode::Cmyk => false,
        ColorMode::Palette => original_has_alpha || image.color().has_alpha(),
        _ => original_has_alpha,
    };

    match (image, want_alpha) {
        (img @ DynamicImage::ImageRgba8(_), true) => img,
        (img @ DynamicImage::ImageRgb8(_), false) => img,
        (img, true) => DynamicImage::ImageRgba8(img.to_rgba8()),
        (img, false) => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

/// True when the buffer has the RGBA8 layout the upscaler refuses.
pub fn is_rgba(image: &DynamicImage) -> bool {
    matches!(image, DynamicImage::ImageRgba8(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, GrayImage, ImageOutputFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut buf, format).unwrap();
        buf
    }

    fn rgb(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([100, 100, 100])))
    }

    /// PNG signature and IHDR only; enough for header sniffing.
    fn png_header(color_type: u8) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&16u32.to_be_bytes());
        bytes.extend_from_slice(&16u32.to_be_bytes());
        bytes.push(8);
        bytes.push(color_type);
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes
    }

    fn jpeg_header(components: u8) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        // APP0 with a 2-byte empty payload
        bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        // SOF0: length 8 + 3 * components
        let len = 8 + 3 * components as u16;
        bytes.extend_from_slice(&[0xFF, 0xC0]);
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&[8, 0x00, 0x10, 0x00, 0x10, components]);
        for i in 0..components {
            bytes.extend_from_slice(&[i + 1, 0x11, 0]);
        }
        bytes
    }

    // ── EXIF orientation ──

    #[test]
    fn exif_no_data_returns_identity() {
        let png = encode(&rgb(10, 10), ImageOutputFormat::Png);
        assert_eq!(read_exif_orientation(&png), 1);
    }

    #[test]
    fn apply_orientation_rotations_swap_axes() {
        for (orientation, expected) in [(1, (10, 20)), (3, (10, 20)), (6, (20, 10)), (8, (20, 10)), (5, (20, 10))] {
            let result = apply_orientation(rgb(10, 20), orientation);
            assert_eq!(result.dimensions(), expected, "orientation {orientation}");
        }
    }

    #[test]
    fn apply_orientation_unknown_is_identity() {
        assert_eq!(apply_orientation(rgb(10, 20), 99).dimensions(), (10, 20));
    }

    #[test]
    fn apply_orientation_mirror_moves_pixels() {
        let mut img = RgbImage::from_pixel(4, 1, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let flipped = apply_orientation(DynamicImage::ImageRgb8(img), 2).to_rgb8();
        assert_eq!(flipped.get_pixel(3, 0), &Rgb([255, 0, 0]));
    }

    // ── Header sniffing ──

    #[test]
    fn png_palette_detected() {
        assert_eq!(sniff_color_mode(&png_header(3)), Some(ColorMode::Palette));
        assert_eq!(sniff_color_mode(&png_header(2)), None);
        assert_eq!(sniff_color_mode(&png_header(6)), None);
    }

    #[test]
    fn jpeg_cmyk_detected() {
        assert_eq!(sniff_color_mode(&jpeg_header(4)), Some(ColorMode::Cmyk));
        assert_eq!(sniff_color_mode(&jpeg_header(3)), None);
        assert_eq!(sniff_color_mode(&jpeg_header(1)), None);
    }

    #[test]
    fn real_rgb_jpeg_not_flagged() {
        let jpeg = encode(&rgb(16, 16), ImageOutputFormat::Jpeg(90));
        assert_eq!(sniff_color_mode(&jpeg), None);
    }

    #[test]
    fn truncated_or_unknown_bytes_are_none() {
        assert_eq!(sniff_color_mode(&[]), None);
        assert_eq!(sniff_color_mode(&PNG_SIGNATURE), None);
        assert_eq!(sniff_color_mode(&[0xFF, 0xD8, 0xFF]), None);
        assert_eq!(sniff_color_mode(b"GIF89a"), None);
    }

    #[test]
    fn detect_falls_back_to_decoded_type() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4])));
        let png = encode(&img, ImageOutputFormat::Png);
        assert_eq!(detect_color_mode(&png, &img), (ColorMode::Rgba, true));
    }

    // ── Normalisation ──

    #[test]
    fn cmyk_source_becomes_rgb() {
        let out = normalize_color(rgb(4, 4), ColorMode::Cmyk, false);
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn grayscale_becomes_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([7])));
        let out = normalize_color(gray, ColorMode::L, false);
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!(out.to_rgb8().get_pixel(0, 0), &Rgb([7, 7, 7]));
    }

    #[test]
    fn alpha_source_keeps_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4])));
        let out = normalize_color(img, ColorMode::Rgba, true);
        assert!(is_rgba(&out));
    }

    #[test]
    fn transparent_palette_becomes_rgba() {
        let decoded = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 0])));
        assert!(is_rgba(&normalize_color(decoded, ColorMode::Palette, true)));
        assert!(!is_rgba(&normalize_color(rgb(4, 4), ColorMode::Palette, false)));
    }

    #[test]
    fn normalization_preserves_size() {
        assert_eq!(normalize_color(rgb(7, 3), ColorMode::Rgb, false).dimensions(), (7, 3));
    }
}
