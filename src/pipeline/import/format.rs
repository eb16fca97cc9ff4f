use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Raster formats the store accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    WebP,
}

impl ImageKind {
    /// Canonical lowercase extension used for stored files.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        }
    }

    /// Map a file extension (any case) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }
}

/// Detect an image format from magic bytes (NOT file extensions).
pub fn detect_image_kind(header: &[u8]) -> Option<ImageKind> {
    match header {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageKind::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ImageKind::Png),
        [b'G', b'I', b'F', b'8', ..] => Some(ImageKind::Gif),
        [b'B', b'M', ..] => Some(ImageKind::Bmp),
        // little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(ImageKind::Tiff),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageKind::WebP),
        _ => None,
    }
}

/// Read the first 16 bytes of `path` and detect its format.
pub fn detect_image_kind_at(path: &Path) -> std::io::Result<Option<ImageKind>> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 16];
    let bytes_read = file.read(&mut header)?;
    Ok(detect_image_kind(&header[..bytes_read]))
}

/// Whether a directory entry looks like an image worth ingesting (by extension).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ImageKind::from_extension)
        .is_some()
}

/// Sanitize a filename: strip path components, limit length
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.is_empty() {
        "image".to_string()
    } else {
        clean
    }
}
