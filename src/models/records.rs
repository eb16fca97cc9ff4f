use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ColorMode;

/// Header-level facts about an image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
    pub has_alpha: bool,
    pub file_size: u64,
}

/// An original image registered in the catalog. One row per distinct pHash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: i64,
    pub uuid: Uuid,
    pub phash: String,
    pub stored_path: String,
    pub original_filename: String,
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
    pub has_alpha: bool,
    pub file_size: u64,
    pub extension: String,
    pub created_at: NaiveDateTime,
}

/// Insert payload for `images`; the catalog assigns `id`.
#[derive(Debug, Clone)]
pub struct NewSourceImage {
    pub uuid: Uuid,
    pub phash: String,
    pub stored_path: String,
    pub original_filename: String,
    pub info: ImageInfo,
    pub extension: String,
}

/// A processed rendition of a source at one target resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedImage {
    pub id: i64,
    pub source_id: i64,
    pub resolution: u32,
    pub stored_path: String,
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
    pub has_alpha: bool,
    pub file_size: u64,
    pub upscaler_used: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Insert payload for `processed_images`.
#[derive(Debug, Clone)]
pub struct NewDerivedImage {
    pub resolution: u32,
    pub info: ImageInfo,
    pub upscaler_used: Option<String>,
}
