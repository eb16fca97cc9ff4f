//! Content store: originals and derived renditions on disk.
//!
//! Layout under the store root:
//! - `original_images/YYYY/MM/DD/<sha256-b64url>.<ext>`
//! - `<resolution>/YYYY/MM/DD/<original-stem>_<resolution>.<ext>`
//!
//! Every write goes to a temp file in the target directory and is renamed
//! into place, so a crash never leaves a half-written image at a final path.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local};
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use thiserror::Error;
use walkdir::WalkDir;

use super::format::{detect_image_kind, has_image_extension, ImageKind};
use super::hash::compute_content_hash;
use crate::models::ImageInfo;
use crate::pipeline::processing::detect_color_mode;

/// JPEG quality for RGB derived images.
const DERIVED_JPEG_QUALITY: u8 = 90;

const ORIGINALS_DIR: &str = "original_images";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Failed to move file into place: {0}")]
    Persist(String),
}

/// File storage consumed by ingestion.
pub trait ContentStore {
    /// Directory everything is stored under.
    fn root(&self) -> &Path;

    /// Copy a source file into the store. Returns the stored path.
    fn save_original(&self, source: &Path) -> Result<PathBuf, StorageError>;

    /// Encode and store a derived rendition of `original_path`.
    fn save_derived(
        &self,
        image: &DynamicImage,
        original_path: &Path,
        resolution: u32,
    ) -> Result<PathBuf, StorageError>;

    fn read_info(&self, path: &Path) -> Result<ImageInfo, StorageError>;

    /// Image files under `dir`, recursively, sorted.
    fn list_images(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError>;

    fn exists(&self, path: &Path) -> bool;

    /// Delete a stored file. Missing files are not an error.
    fn remove(&self, path: &Path) -> Result<(), StorageError>;
}

/// Filesystem store with date-sharded directories.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/<bucket>/YYYY/MM/DD`, created if missing.
    fn shard_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let today = Local::now().date_naive();
        let dir = self
            .root
            .join(bucket)
            .join(format!("{:04}", today.year()))
            .join(format!("{:02}", today.month()))
            .join(format!("{:02}", today.day()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Write `bytes` to `target` through a sibling temp file.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = target
        .parent()
        .ok_or_else(|| StorageError::NotAFile(target.display().to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)
        .map_err(|e| StorageError::Persist(format!("{}: {}", target.display(), e.error)))?;
    Ok(())
}

impl ContentStore for FsContentStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn save_original(&self, source: &Path) -> Result<PathBuf, StorageError> {
        if !source.is_file() {
            return Err(StorageError::NotAFile(source.display().to_string()));
        }
        let bytes = std::fs::read(source)?;

        let extension = detect_image_kind(&bytes)
            .map(|k| k.extension().to_string())
            .or_else(|| {
                source
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
            })
            .unwrap_or_else(|| "bin".to_string());

        let target = self
            .shard_dir(ORIGINALS_DIR)?
            .join(format!("{}.{extension}", compute_content_hash(&bytes)));

        if target.is_file() {
            tracing::debug!(path = %target.display(), "Original already stored");
            return Ok(target);
        }

        write_atomic(&target, &bytes)?;
        tracing::debug!(
            source = %source.display(),
            stored = %target.display(),
            size = bytes.len(),
            "Original stored"
        );
        Ok(target)
    }

    fn save_derived(
        &self,
        image: &DynamicImage,
        original_path: &Path,
        resolution: u32,
    ) -> Result<PathBuf, StorageError> {
        let stem = original_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StorageError::NotAFile(original_path.display().to_string()))?;

        // RGBA keeps its alpha in PNG; everything else is JPEG.
        let (kind, format, encoded) = match image {
            DynamicImage::ImageRgba8(_) => (ImageKind::Png, ImageOutputFormat::Png, None),
            DynamicImage::ImageRgb8(_) => (ImageKind::Jpeg, ImageOutputFormat::Jpeg(DERIVED_JPEG_QUALITY), None),
            other => (
                ImageKind::Jpeg,
                ImageOutputFormat::Jpeg(DERIVED_JPEG_QUALITY),
                Some(DynamicImage::ImageRgb8(other.to_rgb8())),
            ),
        };

        let mut bytes = Vec::new();
        encoded
            .as_ref()
            .unwrap_or(image)
            .write_to(&mut bytes, format)
            .map_err(|e| StorageError::Encode(e.to_string()))?;

        let target = self
            .shard_dir(&resolution.to_string())?
            .join(format!("{stem}_{resolution}.{}", kind.extension()));
        write_atomic(&target, &bytes)?;

        tracing::debug!(
            stored = %target.display(),
            resolution,
            size = bytes.len(),
            "Derived image stored"
        );
        Ok(target)
    }

    fn read_info(&self, path: &Path) -> Result<ImageInfo, StorageError> {
        if !path.is_file() {
            return Err(StorageError::NotAFile(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        let decoded =
            image::load_from_memory(&bytes).map_err(|e| StorageError::Decode(format!("{}: {e}", path.display())))?;
        let (width, height) = decoded.dimensions();
        let (mode, has_alpha) = detect_color_mode(&bytes, &decoded);
        Ok(ImageInfo {
            width,
            height,
            mode,
            has_alpha,
            file_size: bytes.len() as u64,
        })
    }

    fn list_images(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        if !dir.is_dir() {
            return Err(StorageError::NotAFile(dir.display().to_string()));
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if entry.file_type().is_file() && has_image_extension(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
