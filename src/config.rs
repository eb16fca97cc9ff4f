use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::processing::SizeRounding;

/// Application-level constants
pub const APP_NAME: &str = "Imgvault";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pixels trimmed from each side of a detected content box.
pub const CROP_MARGIN_PX: u32 = 5;

/// Largest edge a derived image may have.
pub const MAX_OUTPUT_DIMENSION: u32 = 8192;

/// Free-form derived sizes are rounded to multiples of this.
pub const SIZE_MULTIPLE: u32 = 32;

/// Resolution produced eagerly at ingestion time unless configured otherwise.
pub const DEFAULT_BASE_RESOLUTION: u32 = 1024;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "imgvault_lib=info,warn"
}

/// Get the application data directory
/// (`~/.local/share/imgvault` on Linux, platform equivalent elsewhere).
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imgvault")
}

/// Root of the content store.
pub fn default_store_root() -> PathBuf {
    app_data_dir().join("image_dataset")
}

/// Catalog database file.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("image_database.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Ingestion settings. Every field has a default, so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Resolution derived eagerly for every newly registered image.
    pub base_resolution: u32,
    /// (width, height) pairs favoured by downstream consumers.
    pub preferred_resolutions: Vec<(u32, u32)>,
    /// How free-form sizes snap to `SIZE_MULTIPLE`.
    pub size_rounding: SizeRounding,
    /// Upscaler model used when a cropped image is below the target resolution.
    pub upscaler: Option<String>,
    pub store_root: PathBuf,
    pub database_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_resolution: DEFAULT_BASE_RESOLUTION,
            preferred_resolutions: Vec::new(),
            size_rounding: SizeRounding::Nearest,
            upscaler: None,
            store_root: default_store_root(),
            database_path: default_database_path(),
        }
    }
}

impl IngestConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded ingest config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_resolution == 0 || self.base_resolution > MAX_OUTPUT_DIMENSION {
            return Err(ConfigError::Invalid {
                field: "base_resolution",
                reason: format!("must be in 1..={MAX_OUTPUT_DIMENSION}"),
            });
        }
        if let Some((w, h)) = self
            .preferred_resolutions
            .iter()
            .find(|(w, h)| *w == 0 || *h == 0)
        {
            return Err(ConfigError::Invalid {
                field: "preferred_resolutions",
                reason: format!("{w}x{h} has a zero dimension"),
            });
        }
        Ok(())
    }
}
