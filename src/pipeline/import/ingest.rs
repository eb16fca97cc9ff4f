//! Ingestion: pHash dedup, original registration and derived-image self-heal.
//!
//! `register(path)`:
//! 1. pHash of the file (failure → `HashComputation`)
//! 2. catalog lookup by pHash
//!    - hit: make sure the base-resolution derived image exists in the catalog
//!      *and* on disk, regenerating it from the stored original if not;
//!      a failed repair is logged, never returned
//!    - miss: copy into the store, insert the source row, then produce the
//!      base-resolution derived image; a failure there leaves the source
//!      registered without one
//!
//! Not safe for concurrent use on one catalog. The `(image_id, resolution)`
//! UNIQUE constraint turns a lost race into "already exists" rather than a
//! duplicate row.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::format::{detect_image_kind_at, sanitize_filename};
use super::hash::compute_phash;
use super::store::{ContentStore, FsContentStore, StorageError};
use super::IngestError;
use crate::config::IngestConfig;
use crate::db::{Catalog, SqliteCatalog};
use crate::models::{DerivedImage, NewDerivedImage, NewSourceImage, SourceImage};
use crate::pipeline::processing::{ImageProcessingPipeline, ProcessingOutcome};

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

/// Terminal state of a successful `register` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Registration {
    New {
        source_id: i64,
        metadata: SourceImage,
        derived: Option<DerivedImage>,
    },
    Duplicate {
        source_id: i64,
        metadata: SourceImage,
        derived: Option<DerivedImage>,
    },
}

impl Registration {
    pub fn source_id(&self) -> i64 {
        match self {
            Self::New { source_id, .. } | Self::Duplicate { source_id, .. } => *source_id,
        }
    }

    pub fn metadata(&self) -> &SourceImage {
        match self {
            Self::New { metadata, .. } | Self::Duplicate { metadata, .. } => metadata,
        }
    }

    /// Base-resolution derived image, if one could be produced.
    pub fn derived(&self) -> Option<&DerivedImage> {
        match self {
            Self::New { derived, .. } | Self::Duplicate { derived, .. } => derived.as_ref(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Per-file status in a batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    New { source_id: i64 },
    Duplicate { source_id: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub status: BatchStatus,
}

/// Outcome of a batch ingest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    /// True when the cancel check stopped the loop early.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new_count(&self) -> usize {
        self.count(|s| matches!(s, BatchStatus::New { .. }))
    }

    pub fn duplicate_count(&self) -> usize {
        self.count(|s| matches!(s, BatchStatus::Duplicate { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, BatchStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&BatchStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }
}

// ═══════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════

/// Registers images into the store and catalog.
pub struct IngestionService {
    pub(super) store: Box<dyn ContentStore>,
    pub(super) catalog: Box<dyn Catalog>,
    pub(super) pipeline: ImageProcessingPipeline,
    pub(super) base_resolution: u32,
    pub(super) upscaler: Option<String>,
}

impl IngestionService {
    pub fn new(
        store: Box<dyn ContentStore>,
        catalog: Box<dyn Catalog>,
        pipeline: ImageProcessingPipeline,
        config: &IngestConfig,
    ) -> Self {
        if let Some(model) = config.upscaler.as_deref() {
            if pipeline.upscalers().get(model).is_none() {
                warn!(
                    model,
                    available = ?pipeline.upscalers().names(),
                    "Configured upscaler is not registered, small images will be skipped"
                );
            }
        }
        Self {
            store,
            catalog,
            pipeline,
            base_resolution: config.base_resolution,
            upscaler: config.upscaler.clone(),
        }
    }

    /// Production wiring: filesystem store and SQLite catalog from `config`.
    pub fn open(config: &IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let store = FsContentStore::new(&config.store_root);
        let catalog = SqliteCatalog::open(&config.database_path)?;
        info!(
            store = %config.store_root.display(),
            database = %config.database_path.display(),
            base_resolution = config.base_resolution,
            "Ingestion service ready"
        );
        Ok(Self::new(
            Box::new(store),
            Box::new(catalog),
            ImageProcessingPipeline::from_config(config),
            config,
        ))
    }

    pub fn base_resolution(&self) -> u32 {
        self.base_resolution
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    /// Register one image file. See the module docs for the state machine.
    pub fn register(&self, path: &Path) -> Result<Registration, IngestError> {
        let phash = compute_phash(path)?;

        if let Some(source_id) = self.catalog.find_by_phash(&phash)? {
            let metadata = self
                .catalog
                .get_source_metadata(source_id)?
                .ok_or(IngestError::SourceNotFound(source_id))?;
            info!(path = %path.display(), source_id, "Duplicate image, verifying derived image");

            let derived = match self.ensure_derived_for(&metadata, self.base_resolution) {
                Ok(derived) => derived,
                Err(e) => {
                    warn!(source_id, error = %e, "Self-heal of derived image failed");
                    None
                }
            };
            return Ok(Registration::Duplicate {
                source_id,
                metadata,
                derived,
            });
        }

        self.register_new(path, phash)
    }

    fn register_new(&self, path: &Path, phash: String) -> Result<Registration, IngestError> {
        let kind = detect_image_kind_at(path)
            .map_err(|e| IngestError::ImageRead(format!("{}: {e}", path.display())))?
            .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;

        let info = self.store.read_info(path).map_err(|e| match e {
            StorageError::Decode(reason) => IngestError::ImageRead(reason),
            other => IngestError::Storage(other),
        })?;

        let stored_path = self.store.save_original(path)?;
        let extension = kind.extension().to_string();

        let original_filename = sanitize_filename(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown"),
        );
        let new = NewSourceImage {
            uuid: Uuid::new_v4(),
            phash,
            stored_path: stored_path.to_string_lossy().to_string(),
            original_filename,
            info,
            extension,
        };

        let source_id = match self.catalog.insert_source(&new) {
            Ok(id) => id,
            Err(e) => {
                // content-addressed: nothing else can reference this file yet
                if let Err(rm) = self.store.remove(&stored_path) {
                    warn!(path = %stored_path.display(), error = %rm, "Could not remove unregistered original");
                }
                return Err(e.into());
            }
        };
        let metadata = self
            .catalog
            .get_source_metadata(source_id)?
            .ok_or(IngestError::SourceNotFound(source_id))?;

        info!(
            source_id,
            uuid = %metadata.uuid,
            file = %metadata.original_filename,
            "Image registered"
        );

        let derived = match self.create_derived(&metadata, self.base_resolution) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(source_id, error = %e, "Base derived image not created; will be produced on demand");
                None
            }
        };

        Ok(Registration::New {
            source_id,
            metadata,
            derived,
        })
    }

    /// Derived image for `(source_id, resolution)`, creating or repairing it if needed.
    ///
    /// `Ok(None)` when the pipeline declines to produce one (e.g. the source
    /// is too small and no upscaler brings it to size).
    pub fn ensure_derived(&self, source_id: i64, resolution: u32) -> Result<Option<DerivedImage>, IngestError> {
        let metadata = self
            .catalog
            .get_source_metadata(source_id)?
            .ok_or(IngestError::SourceNotFound(source_id))?;
        self.ensure_derived_for(&metadata, resolution)
    }

    pub(super) fn ensure_derived_for(
        &self,
        source: &SourceImage,
        resolution: u32,
    ) -> Result<Option<DerivedImage>, IngestError> {
        if let Some(existing) = self.catalog.get_derived(source.id, resolution)? {
            if self.store.exists(Path::new(&existing.stored_path)) {
                debug!(source_id = source.id, resolution, "Derived image present");
                return Ok(Some(existing));
            }
            warn!(
                source_id = source.id,
                resolution,
                path = %existing.stored_path,
                "Derived image file missing, regenerating"
            );
            self.catalog.delete_derived(existing.id)?;
        }
        self.create_derived(source, resolution)
    }

    /// Run the pipeline on the stored original and register the result.
    pub(super) fn create_derived(
        &self,
        source: &SourceImage,
        resolution: u32,
    ) -> Result<Option<DerivedImage>, IngestError> {
        let original = Path::new(&source.stored_path);
        if !self.store.exists(original) {
            return Err(IngestError::OriginalMissing {
                source_id: source.id,
                path: source.stored_path.clone(),
            });
        }

        let processed = match self
            .pipeline
            .process_file(original, resolution, self.upscaler.as_deref())
        {
            ProcessingOutcome::Processed(processed) => processed,
            ProcessingOutcome::Skipped(reason) => {
                info!(source_id = source.id, resolution, %reason, "No derived image for source");
                return Ok(None);
            }
        };

        let stored_path = self.store.save_derived(&processed.image, original, resolution)?;
        let info = self.store.read_info(&stored_path)?;
        let new = NewDerivedImage {
            resolution,
            info,
            upscaler_used: processed.metadata.upscaler_used.clone(),
        };

        let stored = stored_path.to_string_lossy();
        if self.catalog.insert_derived(source.id, &stored, &new)?.is_none() {
            debug!(source_id = source.id, resolution, "Derived image registered concurrently, re-fetching");
        }

        let derived = self.catalog.get_derived(source.id, resolution)?;
        if let Some(d) = &derived {
            info!(
                source_id = source.id,
                resolution,
                size = format!("{}x{}", d.width, d.height),
                upscaled = processed.metadata.was_upscaled,
                "Derived image created"
            );
        }
        Ok(derived)
    }

    /// Register each path in order, polling `cancel` between files.
    ///
    /// Per-file failures are recorded and the loop moves on; batch-fatal
    /// errors (storage) stop it and are returned.
    pub fn register_batch(
        &self,
        paths: &[PathBuf],
        cancel: &dyn Fn() -> bool,
    ) -> Result<BatchReport, IngestError> {
        let mut report = BatchReport::default();

        for path in paths {
            if cancel() {
                info!(processed = report.entries.len(), remaining = paths.len() - report.entries.len(), "Batch cancelled");
                report.cancelled = true;
                break;
            }

            let status = match self.register(path) {
                Ok(Registration::New { source_id, .. }) => BatchStatus::New { source_id },
                Ok(Registration::Duplicate { source_id, .. }) => BatchStatus::Duplicate { source_id },
                Err(e) if e.is_batch_fatal() => {
                    warn!(file = %path.display(), error = %e, "Batch aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to register file");
                    BatchStatus::Failed { reason: e.to_string() }
                }
            };
            report.entries.push(BatchEntry {
                path: path.clone(),
                status,
            });
        }

        info!(
            new = report.new_count(),
            duplicates = report.duplicate_count(),
            failed = report.failed_count(),
            "Batch finished"
        );
        Ok(report)
    }

    /// Register every image under `dir` (recursive).
    pub fn ingest_directory(&self, dir: &Path, cancel: &dyn Fn() -> bool) -> Result<BatchReport, IngestError> {
        let paths = self.store.list_images(dir)?;
        info!(dir = %dir.display(), files = paths.len(), "Ingesting directory");
        self.register_batch(&paths, cancel)
    }
}
