//! Store/catalog consistency repair. Explicitly invoked, never run during ingestion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::ingest::IngestionService;
use super::IngestError;

/// Result of `check_and_repair`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Derived row and file both present.
    Healthy { derived_id: i64 },
    /// Derived image was missing (row or file) and has been recreated.
    Regenerated { derived_id: i64 },
    /// Original file gone: source and its derived rows deleted.
    SourceRemoved { derived_files_removed: usize },
    /// No catalog row for this id.
    SourceNotFound,
    /// Original present but the pipeline produces nothing at this resolution.
    Unproducible,
}

/// Result of `sweep_orphaned_files`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub files_scanned: usize,
    pub removed: Vec<PathBuf>,
}

impl IngestionService {
    /// Re-check one `(source_id, resolution)` pair and repair what can be repaired.
    ///
    /// Destructive when the original file is missing: the source row and all of
    /// its derived rows are deleted, and their derived files removed.
    pub fn check_and_repair(&self, source_id: i64, resolution: u32) -> Result<RepairOutcome, IngestError> {
        let Some(source) = self.catalog.get_source_metadata(source_id)? else {
            return Ok(RepairOutcome::SourceNotFound);
        };

        if !self.store.exists(Path::new(&source.stored_path)) {
            let derived = self.catalog.list_derived(source_id)?;
            self.catalog.delete_source_cascade(source_id)?;

            let mut derived_files_removed = 0;
            for d in &derived {
                let path = Path::new(&d.stored_path);
                if !self.store.exists(path) {
                    continue;
                }
                match self.store.remove(path) {
                    Ok(()) => derived_files_removed += 1,
                    Err(e) => warn!(path = %d.stored_path, error = %e, "Could not remove derived file"),
                }
            }
            warn!(
                source_id,
                path = %source.stored_path,
                derived_rows = derived.len(),
                "Original missing, source removed from catalog"
            );
            return Ok(RepairOutcome::SourceRemoved { derived_files_removed });
        }

        if let Some(existing) = self.catalog.get_derived(source_id, resolution)? {
            if self.store.exists(Path::new(&existing.stored_path)) {
                return Ok(RepairOutcome::Healthy { derived_id: existing.id });
            }
        }

        match self.ensure_derived_for(&source, resolution)? {
            Some(derived) => {
                info!(source_id, resolution, derived_id = derived.id, "Derived image repaired");
                Ok(RepairOutcome::Regenerated { derived_id: derived.id })
            }
            None => Ok(RepairOutcome::Unproducible),
        }
    }

    /// Delete image files under the store root that no catalog row references.
    ///
    /// These are left behind by a crash between a file write and its catalog
    /// insert. Must not run while an ingest is in progress on the same store.
    pub fn sweep_orphaned_files(&self) -> Result<SweepReport, IngestError> {
        let root = self.store.root();
        if !root.is_dir() {
            return Ok(SweepReport::default());
        }

        let referenced: HashSet<PathBuf> = self
            .catalog
            .list_stored_paths()?
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let files = self.store.list_images(root)?;
        let mut report = SweepReport {
            files_scanned: files.len(),
            removed: Vec::new(),
        };

        for file in files {
            if referenced.contains(&file) {
                continue;
            }
            self.store.remove(&file)?;
            report.removed.push(file);
        }

        info!(
            scanned = report.files_scanned,
            removed = report.removed.len(),
            "Orphan sweep finished"
        );
        Ok(report)
    }
}
