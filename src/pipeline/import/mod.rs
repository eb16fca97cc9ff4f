pub mod format;
pub mod hash;
pub mod ingest;
pub mod maintenance;
pub mod store;

pub use format::*;
pub use hash::*;
pub use ingest::*;
pub use maintenance::*;
pub use store::*;

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Hash computation failed: {0}")]
    HashComputation(String),

    #[error("Could not read image: {0}")]
    ImageRead(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Source image not found: {0}")]
    SourceNotFound(i64),

    #[error("Original file missing for source {source_id}: {path}")]
    OriginalMissing { source_id: i64, path: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl IngestError {
    /// Whether a batch should stop instead of moving to the next file.
    ///
    /// Storage failures mean the store may no longer match the catalog, so they
    /// propagate. Everything else is local to one image.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_abort_a_batch() {
        let storage = IngestError::Storage(StorageError::NotAFile("/x".into()));
        assert!(storage.is_batch_fatal());
        assert!(!IngestError::HashComputation("bad".into()).is_batch_fatal());
        assert!(!IngestError::ImageRead("bad".into()).is_batch_fatal());
        assert!(!IngestError::SourceNotFound(1).is_batch_fatal());
        assert!(!IngestError::Database(DatabaseError::NotFound {
            entity_type: "image".into(),
            id: "1".into(),
        })
        .is_batch_fatal());
    }
}
