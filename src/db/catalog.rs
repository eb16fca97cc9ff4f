//! Catalog seam consumed by ingestion.
//!
//! `IngestionService` only talks to the `Catalog` trait; `SqliteCatalog` is the
//! production implementation over the repository functions.

use std::path::Path;

use rusqlite::Connection;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::*;

/// Relational store of source images, their derived renditions and the pHash index.
///
/// Not `Sync`: a catalog is owned by one ingestion worker at a time.
pub trait Catalog {
    /// Exact pHash match.
    fn find_by_phash(&self, phash: &str) -> Result<Option<i64>, DatabaseError>;

    fn insert_source(&self, image: &NewSourceImage) -> Result<i64, DatabaseError>;

    fn get_source_metadata(&self, id: i64) -> Result<Option<SourceImage>, DatabaseError>;

    /// Insert a derived rendition. `Ok(None)` when a row for
    /// (source_id, resolution) already exists.
    fn insert_derived(
        &self,
        source_id: i64,
        stored_path: &str,
        derived: &NewDerivedImage,
    ) -> Result<Option<i64>, DatabaseError>;

    fn get_derived(
        &self,
        source_id: i64,
        resolution: u32,
    ) -> Result<Option<DerivedImage>, DatabaseError>;

    fn list_derived(&self, source_id: i64) -> Result<Vec<DerivedImage>, DatabaseError>;

    /// Drop a derived row whose file is gone so it can be regenerated.
    fn delete_derived(&self, derived_id: i64) -> Result<(), DatabaseError>;

    /// Remove a source and every derived row hanging off it.
    fn delete_source_cascade(&self, id: i64) -> Result<(), DatabaseError>;

    /// Every file path the catalog references (originals and derived).
    fn list_stored_paths(&self) -> Result<Vec<String>, DatabaseError>;
}

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open (or create) the catalog file and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn now() -> chrono::NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

impl Catalog for SqliteCatalog {
    fn find_by_phash(&self, phash: &str) -> Result<Option<i64>, DatabaseError> {
        repository::get_image_id_by_phash(&self.conn, phash)
    }

    fn insert_source(&self, image: &NewSourceImage) -> Result<i64, DatabaseError> {
        repository::insert_image(&self.conn, image, Self::now())
    }

    fn get_source_metadata(&self, id: i64) -> Result<Option<SourceImage>, DatabaseError> {
        repository::get_image(&self.conn, id)
    }

    fn insert_derived(
        &self,
        source_id: i64,
        stored_path: &str,
        derived: &NewDerivedImage,
    ) -> Result<Option<i64>, DatabaseError> {
        match repository::insert_processed_image(&self.conn, source_id, stored_path, derived, Self::now()) {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(
                    source_id,
                    resolution = derived.resolution,
                    "Processed image already registered"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn get_derived(
        &self,
        source_id: i64,
        resolution: u32,
    ) -> Result<Option<DerivedImage>, DatabaseError> {
        repository::get_processed_image(&self.conn, source_id, resolution)
    }

    fn list_derived(&self, source_id: i64) -> Result<Vec<DerivedImage>, DatabaseError> {
        repository::list_processed_images(&self.conn, source_id)
    }

    fn delete_derived(&self, derived_id: i64) -> Result<(), DatabaseError> {
        repository::delete_processed_image(&self.conn, derived_id)
    }

    fn delete_source_cascade(&self, id: i64) -> Result<(), DatabaseError> {
        repository::delete_image_cascade(&self.conn, id)
    }

    fn list_stored_paths(&self) -> Result<Vec<String>, DatabaseError> {
        let mut paths = repository::list_image_paths(&self.conn)?;
        paths.extend(repository::list_processed_paths(&self.conn)?);
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{sample_derived, sample_image};

    #[test]
    fn catalog_is_object_safe() {
        fn _assert_catalog(_: &dyn Catalog) {}
    }

    #[test]
    fn duplicate_derived_insert_returns_none() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let id = catalog.insert_source(&sample_image("p")).unwrap();

        let first = catalog.insert_derived(id, "/a.jpg", &sample_derived(1024)).unwrap();
        let second = catalog.insert_derived(id, "/b.jpg", &sample_derived(1024)).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let existing = catalog.get_derived(id, 1024).unwrap().unwrap();
        assert_eq!(Some(existing.id), first);
        assert_eq!(existing.stored_path, "/a.jpg");
    }

    #[test]
    fn insert_derived_for_unknown_source_is_error() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        assert!(catalog.insert_derived(404, "/a.jpg", &sample_derived(1024)).is_err());
    }

    #[test]
    fn stored_paths_cover_originals_and_derived() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let new = sample_image("p");
        let id = catalog.insert_source(&new).unwrap();
        catalog.insert_derived(id, "/derived.jpg", &sample_derived(512)).unwrap();

        let paths = catalog.list_stored_paths().unwrap();
        assert!(paths.contains(&new.stored_path));
        assert!(paths.contains(&"/derived.jpg".to_string()));
    }

    #[test]
    fn cascade_through_catalog() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let id = catalog.insert_source(&sample_image("p")).unwrap();
        catalog.insert_derived(id, "/a.jpg", &sample_derived(1024)).unwrap();

        catalog.delete_source_cascade(id).unwrap();
        assert!(catalog.get_source_metadata(id).unwrap().is_none());
        assert!(catalog.find_by_phash("p").unwrap().is_none());
        assert!(catalog.list_derived(id).unwrap().is_empty());
    }
}
