use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

const IMAGE_COLUMNS: &str = "id, uuid, phash, stored_image_path, original_filename, width, height,
     mode, has_alpha, filesize, extension, created_at";

pub fn insert_image(
    conn: &Connection,
    image: &NewSourceImage,
    created_at: NaiveDateTime,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO images (uuid, phash, stored_image_path, original_filename, width, height,
         mode, has_alpha, filesize, extension, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            image.uuid.to_string(),
            image.phash,
            image.stored_path,
            image.original_filename,
            image.info.width,
            image.info.height,
            image.info.mode.as_str(),
            image.info.has_alpha as i32,
            image.info.file_size as i64,
            image.extension,
            created_at.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_image(conn: &Connection, id: i64) -> Result<Option<SourceImage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1"))?;
    let row = stmt.query_row(params![id], image_row).optional()?;
    row.map(image_from_row).transpose()
}

/// Exact-match pHash lookup. Lowest id wins if a race ever produced two rows.
pub fn get_image_id_by_phash(conn: &Connection, phash: &str) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM images WHERE phash = ?1 ORDER BY id LIMIT 1",
            params![phash],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

/// Stored paths of every original, for orphan detection.
pub fn list_image_paths(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT stored_image_path FROM images")?;
    let paths = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

/// Delete an image and all its processed renditions in one transaction.
///
/// `processed_images` cascades on the FK, but the children are removed
/// explicitly so the count can be logged.
pub fn delete_image_cascade(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let deleted_derived = tx.execute("DELETE FROM processed_images WHERE image_id = ?1", params![id])?;
    let deleted = tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Image".into(),
            id: id.to_string(),
        });
    }
    tx.commit()?;

    tracing::info!(
        image_id = id,
        processed_images = deleted_derived,
        "Image cascade-deleted with all processed images"
    );
    Ok(())
}

struct ImageRow {
    id: i64,
    uuid: String,
    phash: String,
    stored_path: String,
    original_filename: String,
    width: u32,
    height: u32,
    mode: String,
    has_alpha: i32,
    file_size: i64,
    extension: String,
    created_at: String,
}

fn image_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        phash: row.get(2)?,
        stored_path: row.get(3)?,
        original_filename: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        mode: row.get(7)?,
        has_alpha: row.get(8)?,
        file_size: row.get(9)?,
        extension: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn image_from_row(row: ImageRow) -> Result<SourceImage, DatabaseError> {
    Ok(SourceImage {
        id: row.id,
        uuid: Uuid::parse_str(&row.uuid).map_err(|_| DatabaseError::InvalidValue {
            field: "images.uuid".into(),
            value: row.uuid.clone(),
        })?,
        phash: row.phash,
        stored_path: row.stored_path,
        original_filename: row.original_filename,
        width: row.width,
        height: row.height,
        mode: ColorMode::from_str(&row.mode)?,
        has_alpha: row.has_alpha != 0,
        file_size: row.file_size.max(0) as u64,
        extension: row.extension,
        created_at: super::parse_timestamp(&row.created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::sample_image;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn insert_and_get_image() {
        let conn = open_memory_database().unwrap();
        let new = sample_image("abc");
        let now = chrono::Local::now().naive_local();
        let id = insert_image(&conn, &new, now).unwrap();

        let image = get_image(&conn, id).unwrap().unwrap();
        assert_eq!(image.id, id);
        assert_eq!(image.uuid, new.uuid);
        assert_eq!(image.phash, "abc");
        assert_eq!(image.width, 640);
        assert_eq!(image.mode, ColorMode::Rgb);
        assert!(!image.has_alpha);
        assert_eq!(image.file_size, 12_345);
    }

    #[test]
    fn get_missing_image_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_image(&conn, 42).unwrap().is_none());
    }

    #[test]
    fn phash_lookup_is_exact() {
        let conn = open_memory_database().unwrap();
        let now = chrono::Local::now().naive_local();
        let id = insert_image(&conn, &sample_image("hash-a"), now).unwrap();

        assert_eq!(get_image_id_by_phash(&conn, "hash-a").unwrap(), Some(id));
        assert_eq!(get_image_id_by_phash(&conn, "hash-b").unwrap(), None);
    }

    #[test]
    fn ids_are_assigned_incrementally() {
        let conn = open_memory_database().unwrap();
        let now = chrono::Local::now().naive_local();
        let a = insert_image(&conn, &sample_image("a"), now).unwrap();
        let b = insert_image(&conn, &sample_image("b"), now).unwrap();
        assert!(b > a);
        assert_eq!(list_image_paths(&conn).unwrap().len(), 2);
    }

    #[test]
    fn delete_missing_image_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = delete_image_cascade(&conn, 7).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
