use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::*;

const PROCESSED_COLUMNS: &str = "id, image_id, resolution, stored_image_path, width, height,
     mode, has_alpha, filesize, upscaler_used, created_at";

/// Insert a processed rendition.
///
/// A second row for the same (image_id, resolution) violates the UNIQUE
/// constraint and comes back as `DatabaseError::Sqlite`; callers check
/// `is_unique_violation()`.
pub fn insert_processed_image(
    conn: &Connection,
    image_id: i64,
    stored_path: &str,
    derived: &NewDerivedImage,
    created_at: NaiveDateTime,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO processed_images (image_id, resolution, stored_image_path, width, height,
         mode, has_alpha, filesize, upscaler_used, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            image_id,
            derived.resolution,
            stored_path,
            derived.info.width,
            derived.info.height,
            derived.info.mode.as_str(),
            derived.info.has_alpha as i32,
            derived.info.file_size as i64,
            derived.upscaler_used,
            created_at.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_processed_image(
    conn: &Connection,
    image_id: i64,
    resolution: u32,
) -> Result<Option<DerivedImage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROCESSED_COLUMNS} FROM processed_images WHERE image_id = ?1 AND resolution = ?2"
    ))?;
    let row = stmt
        .query_row(params![image_id, resolution], processed_row)
        .optional()?;
    row.map(processed_from_row).transpose()
}

pub fn list_processed_images(
    conn: &Connection,
    image_id: i64,
) -> Result<Vec<DerivedImage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROCESSED_COLUMNS} FROM processed_images WHERE image_id = ?1 ORDER BY resolution"
    ))?;
    let rows = stmt.query_map(params![image_id], processed_row)?;

    let mut images = Vec::new();
    for row in rows {
        images.push(processed_from_row(row?)?);
    }
    Ok(images)
}

/// Stored paths of every processed rendition, for orphan detection.
pub fn list_processed_paths(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT stored_image_path FROM processed_images")?;
    let paths = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

pub fn delete_processed_image(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let deleted = conn.execute("DELETE FROM processed_images WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "ProcessedImage".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

struct ProcessedRow {
    id: i64,
    image_id: i64,
    resolution: u32,
    stored_path: String,
    width: u32,
    height: u32,
    mode: String,
    has_alpha: i32,
    file_size: i64,
    upscaler_used: Option<String>,
    created_at: String,
}

fn processed_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedRow> {
    Ok(ProcessedRow {
        id: row.get(0)?,
        image_id: row.get(1)?,
        resolution: row.get(2)?,
        stored_path: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        mode: row.get(6)?,
        has_alpha: row.get(7)?,
        file_size: row.get(8)?,
        upscaler_used: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn processed_from_row(row: ProcessedRow) -> Result<DerivedImage, DatabaseError> {
    Ok(DerivedImage {
        id: row.id,
        source_id: row.image_id,
        resolution: row.resolution,
        stored_path: row.stored_path,
        width: row.width,
        height: row.height,
        mode: ColorMode::from_str(&row.mode)?,
        has_alpha: row.has_alpha != 0,
        file_size: row.file_size.max(0) as u64,
        upscaler_used: row.upscaler_used,
        created_at: super::parse_timestamp(&row.created_at),
    })
}
