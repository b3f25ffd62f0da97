//! Content repository: rows of the `contents` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::model::ContentRecord;

pub(crate) fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn from_row(row: &Row<'_>) -> Result<ContentRecord, rusqlite::Error> {
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    Ok(ContentRecord {
        id: row.get("id")?,
        hash: row.get("hash")?,
        file_size: row.get::<_, i64>("file_size")?.max(0) as u64,
        duration_ms: row
            .get::<_, Option<i64>>("duration_ms")?
            .map(|d| d.max(0) as u64),
        media_info: row.get("media_info")?,
        is_ignored: row.get("is_ignored")?,
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    })
}

/// Inserts a new content row and returns it with its assigned id.
pub fn insert(conn: &Connection, hash: &str, file_size: u64) -> Result<ContentRecord, DatabaseError> {
    let now = Utc::now();
    let stamp = now.to_rfc3339();
    conn.execute(
        "INSERT INTO contents (hash, file_size, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![hash, file_size as i64, stamp],
    )?;
    Ok(ContentRecord {
        id: conn.last_insert_rowid(),
        hash: hash.to_string(),
        file_size,
        duration_ms: None,
        media_info: None,
        is_ignored: false,
        created_at: now,
        updated_at: now,
    })
}

/// Overwrites every mutable column and bumps `updated_at`. Returns false
/// when no row has `content.id`.
pub fn update(conn: &Connection, content: &mut ContentRecord) -> Result<bool, DatabaseError> {
    content.updated_at = Utc::now();
    let affected = conn.execute(
        "UPDATE contents SET hash=?2, file_size=?3, duration_ms=?4, media_info=?5,
         is_ignored=?6, updated_at=?7 WHERE id=?1",
        params![
            content.id,
            content.hash,
            content.file_size as i64,
            content.duration_ms.map(|d| d as i64),
            content.media_info,
            content.is_ignored,
            content.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ContentRecord>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM contents WHERE id = ?1", params![id], from_row)
        .optional()?)
}

/// All rows sharing `hash`, oldest first.
pub fn find_by_hash(conn: &Connection, hash: &str) -> Result<Vec<ContentRecord>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM contents WHERE hash = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![hash], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list(conn: &Connection) -> Result<Vec<ContentRecord>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM contents ORDER BY id")?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM contents WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}
