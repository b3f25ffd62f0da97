//! Placement repository: rows of the `placements` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::model::PlacementRecord;

fn from_row(row: &Row<'_>) -> Result<PlacementRecord, rusqlite::Error> {
    Ok(PlacementRecord {
        id: row.get("id")?,
        location_id: row.get("location_id")?,
        relative_path: row.get("relative_path")?,
        content_id: row.get("content_id")?,
    })
}

pub fn insert(
    conn: &Connection,
    location_id: i64,
    relative_path: &str,
    content_id: i64,
) -> Result<PlacementRecord, DatabaseError> {
    conn.execute(
        "INSERT INTO placements (location_id, relative_path, content_id) VALUES (?1, ?2, ?3)",
        params![location_id, relative_path, content_id],
    )?;
    Ok(PlacementRecord {
        id: conn.last_insert_rowid(),
        location_id,
        relative_path: relative_path.to_string(),
        content_id,
    })
}

/// Returns false when no row has `placement.id`.
pub fn update(conn: &Connection, placement: &PlacementRecord) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE placements SET location_id=?2, relative_path=?3, content_id=?4 WHERE id=?1",
        params![
            placement.id,
            placement.location_id,
            placement.relative_path,
            placement.content_id,
        ],
    )?;
    Ok(affected > 0)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<PlacementRecord>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM placements WHERE id = ?1", params![id], from_row)
        .optional()?)
}

pub fn find_by_path(
    conn: &Connection,
    location_id: i64,
    relative_path: &str,
) -> Result<Option<PlacementRecord>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM placements WHERE location_id = ?1 AND relative_path = ?2",
            params![location_id, relative_path],
            from_row,
        )
        .optional()?)
}

pub fn find_by_content(
    conn: &Connection,
    content_id: i64,
) -> Result<Vec<PlacementRecord>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM placements WHERE content_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![content_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list(conn: &Connection) -> Result<Vec<PlacementRecord>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM placements ORDER BY id")?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM placements WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{content_repo, Database};

    #[test]
    fn test_insert_find_update() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let c = content_repo::insert(conn, "h1", 1)?;
            let mut p = insert(conn, 1, "a/b.mkv", c.id)?;

            assert_eq!(find_by_path(conn, 1, "a/b.mkv")?.unwrap().id, p.id);
            p.relative_path = "c.mkv".into();
            assert!(update(conn, &p)?);
            assert!(find_by_path(conn, 1, "a/b.mkv")?.is_none());
            assert_eq!(find_by_content(conn, c.id)?.len(), 1);

            delete(conn, p.id)?;
            assert!(!update(conn, &p)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_content_with_placements_cannot_be_deleted() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let c = content_repo::insert(conn, "h1", 1)?;
            insert(conn, 1, "a.mkv", c.id)?;
            assert!(content_repo::delete(conn, c.id).is_err());
            Ok(())
        })
        .unwrap();
    }
}
