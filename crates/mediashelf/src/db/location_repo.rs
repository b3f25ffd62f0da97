//! Storage location repository: rows of the `storage_locations` table.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::model::StorageLocation;

fn from_row(row: &Row<'_>) -> Result<StorageLocation, rusqlite::Error> {
    Ok(StorageLocation {
        id: row.get("id")?,
        name: row.get("name")?,
        root_path: PathBuf::from(row.get::<_, String>("root_path")?),
        cloud_id: row.get("cloud_id")?,
        is_drop_source: row.get("is_drop_source")?,
        is_drop_destination: row.get("is_drop_destination")?,
    })
}

/// Inserts the location or overwrites the row with the same id.
pub fn upsert(conn: &Connection, location: &StorageLocation) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO storage_locations (id, name, root_path, cloud_id, is_drop_source, is_drop_destination)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET name=excluded.name, root_path=excluded.root_path,
            cloud_id=excluded.cloud_id, is_drop_source=excluded.is_drop_source,
            is_drop_destination=excluded.is_drop_destination",
        params![
            location.id,
            location.name,
            location.root_path.to_string_lossy(),
            location.cloud_id,
            location.is_drop_source,
            location.is_drop_destination,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<StorageLocation>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM storage_locations WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<StorageLocation>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM storage_locations ORDER BY id")?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM storage_locations WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn sample(id: i64) -> StorageLocation {
        StorageLocation {
            id,
            name: format!("loc{}", id),
            root_path: PathBuf::from(format!("/media/{}", id)),
            cloud_id: None,
            is_drop_source: false,
            is_drop_destination: true,
        }
    }

    #[test]
    fn test_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert(conn, &sample(1))?;
            let mut changed = sample(1);
            changed.name = "Renamed".into();
            changed.cloud_id = Some("gdrive".into());
            upsert(conn, &changed)?;

            let found = find_by_id(conn, 1)?.unwrap();
            assert_eq!(found, changed);
            assert_eq!(list(conn)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert(conn, &sample(1))?;
            assert!(delete(conn, 1)?);
            assert!(!delete(conn, 1)?);
            assert!(find_by_id(conn, 1)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
