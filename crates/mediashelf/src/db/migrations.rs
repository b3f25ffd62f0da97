//! Schema versioning for the library database.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs
//! in its own transaction together with its bookkeeping row, so a failed
//! step leaves the database at the previous version.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// Skipped when the column is already there, e.g. added by hand.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_library_tables",
        sql: include_str!("sql/001_create_library.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_catalog_tables",
        sql: include_str!("sql/002_create_catalog.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_jobs_table",
        sql: include_str!("sql/003_create_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_scheduled_tasks_table",
        sql: include_str!("sql/004_create_scheduled_tasks.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_is_ignored_to_contents",
        sql: include_str!("sql/005_add_is_ignored.sql"),
        kind: MigrationKind::AddColumn {
            table: "contents",
            column: "is_ignored",
        },
    },
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Highest applied version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(TRACKING_TABLE)?;
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Brings the schema up to the latest version. Returns the number of
/// steps applied.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    let current = schema_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let needed = match migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        let tx = conn.unchecked_transaction()?;
        if needed {
            log::info!(
                "Applying schema v{} ({})",
                migration.version,
                migration.description
            );
            tx.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::debug!(
                "Schema v{} already present, recording only",
                migration.version
            );
        }
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
        applied += 1;
    }

    Ok(applied)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_db_reaches_latest_version() {
        let conn = migrated();
        let latest = MIGRATIONS.last().map(|m| m.version).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest);
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let conn = migrated();
        assert_eq!(run_all(&conn).unwrap(), 0);
    }

    #[test]
    fn test_column_lookup() {
        let conn = migrated();
        assert!(column_exists(&conn, "contents", "is_ignored").unwrap());
        assert!(column_exists(&conn, "placements", "relative_path").unwrap());
        assert!(!column_exists(&conn, "contents", "episode_id").unwrap());
        assert!(!column_exists(&conn, "no_such_table", "id").unwrap());
    }

    #[test]
    fn test_existing_column_is_only_recorded() {
        let conn = migrated();
        conn.execute("DELETE FROM _migrations WHERE version = 5", [])
            .unwrap();
        assert_eq!(run_all(&conn).unwrap(), 1);
        assert_eq!(schema_version(&conn).unwrap(), 5);
    }

    #[test]
    fn test_placement_path_is_unique_per_location() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO contents (hash, file_size, created_at, updated_at) VALUES ('h', 1, 'now', 'now')",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO placements (location_id, relative_path, content_id) VALUES (?1, 'a.mkv', 1)";
        conn.execute(insert, [1]).unwrap();
        conn.execute(insert, [2]).unwrap();
        assert!(conn.execute(insert, [1]).is_err());
    }
}
