//! Scheduled task repository: last-run bookkeeping for recurring work.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::content_repo::parse_time;
use super::DatabaseError;
use crate::model::ScheduledTask;

pub fn find(conn: &Connection, name: &str) -> Result<Option<ScheduledTask>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT name, last_run, min_interval_secs FROM scheduled_tasks WHERE name = ?1",
            params![name],
            |row| {
                Ok(ScheduledTask {
                    name: row.get(0)?,
                    last_run: row.get::<_, Option<String>>(1)?.map(|s| parse_time(&s)),
                    min_interval_secs: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn record_run(
    conn: &Connection,
    name: &str,
    at: DateTime<Utc>,
    min_interval_secs: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO scheduled_tasks (name, last_run, min_interval_secs) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET last_run=excluded.last_run,
            min_interval_secs=excluded.min_interval_secs",
        params![name, at.to_rfc3339(), min_interval_secs],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_record_and_find() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(find(conn, "reconcile")?.is_none());
            let at = Utc::now();
            record_run(conn, "reconcile", at, 3600)?;
            let task = find(conn, "reconcile")?.unwrap();
            assert_eq!(task.min_interval_secs, 3600);
            assert_eq!(task.last_run.map(|t| t.timestamp()), Some(at.timestamp()));
            Ok(())
        })
        .unwrap();
    }
}
