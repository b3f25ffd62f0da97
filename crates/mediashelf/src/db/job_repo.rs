//! Job repository: persistence for the command queue.
//!
//! Every function expects the caller to hold the connection lock for
//! the whole read-modify-write, which is what makes `claim` atomic.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_string, DatabaseError};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_FAILED: &str = "failed";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub seq: i64,
    pub kind: String,
    pub payload: String,
    pub signature: String,
    pub priority: u8,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            seq: row.get("seq")?,
            kind: row.get("kind")?,
            payload: row.get("payload")?,
            signature: row.get("signature")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn next_seq(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs", [], |r| r.get(0))?)
}

/// Whether a pending or running job with this signature exists.
pub fn signature_active(conn: &Connection, signature: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM jobs WHERE signature = ?1 AND status IN ('pending', 'running') LIMIT 1",
            params![signature],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Inserts a new pending job, assigning the next sequence number.
pub fn insert(conn: &Connection, job: &mut JobRow) -> Result<(), DatabaseError> {
    job.seq = next_seq(conn)?;
    conn.execute(
        "INSERT INTO jobs (id, seq, kind, payload, signature, priority, status, attempts,
         max_attempts, last_error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job.id,
            job.seq,
            job.kind,
            job.payload,
            job.signature,
            job.priority,
            job.status,
            job.attempts,
            job.max_attempts,
            job.last_error,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Marks the next pending job (priority, then sequence) as running and returns it.
pub fn claim_next(conn: &Connection) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE status = 'pending' ORDER BY priority ASC, seq ASC LIMIT 1",
            [],
            JobRow::from_row,
        )
        .optional()?;

    let Some(mut row) = row else {
        return Ok(None);
    };

    row.status = STATUS_RUNNING.to_string();
    row.updated_at = now_string();
    conn.execute(
        "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![row.id, row.status, row.updated_at],
    )?;
    Ok(Some(row))
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Records a failed attempt. Requeued jobs go to the back of their tier.
pub fn record_failure(
    conn: &Connection,
    id: &str,
    attempts: u32,
    status: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    let seq = next_seq(conn)?;
    let affected = conn.execute(
        "UPDATE jobs SET attempts = ?2, status = ?3, last_error = ?4, seq = ?5, updated_at = ?6
         WHERE id = ?1",
        params![id, attempts, status, error, seq, now_string()],
    )?;
    Ok(affected > 0)
}

/// Signatures with a job that is pending or running.
const ACTIVE_SIGNATURES: &str =
    "SELECT signature FROM jobs WHERE status IN ('pending', 'running')";

/// Moves failed jobs back to pending with a fresh attempt budget.
/// `None` revives every failed job. A signature that is already pending
/// or running is not revived, and only the oldest failed row of each
/// signature comes back. Failed rows left behind by an active twin are
/// deleted. Run inside a transaction.
pub fn revive_failed(conn: &Connection, id: Option<&str>) -> Result<usize, DatabaseError> {
    let now = now_string();
    let revived = match id {
        Some(id) => conn.execute(
            &format!(
                "UPDATE jobs SET status = 'pending', attempts = 0, updated_at = ?2
                 WHERE id = ?1 AND status = 'failed'
                   AND signature NOT IN ({ACTIVE_SIGNATURES})"
            ),
            params![id, now],
        )?,
        None => conn.execute(
            &format!(
                "UPDATE jobs SET status = 'pending', attempts = 0, updated_at = ?1
                 WHERE status = 'failed'
                   AND signature NOT IN ({ACTIVE_SIGNATURES})
                   AND rowid IN (SELECT MIN(rowid) FROM jobs WHERE status = 'failed'
                                 GROUP BY signature)"
            ),
            params![now],
        )?,
    };
    conn.execute(
        &format!("DELETE FROM jobs WHERE status = 'failed' AND signature IN ({ACTIVE_SIGNATURES})"),
        [],
    )?;
    Ok(revived)
}

/// Resets jobs left running by a previous process.
pub fn reset_running(conn: &Connection) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE jobs SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
        params![now_string()],
    )?;
    Ok(affected)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?)
}

pub fn list_by_status(conn: &Connection, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY priority ASC, seq ASC")?;
    let rows = stmt
        .query_map(params![status], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_status(conn: &Connection, status: &str) -> Result<u64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status],
        |r| r.get(0),
    )?)
}

pub fn delete_by_status(conn: &Connection, status: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute("DELETE FROM jobs WHERE status = ?1", params![status])?)
}
