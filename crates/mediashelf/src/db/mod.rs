//! SQLite persistence for the library and the job queue.
//!
//! One connection behind a mutex serves every thread. The `*_repo`
//! modules are free functions over `&Connection`, so the record store can
//! run several of them inside one transaction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

pub mod catalog_repo;
pub mod content_repo;
pub mod error;
pub mod job_repo;
pub mod location_repo;
pub mod migrations;
pub mod placement_repo;
pub mod task_repo;

pub use error::DatabaseError;

/// Shared handle to the library database. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the library database at `path` and upgrades its
    /// schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        let db = Self::prepare(conn)?;
        log::info!("Library database at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        let applied = migrations::run_all(&conn)?;
        if applied > 0 {
            log::info!(
                "Schema upgraded by {} step(s) to v{}",
                applied,
                migrations::schema_version(&conn)?
            );
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits when `f` succeeds, rolls
    /// back (on drop) when it fails.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        self.with_transaction_then(f, Ok)
    }

    /// Like [`with_transaction`](Self::with_transaction), but hands the
    /// committed value to `after_commit` before the connection is unlocked.
    /// Commits therefore reach `after_commit` in commit order.
    pub fn with_transaction_then<F, G, T, U>(&self, f: F, after_commit: G) -> Result<U, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
        G: FnOnce(T) -> Result<U, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        after_commit(value)
    }
}

/// Returns the canonical database path: `~/.mediashelf/data/mediashelf.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mediashelf").join("data").join("mediashelf.db"))
}

/// Current time in the RFC 3339 form stored in every timestamp column.
pub(crate) fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}
