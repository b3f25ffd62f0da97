use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema v{version} failed to apply: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value does not decode into its record type.
    #[error("Corrupt row in '{table}': {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// An update addressed a row that no longer exists.
    #[error("No row {id} in '{table}'")]
    RowMissing { table: &'static str, id: i64 },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
