use std::fmt;

use crate::db::DatabaseError;
use crate::error::{QueueError, StorageError};
use crate::metadata::ProviderError;

/// How a job ended, as far as the queue is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Transient failure. The queue retries up to the attempt cap.
    Retryable,
    /// The records no longer match what the job was about. Nothing to retry.
    StructuralMismatch,
    /// Every policy declined or one cancelled. Not an error.
    PolicyDeclined,
    /// Gave up after the in-job backoff. Completed without requeueing; the
    /// next scan pass asks again.
    Deferred,
    /// Will never succeed. Parked for an operator.
    Fatal,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Retryable => "retryable",
            Outcome::StructuralMismatch => "structural_mismatch",
            Outcome::PolicyDeclined => "policy_declined",
            Outcome::Deferred => "deferred",
            Outcome::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub kind: Outcome,
    pub detail: String,
}

impl JobOutcome {
    pub fn new(kind: Outcome, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(Outcome::Success, "")
    }

    pub fn retryable(detail: impl Into<String>) -> Self {
        Self::new(Outcome::Retryable, detail)
    }

    pub fn structural(detail: impl Into<String>) -> Self {
        Self::new(Outcome::StructuralMismatch, detail)
    }

    pub fn declined(detail: impl Into<String>) -> Self {
        Self::new(Outcome::PolicyDeclined, detail)
    }

    pub fn deferred(detail: impl Into<String>) -> Self {
        Self::new(Outcome::Deferred, detail)
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::new(Outcome::Fatal, detail)
    }

    pub fn is_success(&self) -> bool {
        self.kind == Outcome::Success
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            write!(f, "{}: {}", self.kind.as_str(), self.detail)
        }
    }
}

impl From<DatabaseError> for JobOutcome {
    /// A lock or IO hiccup in SQLite may clear up; corrupt rows will not.
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Corrupt { .. } | DatabaseError::Migration { .. } => {
                JobOutcome::fatal(err.to_string())
            }
            DatabaseError::RowMissing { .. } => JobOutcome::structural(err.to_string()),
            other => JobOutcome::retryable(other.to_string()),
        }
    }
}

impl From<QueueError> for JobOutcome {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Database(db) => db.into(),
            other => JobOutcome::fatal(other.to_string()),
        }
    }
}

impl From<StorageError> for JobOutcome {
    fn from(err: StorageError) -> Self {
        if err.is_retryable() || matches!(err, StorageError::Unavailable(_)) {
            JobOutcome::retryable(err.to_string())
        } else if err.is_not_found() {
            JobOutcome::structural(err.to_string())
        } else {
            JobOutcome::fatal(err.to_string())
        }
    }
}

impl From<ProviderError> for JobOutcome {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(_) => JobOutcome::retryable(err.to_string()),
            ProviderError::Rejected(_) => JobOutcome::fatal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_storage_errors_map_to_outcomes() {
        let busy = StorageError::Busy {
            path: PathBuf::from("/a"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "locked"),
        };
        assert_eq!(JobOutcome::from(busy).kind, Outcome::Retryable);
        assert_eq!(
            JobOutcome::from(StorageError::NotFound(PathBuf::from("/a"))).kind,
            Outcome::StructuralMismatch
        );
        assert_eq!(
            JobOutcome::from(StorageError::Unavailable("gdrive".into())).kind,
            Outcome::Retryable
        );
        assert_eq!(
            JobOutcome::from(StorageError::AlreadyExists(PathBuf::from("/a"))).kind,
            Outcome::Fatal
        );
    }

    #[test]
    fn test_provider_errors_map_to_outcomes() {
        assert_eq!(
            JobOutcome::from(ProviderError::Unavailable("timeout".into())).kind,
            Outcome::Retryable
        );
        assert_eq!(
            JobOutcome::from(ProviderError::Rejected("bad hash".into())).kind,
            Outcome::Fatal
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(JobOutcome::success().to_string(), "success");
        assert_eq!(
            JobOutcome::structural("placement 3 is gone").to_string(),
            "structural_mismatch: placement 3 is gone"
        );
    }
}
