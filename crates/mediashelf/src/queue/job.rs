use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claim order tier. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    Normal = 2,
    Low = 4,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a stored value back, rounding unknown values to the nearest tier.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 | 1 => Priority::High,
            2 | 3 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

/// Every unit of background work the pipeline knows how to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JobKind {
    HashFile {
        location_id: i64,
        relative_path: String,
        #[serde(default)]
        force: bool,
    },
    ProcessFile {
        content_id: i64,
    },
    MoveFile {
        placement_id: i64,
    },
    DownloadImage {
        series_id: i64,
    },
    SyncExternalCatalog,
    DeleteExternalReference {
        hash: String,
        size: u64,
    },
    UpdateSeriesStats {
        series_id: i64,
    },
    RecalculateGroupFilter,
    ScanLocation {
        location_id: i64,
    },
    ScanDropSources,
    ScanNewFiles,
    Reconcile,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::HashFile { .. } => "HashFile",
            JobKind::ProcessFile { .. } => "ProcessFile",
            JobKind::MoveFile { .. } => "MoveFile",
            JobKind::DownloadImage { .. } => "DownloadImage",
            JobKind::SyncExternalCatalog => "SyncExternalCatalog",
            JobKind::DeleteExternalReference { .. } => "DeleteExternalReference",
            JobKind::UpdateSeriesStats { .. } => "UpdateSeriesStats",
            JobKind::RecalculateGroupFilter => "RecalculateGroupFilter",
            JobKind::ScanLocation { .. } => "ScanLocation",
            JobKind::ScanDropSources => "ScanDropSources",
            JobKind::ScanNewFiles => "ScanNewFiles",
            JobKind::Reconcile => "Reconcile",
        }
    }

    pub fn default_priority(&self) -> Priority {
        match self {
            JobKind::ProcessFile { .. } => Priority::High,
            JobKind::HashFile { .. }
            | JobKind::MoveFile { .. }
            | JobKind::UpdateSeriesStats { .. }
            | JobKind::ScanLocation { .. } => Priority::Normal,
            JobKind::DownloadImage { .. }
            | JobKind::SyncExternalCatalog
            | JobKind::DeleteExternalReference { .. }
            | JobKind::RecalculateGroupFilter
            | JobKind::ScanDropSources
            | JobKind::ScanNewFiles
            | JobKind::Reconcile => Priority::Low,
        }
    }

    /// Serialized form stored in the `payload` column.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `kind:payload`. Two jobs with the same signature do the same work.
    pub fn signature(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}:{}", self.name(), self.payload()?))
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::HashFile { location_id, relative_path, .. } => {
                write!(f, "HashFile({}:{})", location_id, relative_path)
            }
            JobKind::ProcessFile { content_id } => write!(f, "ProcessFile({})", content_id),
            JobKind::MoveFile { placement_id } => write!(f, "MoveFile({})", placement_id),
            JobKind::DownloadImage { series_id } => write!(f, "DownloadImage({})", series_id),
            JobKind::DeleteExternalReference { hash, size } => {
                write!(f, "DeleteExternalReference({}, {})", hash, size)
            }
            JobKind::UpdateSeriesStats { series_id } => {
                write!(f, "UpdateSeriesStats({})", series_id)
            }
            JobKind::ScanLocation { location_id } => write!(f, "ScanLocation({})", location_id),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub priority: Priority,
    pub seq: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A new job at its kind's default priority. `max_attempts` of zero
    /// means "use the queue's configured cap".
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            priority: kind.default_priority(),
            kind,
            seq: 0,
            attempts: 0,
            max_attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}
