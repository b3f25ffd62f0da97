//! Durable, priority-ordered command queue.
//!
//! Jobs are rows in the `jobs` table. Claiming happens under the database
//! lock, so a running job is never handed to two workers. Enqueuing wakes
//! idle workers through a small crossbeam channel; workers also poll, so a
//! lost wake-up only costs one poll interval.

mod cancel;
mod job;

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::db::job_repo::{self, JobRow, STATUS_FAILED, STATUS_PENDING, STATUS_RUNNING};
use crate::db::{content_repo::parse_time, Database};
use crate::error::QueueError;

pub use cancel::CancellationToken;
pub use job::{Job, JobKind, JobStatus, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued(String),
    /// A job with the same signature is already pending or running.
    AlreadyQueued,
}

impl EnqueueResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueResult::Queued(_))
    }
}

pub struct CommandQueue {
    db: Database,
    max_attempts: u32,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CommandQueue {
    /// Opens the queue and requeues anything a crashed process left running.
    pub fn open(db: Database, max_attempts: u32) -> Result<Self, QueueError> {
        let (wake_tx, wake_rx) = bounded(1);
        let queue = Self {
            db,
            max_attempts: max_attempts.max(1),
            wake_tx,
            wake_rx,
        };
        let recovered = queue.recover_interrupted()?;
        if recovered > 0 {
            info!("Requeued {} interrupted jobs", recovered);
        }
        Ok(queue)
    }

    pub fn enqueue(&self, job: Job) -> Result<EnqueueResult, QueueError> {
        let signature = job.kind.signature()?;
        let mut row = JobRow {
            id: job.id.clone(),
            seq: 0,
            kind: job.kind.name().to_string(),
            payload: job.kind.payload()?,
            signature: signature.clone(),
            priority: job.priority.as_u8(),
            status: STATUS_PENDING.to_string(),
            attempts: 0,
            max_attempts: if job.max_attempts == 0 {
                self.max_attempts
            } else {
                job.max_attempts
            },
            last_error: None,
            created_at: job.created_at.to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };

        let inserted = self.db.with_conn(|conn| {
            if job_repo::signature_active(conn, &signature)? {
                return Ok(false);
            }
            job_repo::insert(conn, &mut row)?;
            Ok(true)
        })?;

        if !inserted {
            debug!("Skipping duplicate job {}", job.kind);
            return Ok(EnqueueResult::AlreadyQueued);
        }

        debug!("Queued {} at priority {:?}", job.kind, job.priority);
        let _ = self.wake_tx.try_send(());
        Ok(EnqueueResult::Queued(job.id))
    }

    /// Shorthand for enqueuing a kind at its default priority.
    pub fn submit(&self, kind: JobKind) -> Result<EnqueueResult, QueueError> {
        self.enqueue(Job::new(kind))
    }

    /// Takes the next pending job and marks it running.
    pub fn claim(&self) -> Result<Option<Job>, QueueError> {
        let row = self.db.with_conn(job_repo::claim_next)?;
        match row {
            Some(row) => Ok(Some(self.decode(row)?)),
            None => Ok(None),
        }
    }

    /// Blocks up to `timeout` for an enqueue notification.
    pub fn wait_for_work(&self, timeout: Duration) {
        let _ = self.wake_rx.recv_timeout(timeout);
    }

    /// Removes a finished job.
    pub fn complete(&self, job: &Job) -> Result<(), QueueError> {
        self.db.with_conn(|conn| job_repo::delete(conn, &job.id))?;
        Ok(())
    }

    /// Records a failed attempt. Requeues the job until it reaches its
    /// attempt cap, then parks it as failed. Returns the new status.
    pub fn fail(&self, job: &Job, error: &str) -> Result<JobStatus, QueueError> {
        let attempts = job.attempts + 1;
        let status = if attempts >= job.max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        };
        let found = self.db.with_conn(|conn| {
            job_repo::record_failure(conn, &job.id, attempts, status.as_str(), error)
        })?;
        if !found {
            return Err(QueueError::NotFound(job.id.clone()));
        }

        match status {
            JobStatus::Failed => warn!(
                "{} failed after {} attempts, parking: {}",
                job.kind, attempts, error
            ),
            _ => {
                debug!("{} attempt {} failed, requeued: {}", job.kind, attempts, error);
                let _ = self.wake_tx.try_send(());
            }
        }
        Ok(status)
    }

    /// Parks a job as failed without using up its remaining attempts.
    pub fn park(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let found = self.db.with_conn(|conn| {
            job_repo::record_failure(conn, &job.id, job.attempts + 1, STATUS_FAILED, error)
        })?;
        if !found {
            return Err(QueueError::NotFound(job.id.clone()));
        }
        warn!("{} parked: {}", job.kind, error);
        Ok(())
    }

    /// Revives one parked job. Returns false when it was not failed, or
    /// when an identical job is already queued (the parked copy is then
    /// dropped).
    pub fn retry_failed(&self, id: &str) -> Result<bool, QueueError> {
        let revived = self
            .db
            .with_transaction(|tx| job_repo::revive_failed(tx, Some(id)))?;
        if revived > 0 {
            let _ = self.wake_tx.try_send(());
        }
        Ok(revived > 0)
    }

    pub fn retry_all_failed(&self) -> Result<usize, QueueError> {
        let revived = self
            .db
            .with_transaction(|tx| job_repo::revive_failed(tx, None))?;
        if revived > 0 {
            info!("Revived {} failed jobs", revived);
            let _ = self.wake_tx.try_send(());
        }
        Ok(revived)
    }

    pub fn recover_interrupted(&self) -> Result<usize, QueueError> {
        Ok(self.db.with_conn(job_repo::reset_running)?)
    }

    pub fn pending_count(&self) -> Result<u64, QueueError> {
        Ok(self
            .db
            .with_conn(|conn| job_repo::count_by_status(conn, STATUS_PENDING))?)
    }

    pub fn running_count(&self) -> Result<u64, QueueError> {
        Ok(self
            .db
            .with_conn(|conn| job_repo::count_by_status(conn, STATUS_RUNNING))?)
    }

    pub fn pending_jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.jobs_with_status(STATUS_PENDING)
    }

    pub fn failed_jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.jobs_with_status(STATUS_FAILED)
    }

    pub fn clear_failed(&self) -> Result<usize, QueueError> {
        Ok(self
            .db
            .with_conn(|conn| job_repo::delete_by_status(conn, STATUS_FAILED))?)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let row = self.db.with_conn(|conn| job_repo::find_by_id(conn, id))?;
        row.map(|r| self.decode(r)).transpose()
    }

    fn jobs_with_status(&self, status: &str) -> Result<Vec<Job>, QueueError> {
        let rows = self
            .db
            .with_conn(|conn| job_repo::list_by_status(conn, status))?;
        rows.into_iter().map(|r| self.decode(r)).collect()
    }

    fn decode(&self, row: JobRow) -> Result<Job, QueueError> {
        let kind: JobKind = serde_json::from_str(&row.payload)?;
        Ok(Job {
            id: row.id,
            kind,
            priority: Priority::from_u8(row.priority),
            seq: row.seq,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::Pending),
            last_error: row.last_error,
            created_at: parse_time(&row.created_at),
        })
    }
}
