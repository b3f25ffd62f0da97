use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::pipeline::{JobOutcome, Outcome, Pipeline};
use crate::queue::{CancellationToken, CommandQueue, Job};

/// What happened to one claimed job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub kind: &'static str,
    pub outcome: JobOutcome,
}

/// Fixed set of threads draining the command queue.
pub struct WorkerPool {
    report_receiver: Receiver<JobReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `worker_count` threads. Each claims jobs until shutdown,
    /// sleeping up to `poll_interval` when the queue is empty.
    pub fn start(
        pipeline: Pipeline,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed("worker_count must be > 0".to_string()));
        }
        let (report_sender, report_receiver) = bounded::<JobReport>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                pipeline: pipeline.clone(),
                reports: report_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                token: token.clone(),
                poll_interval,
            };
            let handle = thread::Builder::new()
                .name(format!("mediashelf-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            report_receiver,
            workers,
            shutdown,
            token,
        })
    }

    pub fn try_recv_report(&self) -> Option<JobReport> {
        self.report_receiver.try_recv().ok()
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<JobReport> {
        self.report_receiver.recv_timeout(timeout).ok()
    }

    /// Stops claiming and cancels running jobs' waits.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.token.cancel();
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    pipeline: Pipeline,
    reports: Sender<JobReport>,
    shutdown: Arc<AtomicBool>,
    token: CancellationToken,
    poll_interval: Duration,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);
        let queue = Arc::clone(&self.pipeline.context().queue);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match queue.claim() {
                Ok(Some(job)) => {
                    debug!("Worker {} running {}", self.id, job.kind);
                    let outcome = self.pipeline.run(&job, &self.token);
                    self.settle(&queue, &job, &outcome);
                    let report = JobReport {
                        job_id: job.id.clone(),
                        kind: job.kind.name(),
                        outcome,
                    };
                    // Reports are for observers; a full channel drops them.
                    let _ = self.reports.try_send(report);
                }
                Ok(None) => queue.wait_for_work(self.poll_interval),
                Err(e) => {
                    error!("Worker {} failed to claim a job: {}", self.id, e);
                    self.token.wait_timeout(self.poll_interval);
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    /// Applies the outcome to the queue: retryable failures use up an
    /// attempt and fatal ones are parked. Everything else is done.
    fn settle(&self, queue: &CommandQueue, job: &Job, outcome: &JobOutcome) {
        let result = match outcome.kind {
            Outcome::Retryable if self.token.is_cancelled() => {
                // Still marked running; the next open requeues it.
                debug!("{} interrupted by shutdown", job.kind);
                Ok(())
            }
            Outcome::Retryable => queue.fail(job, &outcome.detail).map(|_| ()),
            Outcome::Fatal => queue.park(job, &outcome.detail),
            Outcome::Success
            | Outcome::StructuralMismatch
            | Outcome::PolicyDeclined
            | Outcome::Deferred => queue.complete(job),
        };
        if let Err(e) = result {
            warn!("Worker {} could not settle {}: {}", self.id, job.kind, e);
        }
    }
}
