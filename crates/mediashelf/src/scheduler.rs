//! Periodic enqueuing of recurring work.
//!
//! Every tick checks each recurring task's last run (stored in
//! `scheduled_tasks`) against its minimum interval and enqueues the ones
//! that are due at low priority. A manual trigger runs the same check
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::config::ScheduleConfig;
use crate::pipeline::PipelineContext;
use crate::queue::{Job, JobKind, Priority};

pub const SCAN_NEW_FILES: &str = "scan_new_files";
pub const RECONCILE: &str = "reconcile";
pub const SYNC_EXTERNAL_CATALOG: &str = "sync_external_catalog";
pub const DAILY_FILTERS: &str = "daily_filters";

/// Ten years. Longer intervals are clamped.
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 86_400;

fn interval(units: u64, unit_secs: u64) -> chrono::Duration {
    let secs = units.saturating_mul(unit_secs).min(MAX_INTERVAL_SECS);
    chrono::Duration::seconds(secs as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Every(chrono::Duration),
    /// Once per UTC calendar day.
    Daily,
}

#[derive(Debug, Clone)]
struct RecurringTask {
    name: &'static str,
    kind: JobKind,
    cadence: Cadence,
}

impl RecurringTask {
    fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_run else {
            return true;
        };
        match self.cadence {
            Cadence::Every(interval) => now - last >= interval,
            Cadence::Daily => last.date_naive() != now.date_naive(),
        }
    }

    fn min_interval_secs(&self) -> i64 {
        match self.cadence {
            Cadence::Every(interval) => interval.num_seconds(),
            Cadence::Daily => 86_400,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: PipelineContext,
    tasks: Vec<RecurringTask>,
    tick: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Intervals of zero disable the corresponding task.
    pub fn new(ctx: PipelineContext, config: &ScheduleConfig) -> Self {
        let mut tasks = Vec::new();
        let mut every = |name: &'static str, kind: JobKind, period: chrono::Duration| {
            if period > chrono::Duration::zero() {
                tasks.push(RecurringTask {
                    name,
                    kind,
                    cadence: Cadence::Every(period),
                });
            }
        };
        every(
            SCAN_NEW_FILES,
            JobKind::ScanNewFiles,
            interval(config.scan_interval_minutes, 60),
        );
        every(
            RECONCILE,
            JobKind::Reconcile,
            interval(config.reconcile_interval_hours, 3600),
        );
        every(
            SYNC_EXTERNAL_CATALOG,
            JobKind::SyncExternalCatalog,
            interval(config.external_sync_interval_hours, 3600),
        );
        if config.daily_filters {
            tasks.push(RecurringTask {
                name: DAILY_FILTERS,
                kind: JobKind::RecalculateGroupFilter,
                cadence: Cadence::Daily,
            });
        }

        Self {
            ctx,
            tasks,
            tick: Duration::from_secs(config.tick_seconds.max(1)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues every task due at `now` and records the run. Returns the
    /// names of the tasks that were enqueued.
    pub fn run_due_tasks(&self, now: DateTime<Utc>) -> Vec<&'static str> {
        let mut ran = Vec::new();
        for task in &self.tasks {
            let last_run = match self.ctx.store.get_task(task.name) {
                Ok(record) => record.and_then(|t| t.last_run),
                Err(e) => {
                    log::warn!("Cannot read schedule for {}: {}", task.name, e);
                    continue;
                }
            };
            if !task.is_due(last_run, now) {
                continue;
            }

            let job = Job::new(task.kind.clone()).with_priority(Priority::Low);
            if let Err(e) = self.ctx.queue.enqueue(job) {
                log::warn!("Failed to enqueue scheduled {}: {}", task.name, e);
                continue;
            }
            if let Err(e) = self
                .ctx
                .store
                .record_task_run(task.name, now, task.min_interval_secs())
            {
                log::warn!("Failed to record run of {}: {}", task.name, e);
            }
            log::debug!("Scheduled {}", task.name);
            ran.push(task.name);
        }
        ran
    }

    /// Runs the tick loop in a background thread. A message on
    /// `trigger_rx` checks the schedule immediately.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = self.clone();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Scheduler runtime failed to start: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(scheduler.tick);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if scheduler.shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual schedule check triggered");
                        },
                    }

                    if scheduler.shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let ran = scheduler.run_due_tasks(Utc::now());
                    if !ran.is_empty() {
                        log::info!("Scheduled tasks enqueued: {}", ran.join(", "));
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
