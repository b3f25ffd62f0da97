use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::broadcast;

use mediashelf::config::load_config;
use mediashelf::error::{ConfigError, WorkerError};
use mediashelf::logging::init_logging;
use mediashelf::queue::JobKind;
use mediashelf::scheduler::Scheduler;
use mediashelf::{scanner, Pipeline, PipelineConfig, PipelineContext, WorkerPool};

fn main() {
    if let Err(e) = run() {
        eprintln!("mediashelfd: {}", e);
        std::process::exit(1);
    }
}

fn run() -> mediashelf::Result<()> {
    let config_path = std::env::args().nth(1).ok_or_else(|| ConfigError::Validation {
        message: "usage: mediashelfd <config.json>".to_string(),
    })?;
    let config = load_config(&config_path)?;
    init_logging(&config.logging)?;

    info!("Starting mediashelfd v{}", env!("CARGO_PKG_VERSION"));

    let ctx = PipelineContext::open(&config)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .map_err(|e| WorkerError::SpawnFailed(format!("signal handler: {}", e)))?;
    }

    let pool = WorkerPool::start(
        Pipeline::new(ctx.clone()),
        config.worker_count,
        Duration::from_millis(config.queue.poll_interval_ms),
    )?;

    let scheduler = Scheduler::new(ctx.clone(), &config.schedule);
    let (trigger_tx, trigger_rx) = broadcast::channel(4);
    let scheduler_handle = scheduler.start(trigger_rx);

    ctx.enqueue(JobKind::ScanNewFiles);

    let watch_handle = if config.scan.watch {
        let locations = ctx.store.all_locations()?;
        let pipeline_config = PipelineConfig::from_config(&config)?;
        let debounce = Duration::from_millis(config.scan.watch_debounce_ms);
        let watch_ctx = ctx.clone();
        let watch_shutdown = Arc::clone(&shutdown);
        Some(std::thread::spawn(move || {
            let result = scanner::watch(
                &locations,
                &pipeline_config,
                debounce,
                move |location, relative_path| {
                    watch_ctx.enqueue(JobKind::HashFile {
                        location_id: location.id,
                        relative_path,
                        force: false,
                    });
                },
                watch_shutdown,
            );
            if let Err(e) = result {
                error!("Watch mode stopped: {}", e);
            }
        }))
    } else {
        None
    };

    info!("mediashelfd running, press Ctrl-C to stop");
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
        while pool.try_recv_report().is_some() {}
    }

    info!("Shutting down...");
    scheduler.stop();
    let _ = trigger_tx.send(());
    pool.shutdown();

    if scheduler_handle.join().is_err() {
        error!("Scheduler thread panicked");
    }
    if let Some(handle) = watch_handle {
        if handle.join().is_err() {
            error!("Watch thread panicked");
        }
    }
    pool.wait();

    info!("mediashelfd stopped");
    Ok(())
}
