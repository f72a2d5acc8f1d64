// Daemon wiring: registries, inspection surface, scheduler, worker
// pool, and the change-notification dispatcher.
//
// The kernel is an explicit value assembled here once and handed to
// each component; nothing is constructed at import time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::extract::ExtractorRegistry;
use crate::kernel::{Kernel, KernelContext};
use crate::notify::{self, ChangeEvent, Dispatcher, HandlerRegistry};
use crate::scheduler::Scheduler;
use crate::storage::{DummyStorage, FsStorage, StorageRegistry};
use crate::store::MetaDb;
use crate::versioning::VersioningRegistry;
use crate::web;
use crate::worker::Worker;

const JOB_CHANNEL_CAPACITY: usize = 1024;

/// Built-in storage backends: `dummy` (testing) and `fs` (production).
pub fn default_storage(config: &DaemonConfig) -> Result<StorageRegistry> {
    let mut registry = StorageRegistry::new();
    registry.register("dummy", Arc::new(DummyStorage::new()));
    registry.register(
        "fs",
        Arc::new(FsStorage::new(config.blob_root()).context("failed to initialize fs storage")?),
    );
    Ok(registry)
}

/// Built-in change handlers. Deployments register their own (search
/// pushers and the like) through [`run_with_registries`].
pub fn builtin_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::default();
    registry.register(
        "log",
        Arc::new(|event: &ChangeEvent| -> anyhow::Result<()> {
            info!(doc_id = %event.doc_id, "document changed");
            Ok(())
        }),
    );
    registry
}

/// Assemble the shared kernel context, plus the dispatcher feeding the
/// given handler registry.
pub fn build_context(
    config: &DaemonConfig,
    handlers: HandlerRegistry,
) -> Result<(KernelContext, Dispatcher)> {
    let (notifications, dispatcher) = notify::channel(handlers);
    let ctx = KernelContext {
        doc_classes: Arc::new(config.doc_classes.clone()),
        default_storage_engine: config.default_storage_engine.clone(),
        storage: default_storage(config)?,
        versioning: Arc::new(VersioningRegistry::with_defaults()),
        extractors: Arc::new(ExtractorRegistry::with_defaults()),
        notifications,
        retry_attempts: config.retry_attempts,
        retry_wait_minutes: config.retry_wait_minutes,
        log_maxsize: config.log_maxsize,
    };
    ctx.validate()?;
    Ok((ctx, dispatcher))
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    run_with_registries(config, builtin_handlers()).await
}

pub async fn run_with_registries(config: DaemonConfig, handlers: HandlerRegistry) -> Result<()> {
    let (ctx, dispatcher) = build_context(&config, handlers)?;

    let (shutdown_tx, _) = broadcast::channel(4);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(());
    });

    let dispatcher_task = tokio::spawn(dispatcher.run());

    let web_db = MetaDb::open(config.db_path())?;
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind inspection surface at `{}`", config.listen))?;
    info!(listen = %config.listen, "inspection surface started");
    let web_task = tokio::spawn(web::serve(listener, web_db, shutdown_tx.subscribe()));

    let (jobs_tx, jobs_rx) = mpsc::channel(JOB_CHANNEL_CAPACITY);
    let shared_jobs = Arc::new(Mutex::new(jobs_rx));

    let mut worker_tasks = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let kernel = Kernel::open(&config, ctx.clone())?;
        worker_tasks.push(tokio::spawn(Worker::new(id, kernel, Arc::clone(&shared_jobs)).run()));
    }
    info!(workers = config.workers, tick_secs = config.tick_secs, "update workers started");

    let scheduler_db = MetaDb::open(config.db_path())?;
    let scheduler = Scheduler::new(scheduler_db, jobs_tx, Duration::from_secs(config.tick_secs));
    scheduler.run(shutdown_tx.subscribe()).await;

    // The scheduler owned the last job sender: the channel is closed
    // now, and workers drain whatever is still queued before exiting.
    for task in worker_tasks {
        if let Err(error) = task.await {
            warn!(%error, "worker task panicked");
        }
    }

    // Worker kernels are gone; dropping our context closes the
    // notification channel so the dispatcher drains and exits.
    drop(ctx);
    if let Err(error) = dispatcher_task.await {
        warn!(%error, "dispatcher task panicked");
    }

    if let Err(error) = web_task.await.context("inspection surface task panicked")? {
        warn!(%error, "inspection surface exited with error");
    }

    info!("daemon stopped");
    Ok(())
}
