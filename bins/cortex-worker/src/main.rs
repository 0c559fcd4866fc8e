mod engine;
mod executor;
mod workspace;


use anyhow::Context;
use cortex_common::config::Config;
use cortex_common::profile::ProfileRegistry;
use cortex_common::queue::TaskQueue;
use cortex_common::redis::{self as cortex_redis, RedisLedger, RedisProgressSink, RedisResultStore, RedisTaskQueue};
use engine::DockerEngine;
use executor::Processor;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use workspace::Provisioner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(config.json_logs);

    info!("Cortex Worker booting...");

    let profiles = ProfileRegistry::load(&config.language_config_path).map_err(|e| {
        error!("Failed to load language profiles: {}", e);
        error!("Make sure {} exists", config.language_config_path.display());
        e
    })?;
    info!("Loaded language profiles for: {:?}", profiles.languages());

    let shared_conn = cortex_redis::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!("Connected to Redis: {}", config.redis_url);

    let engine = DockerEngine::new()?;
    let processor = Processor::new(
        Arc::new(profiles),
        Arc::new(Provisioner::new(&config.exercises_root, &config.workspace_root)),
        Arc::new(engine),
        Arc::new(RedisResultStore::new(shared_conn.clone())),
        Arc::new(RedisLedger::new(shared_conn.clone())),
        Arc::new(RedisProgressSink::new(shared_conn)),
        config.result_ttl,
    );

    info!(
        concurrency = config.worker_concurrency,
        workspace_root = %config.workspace_root.display(),
        "Worker pool starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = JoinSet::new();
    for worker_id in 0..config.worker_concurrency {
        // BLPOP blocks its connection, so each worker gets its own
        let conn = cortex_redis::connect(&config.redis_url).await?;
        let queue = RedisTaskQueue::new(conn);
        workers.spawn(worker_loop(
            worker_id,
            queue,
            processor.clone(),
            config.queue_poll,
            shutdown_rx.clone(),
        ));
    }

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Received shutdown signal, finishing in-flight tasks...");
        }
        _ = workers.join_next() => {
            warn!("A worker exited unexpectedly, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[instrument(skip(queue, processor, poll, shutdown))]
async fn worker_loop(
    worker_id: usize,
    queue: RedisTaskQueue,
    processor: Processor,
    poll: Duration,
    shutdown: watch::Receiver<bool>,
) {
    // Pop is never cancelled; shutdown waits at most one poll interval
    while !*shutdown.borrow() {
        match queue.pop(poll).await {
            Ok(Some(task)) => {
                info!(
                    task_id = %task.task_id,
                    language = %task.request.language,
                    exercise_id = task.request.exercise_id,
                    source_size = task.request.code.len(),
                    "Received task"
                );
                // Once dequeued, a task always runs to completion
                let task_id = task.task_id;
                if let Err(e) = processor.process_isolated(task).await {
                    error!(task_id = %task_id, error = %e, "Failed to persist result");
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!("Worker stopped");
}
