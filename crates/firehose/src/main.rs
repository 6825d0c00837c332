mod cli;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
use clap::Parser;
use cli::{Cmd, GlobalOpts, Opts, RunOpts};
use firehose_backfill::{BackfillConfig, BackfillController, BackfillError};
use firehose_core::{FirehoseEvent, SubjectId};
use firehose_fetch::{FetchConfig, Fetcher};
use firehose_identity::{IdentityConfig, IdentityError, Resolver};
use firehose_processor::{Processor, ProcessorConfig};
use firehose_store::{Store, StoreConfig, StoreError};
use firehose_stream::{StreamClient, StreamConfig};
use firehose_util_error::FmtCompact as _;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use time::OffsetDateTime;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const PROJECT_NAME: &str = "firehose";
pub const LOG_TARGET: &str = "firehose::cli";

type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("store initialization error: {source}"))]
    Store { source: StoreError },
    #[snafu(display("identity resolver initialization error: {source}"))]
    Identity { source: IdentityError },
    #[snafu(transparent)]
    Backfill { source: BackfillError },
    #[snafu(display("{source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    let opts = Opts::parse();
    init_logging(opts.global.log_level.as_deref()).context(WhateverSnafu)?;

    info!(
        target: LOG_TARGET,
        data_dir = %opts.global.data_dir().display(),
        "starting {}", PROJECT_NAME
    );

    let store = connect_store(&opts.global).await?;

    let result = match opts.cmd {
        Cmd::Run(run_opts) => {
            run(opts.global, run_opts, store).await?;
            serde_json::json!({"status": "stopped"})
        }
        Cmd::SetDataCollectionForbidden { subject, forbidden } => {
            let subject = SubjectId::new(subject);
            store.set_data_collection_forbidden(&subject, forbidden).await.context(StoreSnafu)?;
            info!(target: LOG_TARGET, subject = %subject, forbidden, "updated data-collection opt-out flag");
            serde_json::json!({"status": "ok", "subject": subject.to_string(), "forbidden": forbidden})
        }
    };

    println!("{}", serde_json::to_string_pretty(&result).expect("Can't fail"));
    Ok(())
}

async fn connect_store(opts: &GlobalOpts) -> CliResult<Arc<Store>> {
    let config = StoreConfig {
        store_url: opts.store_url.clone(),
        pool_size: opts.pool_size,
    };

    let store = (|| async { Store::connect(&config).await })
        .retry(ExponentialBuilder::default().with_max_times(opts.max_retry_attempts as usize))
        .notify(|err, _| warn!(target: LOG_TARGET, err = %err.fmt_compact(), "store connect attempt failed"))
        .await
        .context(StoreSnafu)?;

    store.run_migrations().await.context(StoreSnafu)?;

    Ok(Arc::new(store))
}

/// Wires C1-C6 together and runs until a shutdown signal is observed.
/// Per the cancellation contract: stop accepting new frames, let the
/// in-flight commit finish, persist the cursor, return.
async fn run(global: GlobalOpts, opts: RunOpts, store: Arc<Store>) -> CliResult<()> {
    let identity = Arc::new(Resolver::new(IdentityConfig::default()).context(IdentitySnafu)?);

    let processor = Processor::new(
        ProcessorConfig {
            max_concurrent_subject_creations: opts.max_concurrent_user_creations,
            ..Default::default()
        },
        store.clone(),
        identity.clone(),
    );

    let fetcher = Arc::new(Fetcher::new(
        FetchConfig {
            max_retries: global.max_retry_attempts,
            ..Default::default()
        },
        identity.clone(),
        store.clone(),
        processor.clone(),
    ));
    processor.set_fetcher(Arc::downgrade(&fetcher));

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(shutdown.clone());

    tokio::spawn({
        let processor = processor.clone();
        async move { processor.run_pending_sweeper().await }
    });
    tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.run().await }
    });

    let live_cursor = store.load_cursor(&opts.service_name).await.context(StoreSnafu)?;
    let last_seq = Arc::new(AtomicU64::new(live_cursor.unwrap_or(0)));

    let cursor_task = tokio::spawn(save_cursor_periodically(
        store.clone(),
        opts.service_name.clone(),
        last_seq.clone(),
        Duration::from_secs(opts.cursor_save_interval_sec),
        shutdown.clone(),
    ));

    let stream_handle = {
        let stream = StreamClient::new(StreamConfig {
            relay_url: opts.relay_url.clone(),
            ..Default::default()
        });
        let processor = processor.clone();
        let last_seq = last_seq.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            stream
                .run(
                    live_cursor,
                    |event: FirehoseEvent| {
                        let processor = processor.clone();
                        let last_seq = last_seq.clone();
                        async move {
                            let seq = event.seq();
                            processor.handle_event(event).await;
                            last_seq.store(seq, Ordering::Relaxed);
                            seq
                        }
                    },
                    move || shutdown.load(Ordering::Relaxed),
                )
                .await;
        })
    };

    let backfill_handle = (opts.backfill_days != 0).then(|| {
        let backfill = BackfillController::new(
            StreamClient::new(StreamConfig {
                relay_url: opts.relay_url.clone(),
                ..Default::default()
            }),
            store.clone(),
            processor.clone(),
            BackfillConfig {
                backfill_days: opts.backfill_days,
                batch_size: opts.batch_size,
                batch_delay: Duration::from_millis(opts.batch_delay_ms),
                max_memory_mb: opts.max_memory_mb,
                ..Default::default()
            },
        );
        let shutdown = shutdown.clone();
        tokio::spawn(async move { backfill.run(move || shutdown.load(Ordering::Relaxed)).await })
    });

    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!(target: LOG_TARGET, "shutdown signal received, draining");

    let _ = stream_handle.await;
    if let Some(handle) = backfill_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(target: LOG_TARGET, err = %err.fmt_compact(), "backfill run ended with an error"),
            Err(err) => warn!(target: LOG_TARGET, err = %err.fmt_compact(), "backfill task panicked"),
        }
    }
    let _ = cursor_task.await;

    let seq = last_seq.load(Ordering::Relaxed);
    if seq > 0 {
        store
            .save_cursor(&opts.service_name, seq, OffsetDateTime::now_utc())
            .await
            .context(StoreSnafu)?;
    }

    info!(target: LOG_TARGET, "shutdown complete");
    Ok(())
}

async fn save_cursor_periodically(
    store: Arc<Store>,
    service_name: String,
    last_seq: Arc<AtomicU64>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let seq = last_seq.load(Ordering::Relaxed);
        if seq > 0 {
            if let Err(err) = store.save_cursor(&service_name, seq, OffsetDateTime::now_utc()).await {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "failed to persist live cursor");
            }
        }
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
    }
}

fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!(target: LOG_TARGET, "received shutdown signal");
        shutdown.store(true, Ordering::Relaxed);
    });
}

pub fn init_logging(log_level: Option<&str>) -> WhateverResult<()> {
    let default_directive = log_level.and_then(|s| s.parse::<LevelFilter>().ok()).unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_directive.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("Failed to initialize logging".to_string()))?;

    Ok(())
}
