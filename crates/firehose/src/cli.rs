use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::{Args, Parser, Subcommand};

static PROJECT_DIRS: LazyLock<directories::ProjectDirs> = LazyLock::new(|| {
    directories::ProjectDirs::from("org", "Firehose", "firehose")
        .expect("Unable to determine project's dir")
});

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Options every subcommand needs: store connectivity and the ambient
/// logging/data-dir surface (§1.1, §1.3).
#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Relational store connection string.
    #[arg(long, env = "FIREHOSE_STORE_URL")]
    pub store_url: String,

    /// Connections to the store.
    #[arg(long, env = "FIREHOSE_POOL_SIZE", default_value_t = 10)]
    pub pool_size: usize,

    /// Retry ceiling for store connect and remote record fetch.
    #[arg(long, env = "FIREHOSE_MAX_RETRY_ATTEMPTS", default_value_t = 3)]
    pub max_retry_attempts: u32,

    /// Overrides `RUST_LOG`'s default directive when neither is set.
    #[arg(long, env = "FIREHOSE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Local scratch directory; defaults to the platform data dir.
    #[arg(long, env = "FIREHOSE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl GlobalOpts {
    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or_else(|| PROJECT_DIRS.data_local_dir())
    }
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Runs live ingest (and, if enabled, backfill) until a shutdown signal.
    Run(RunOpts),

    /// Sets or clears a subject's data-collection opt-out flag (§4.5.7).
    /// Out-of-band administrative action: nothing in the ingest path itself
    /// ever flips this flag, only reads it.
    SetDataCollectionForbidden {
        /// Subject id (did) to update.
        #[arg(long)]
        subject: String,

        /// Pass `--forbidden=false` to clear the flag instead of setting it.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        forbidden: bool,
    },
}

/// Configuration surface enumerated in the external-interfaces section:
/// every field is settable by flag or by its `env` variable, so the same
/// binary runs the same way from a shell or a container.
#[derive(Debug, Args)]
pub struct RunOpts {
    /// Upstream relay WebSocket base, e.g. `wss://bsky.network`.
    #[arg(long, env = "FIREHOSE_RELAY_URL", default_value = "wss://bsky.network")]
    pub relay_url: String,

    /// 0 disables backfill, -1 runs full history, N>0 bounds it to the
    /// last N days.
    #[arg(long, env = "FIREHOSE_BACKFILL_DAYS", default_value_t = 0)]
    pub backfill_days: i64,

    /// Backfill events applied per pacing cycle before sleeping.
    #[arg(long, env = "FIREHOSE_BATCH_SIZE", default_value_t = 5)]
    pub batch_size: u64,

    /// Backfill pacing delay, in milliseconds.
    #[arg(long, env = "FIREHOSE_BATCH_DELAY_MS", default_value_t = 2000)]
    pub batch_delay_ms: u64,

    /// Resident memory, in MB, above which backfill pauses.
    #[arg(long, env = "FIREHOSE_MAX_MEMORY_MB", default_value_t = 512)]
    pub max_memory_mb: u64,

    /// Cap on concurrent subject-row creations.
    #[arg(long, env = "FIREHOSE_MAX_CONCURRENT_USER_CREATIONS", default_value_t = 10)]
    pub max_concurrent_user_creations: usize,

    /// How often the live-ingest cursor is persisted, in seconds.
    #[arg(long, env = "FIREHOSE_CURSOR_SAVE_INTERVAL_SEC", default_value_t = 10)]
    pub cursor_save_interval_sec: u64,

    /// Cursor-row discriminator for this process.
    #[arg(long, env = "FIREHOSE_SERVICE_NAME", default_value = "live")]
    pub service_name: String,
}
