//! Backfill controller (C6): drives the same stream client and processor
//! as live ingest, but against an explicit starting cursor, with a
//! `createdAt` age filter, batch pacing and a memory-pressure throttle.
//! Grounded on SPEC_FULL.md §4.6; the ingest path itself (connect, decode,
//! dispatch) is entirely reused from C4/C5 — this crate only adds the
//! filter/pacing/throttle wrapped around [`firehose_stream::StreamClient::run`]'s
//! per-event callback.

pub mod error;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub use error::{BackfillError, BackfillResult};
use firehose_core::{CommitEvent, Cursor, FirehoseEvent};
use firehose_processor::Processor;
use firehose_store::Store;
use firehose_stream::StreamClient;
use firehose_util_error::FmtCompact as _;
use firehose_util_fmt::format_bytes;
use snafu::ResultExt as _;
use sysinfo::{Pid, System};
use time::OffsetDateTime;
use tracing::{info, warn};

pub const LOG_TARGET: &str = "firehose::backfill";

/// Cursor-row service name for the backfill run, distinct from live
/// ingest's own cursor row (§4.6 "concurrency with live ingest").
pub const CURSOR_SERVICE: &str = "backfill";

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// 0 disables backfill entirely, -1 means full history, N>0 bounds the
    /// window to the last N days.
    pub backfill_days: i64,
    pub batch_size: u64,
    pub batch_delay: Duration,
    pub max_memory_mb: u64,
    pub max_events_per_run: u64,
    pub progress_log_interval: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            backfill_days: 0,
            batch_size: 5,
            batch_delay: Duration::from_millis(2000),
            max_memory_mb: 512,
            max_events_per_run: 1_000_000,
            progress_log_interval: 1000,
        }
    }
}

#[derive(Default)]
struct Stats {
    received: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
}

pub struct BackfillController {
    store: std::sync::Arc<Store>,
    processor: std::sync::Arc<Processor>,
    stream: StreamClient,
    config: BackfillConfig,
    cutoff: Option<OffsetDateTime>,
    stats: Stats,
    sys: Mutex<System>,
    pid: Option<Pid>,
}

impl BackfillController {
    pub fn new(
        stream: StreamClient,
        store: std::sync::Arc<Store>,
        processor: std::sync::Arc<Processor>,
        config: BackfillConfig,
    ) -> Self {
        let cutoff = (config.backfill_days > 0)
            .then(|| OffsetDateTime::now_utc() - time::Duration::days(config.backfill_days));
        Self {
            store,
            processor,
            stream,
            config,
            cutoff,
            stats: Stats::default(),
            sys: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Runs the backfill to completion: either `should_stop` returns true,
    /// the safety cap is hit, or the upstream connection is exhausted.
    /// Returns once `firehose_stream::StreamClient::run` returns.
    pub async fn run(&self, mut should_stop: impl FnMut() -> bool + Send) -> BackfillResult<()> {
        if self.config.backfill_days == 0 {
            info!(target: LOG_TARGET, "backfill disabled (backfill-days = 0)");
            return Ok(());
        }

        let cursor = self.store.load_cursor(CURSOR_SERVICE).await.context(error::LoadCursorSnafu)?;
        info!(target: LOG_TARGET, cursor = ?cursor, days = self.config.backfill_days, "starting backfill run");

        let max_events = self.config.max_events_per_run;
        let combined_stop = || should_stop() || self.stats.received.load(Ordering::Relaxed) >= max_events;

        self.stream.run(cursor, |event| self.handle_event(event), combined_stop).await;

        self.log_progress(true).await;
        Ok(())
    }

    async fn handle_event(&self, event: FirehoseEvent) -> Cursor {
        let seq = event.seq();
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let event = self.apply_age_filter(event);
        if let Some(event) = event {
            self.processor.handle_event(event).await;
            let processed = self.stats.processed.fetch_add(1, Ordering::Relaxed) + 1;

            if processed % self.config.batch_size == 0 {
                tokio::task::yield_now().await;
                tokio::time::sleep(self.config.batch_delay).await;
            }
            if processed % 100 == 0 {
                self.throttle_memory().await;
            }
        }

        let received = self.stats.received.load(Ordering::Relaxed);
        if received % self.config.progress_log_interval == 0 {
            self.log_progress(false).await;
            if let Err(err) = self.store.save_cursor(CURSOR_SERVICE, seq, OffsetDateTime::now_utc()).await {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "failed to persist backfill cursor");
            }
        }

        seq
    }

    /// Drops ops whose record is older than the configured cutoff,
    /// counting each as skipped. A commit left with no ops after filtering
    /// is dropped entirely rather than handed to the processor. Identity
    /// and account events have no age to judge and always pass through.
    fn apply_age_filter(&self, event: FirehoseEvent) -> Option<FirehoseEvent> {
        let Some(cutoff) = self.cutoff else {
            return Some(event);
        };
        let FirehoseEvent::Commit(CommitEvent { seq, repo, ops }) = event else {
            return Some(event);
        };

        let mut kept = Vec::with_capacity(ops.len());
        for op in ops {
            if op_is_recent_enough(op.record.as_ref().and_then(|r| r.created_at_raw()), cutoff) {
                kept.push(op);
            } else {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if kept.is_empty() {
            None
        } else {
            Some(FirehoseEvent::Commit(CommitEvent { seq, repo, ops: kept }))
        }
    }

    async fn throttle_memory(&self) {
        let mut first_pause = true;
        loop {
            let mb = self.resident_mb();
            if mb <= self.config.max_memory_mb {
                return;
            }
            warn!(
                target: LOG_TARGET,
                resident = %format_bytes(mb * 1024 * 1024),
                limit_mb = self.config.max_memory_mb,
                "memory over threshold, pausing backfill"
            );
            tokio::time::sleep(if first_pause { Duration::from_secs(5) } else { Duration::from_secs(10) }).await;
            first_pause = false;
        }
    }

    fn resident_mb(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_process(pid);
        sys.process(pid).map(|p| p.memory() / (1024 * 1024)).unwrap_or(0)
    }

    async fn log_progress(&self, final_report: bool) {
        let received = self.stats.received.load(Ordering::Relaxed);
        let processed = self.stats.processed.load(Ordering::Relaxed);
        let skipped = self.stats.skipped.load(Ordering::Relaxed);
        info!(target: LOG_TARGET, received, processed, skipped, final_report, "backfill progress");
    }
}

/// An op with no parseable `createdAt` is kept rather than skipped: the age
/// filter is a best-effort window, not a correctness guarantee, and a
/// record we can't date shouldn't silently vanish from the backfill.
fn op_is_recent_enough(created_at_raw: Option<&str>, cutoff: Option<OffsetDateTime>) -> bool {
    let Some(cutoff) = cutoff else {
        return true;
    };
    created_at_raw.and_then(firehose_core::parse_rfc3339).map(|ts| ts >= cutoff).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cutoff_keeps_everything() {
        assert!(op_is_recent_enough(Some("2000-01-01T00:00:00Z"), None));
        assert!(op_is_recent_enough(None, None));
    }

    #[test]
    fn unparseable_or_missing_timestamp_is_kept() {
        let cutoff = OffsetDateTime::now_utc();
        assert!(op_is_recent_enough(None, Some(cutoff)));
        assert!(op_is_recent_enough(Some("not a date"), Some(cutoff)));
    }

    #[test]
    fn older_than_cutoff_is_dropped() {
        let cutoff = OffsetDateTime::now_utc();
        let old = cutoff - time::Duration::days(10);
        let old_str = old.format(&time::format_description::well_known::Rfc3339).unwrap();
        assert!(!op_is_recent_enough(Some(&old_str), Some(cutoff)));
    }

    #[test]
    fn newer_than_cutoff_is_kept() {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(30);
        let recent = OffsetDateTime::now_utc();
        let recent_str = recent.format(&time::format_description::well_known::Rfc3339).unwrap();
        assert!(op_is_recent_enough(Some(&recent_str), Some(cutoff)));
    }

    #[test]
    fn default_config_disables_backfill() {
        assert_eq!(BackfillConfig::default().backfill_days, 0);
    }
}
