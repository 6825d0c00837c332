//! Dependency-deferred execution (§4.5.4): three queues, each keyed by the
//! entity an op is waiting on, flushed when that entity is created and
//! swept for entries older than the TTL. Modeled as maps of `Vec` rather
//! than the teacher's `dedup_chan` wakeup channel, since here the wakeup
//! source is "this specific key just got created", not "something changed,
//! go check".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use firehose_core::{AtUri, SubjectId};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::LOG_TARGET;

/// A commit op that couldn't be applied because something it references
/// hasn't streamed yet, held verbatim so it can be replayed later.
#[derive(Debug, Clone)]
pub enum DeferredOp {
    Like { uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime },
    Repost { uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime },
    Bookmark { uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime },
    Post {
        uri: AtUri,
        author: SubjectId,
        text: String,
        reply_root: Option<AtUri>,
        reply_parent: Option<AtUri>,
        quoted: Option<AtUri>,
        created_at: OffsetDateTime,
    },
    Follow { uri: AtUri, follower: SubjectId, followee: SubjectId, created_at: OffsetDateTime },
    Block { uri: AtUri, blocker: SubjectId, blocked: SubjectId, created_at: OffsetDateTime },
    ListItem { uri: AtUri, list_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime },
}

impl DeferredOp {
    fn uri(&self) -> &AtUri {
        match self {
            DeferredOp::Like { uri, .. }
            | DeferredOp::Repost { uri, .. }
            | DeferredOp::Bookmark { uri, .. }
            | DeferredOp::Post { uri, .. }
            | DeferredOp::Follow { uri, .. }
            | DeferredOp::Block { uri, .. }
            | DeferredOp::ListItem { uri, .. } => uri,
        }
    }
}

struct Entry {
    op: DeferredOp,
    enqueued_at: Instant,
}

struct Queue {
    entries: Mutex<HashMap<String, Vec<Entry>>>,
}

impl Queue {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Collapses a re-enqueue of the same op (same op URI) into its
    /// existing slot instead of appending a second copy (§4.5.4 "enqueue
    /// discipline").
    fn push(&self, key: String, op: DeferredOp) {
        let mut entries = self.entries.lock().unwrap();
        let bucket = entries.entry(key).or_default();
        if let Some(existing) = bucket.iter_mut().find(|e| e.op.uri() == op.uri()) {
            existing.op = op;
            existing.enqueued_at = Instant::now();
        } else {
            bucket.push(Entry { op, enqueued_at: Instant::now() });
        }
    }

    fn take(&self, key: &str) -> Vec<DeferredOp> {
        self.entries
            .lock()
            .unwrap()
            .remove(key)
            .map(|bucket| bucket.into_iter().map(|e| e.op).collect())
            .unwrap_or_default()
    }

    fn sweep(&self, ttl: Duration) -> u64 {
        let mut expired = 0u64;
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|e| e.enqueued_at.elapsed() < ttl);
            expired += (before - bucket.len()) as u64;
            !bucket.is_empty()
        });
        expired
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().values().map(Vec::len).sum()
    }
}

pub struct PendingQueues {
    ops: Queue,
    user_ops: Queue,
    list_items: Queue,
    ttl: Duration,
    queued: AtomicU64,
    flushed: AtomicU64,
    expired: AtomicU64,
}

impl PendingQueues {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ops: Queue::new(),
            user_ops: Queue::new(),
            list_items: Queue::new(),
            ttl,
            queued: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn enqueue_on_post(&self, post_uri: &AtUri, op: DeferredOp) {
        debug!(target: LOG_TARGET, %post_uri, "deferring op on missing post");
        self.ops.push(post_uri.to_string(), op);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueue_on_subject(&self, subject: &SubjectId, op: DeferredOp) {
        debug!(target: LOG_TARGET, %subject, "deferring op on missing subject");
        self.user_ops.push(subject.as_str().to_string(), op);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueue_on_list(&self, list_uri: &AtUri, op: DeferredOp) {
        debug!(target: LOG_TARGET, %list_uri, "deferring op on missing list");
        self.list_items.push(list_uri.to_string(), op);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_for_post(&self, post_uri: &AtUri) -> Vec<DeferredOp> {
        let taken = self.ops.take(&post_uri.to_string());
        if !taken.is_empty() {
            self.flushed.fetch_add(taken.len() as u64, Ordering::Relaxed);
        }
        taken
    }

    pub fn take_for_subject(&self, subject: &SubjectId) -> Vec<DeferredOp> {
        let taken = self.user_ops.take(subject.as_str());
        if !taken.is_empty() {
            self.flushed.fetch_add(taken.len() as u64, Ordering::Relaxed);
        }
        taken
    }

    pub fn take_for_list(&self, list_uri: &AtUri) -> Vec<DeferredOp> {
        let taken = self.list_items.take(&list_uri.to_string());
        if !taken.is_empty() {
            self.flushed.fetch_add(taken.len() as u64, Ordering::Relaxed);
        }
        taken
    }

    /// Background sweep, run every 60s per §4.5.4.
    pub async fn run_sweeper(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let expired = self.ops.sweep(self.ttl) + self.user_ops.sweep(self.ttl) + self.list_items.sweep(self.ttl);
            if expired > 0 {
                self.expired.fetch_add(expired, Ordering::Relaxed);
                info!(target: LOG_TARGET, expired, "pending queue entries expired");
            }
        }
    }

    pub fn metrics(&self) -> PendingMetrics {
        PendingMetrics {
            queued_total: self.queued.load(Ordering::Relaxed),
            flushed_total: self.flushed.load(Ordering::Relaxed),
            expired_total: self.expired.load(Ordering::Relaxed),
            ops_len: self.ops.len(),
            user_ops_len: self.user_ops.len(),
            list_items_len: self.list_items.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PendingMetrics {
    pub queued_total: u64,
    pub flushed_total: u64,
    pub expired_total: u64,
    pub ops_len: usize,
    pub user_ops_len: usize,
    pub list_items_len: usize,
}
