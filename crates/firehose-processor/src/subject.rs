//! Subject creation throttling (§4.5.5). Grounded directly on the teacher
//! codebase's `ConnectionCache` (`connection_cache.rs`): a per-key dedup map
//! of `Arc<OnceCell<_>>` so concurrent callers await one shared outcome,
//! plus a semaphore bounding how many creations run at once.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use firehose_core::SubjectId;
use firehose_store::{Store, WriteOutcome};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, trace};

use crate::LOG_TARGET;

type LazyCreation = Arc<OnceCell<()>>;

#[derive(Clone)]
pub struct SubjectCreation {
    store: Arc<Store>,
    inflight: Arc<Mutex<HashMap<SubjectId, LazyCreation>>>,
    semaphore: Arc<Semaphore>,
}

impl SubjectCreation {
    pub fn new(store: Arc<Store>, max_concurrent: usize) -> Self {
        Self {
            store,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Ensures a subject row exists, creating it with the placeholder
    /// handle `"handle.invalid"` if this is the first op ever seen for it.
    /// Concurrent callers for the same subject share one creation; the
    /// await itself is this system's realization of the spec's
    /// "pending-user-creation-ops" queue, since the underlying insert is a
    /// single fast local write rather than a remote call worth deferring.
    pub async fn ensure(&self, subject: &SubjectId) -> bool {
        let cell = {
            let mut inflight = self.inflight.lock().unwrap();
            inflight.entry(subject.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let mut created = false;
        cell.get_or_init(|| async {
            let _permit = self.semaphore.acquire().await.ok();
            trace!(target: LOG_TARGET, %subject, "creating subject row");
            match self.store.ensure_user(subject, None).await {
                Ok(WriteOutcome::Inserted) => {
                    created = true;
                    debug!(target: LOG_TARGET, %subject, "subject row created");
                }
                Ok(WriteOutcome::AlreadyExists) => {}
                Ok(WriteOutcome::ForeignKeyMissing) => {
                    unreachable!("users has no foreign key dependency")
                }
                Err(err) => {
                    debug!(target: LOG_TARGET, %subject, %err, "subject creation failed");
                }
            }
        })
        .await;

        // Only remove the map entry if it still points at this cell: a
        // racing caller may have already removed it and inserted a fresh
        // one for a later wave of ops on the same subject.
        let mut inflight = self.inflight.lock().unwrap();
        if let Entry::Occupied(entry) = inflight.entry(subject.clone()) {
            if Arc::ptr_eq(entry.get(), &cell) {
                entry.remove();
            }
        }
        drop(inflight);

        created
    }
}
