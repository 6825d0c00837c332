//! Event router and processor (C5): the heart of the system. Takes
//! [`FirehoseEvent`]s handed off by the stream client (C4) or the backfill
//! controller (C6) and executes them against the store gateway (C3),
//! handling the duplicate/foreign-key-miss split, dependency-deferred
//! execution, subject-creation throttling, mention notification and the
//! data-collection opt-out along the way. Grounded on the teacher
//! codebase's top-level client for its `LOG_TARGET`/dispatch-loop
//! conventions, retargeted from p2p event verification onto lexicon-record
//! routing.

mod mentions;
mod pending;
mod subject;

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use firehose_core::{AccountEvent, AccountStatus, AtUri, CommitAction, CommitEvent, CommitOp, Embed, FirehoseEvent, IdentityEvent, Record, SubjectId};
use firehose_fetch::{FetchKind, Fetcher, RecordSink};
use firehose_identity::Resolver;
use firehose_store::{Store, StoreError, WriteOutcome};
use firehose_util_error::FmtCompact as _;
use pending::{DeferredOp, PendingQueues};
use subject::SubjectCreation;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const LOG_TARGET: &str = "firehose::processor";

pub use pending::PendingMetrics;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_concurrent_subject_creations: usize,
    pub pending_ttl: Duration,
    pub data_collection_cache_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subject_creations: 10,
            pending_ttl: Duration::from_secs(24 * 60 * 60),
            data_collection_cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

pub struct Processor {
    store: Arc<Store>,
    identity: Arc<Resolver>,
    pending: PendingQueues,
    subjects: SubjectCreation,
    data_collection_cache: moka::sync::Cache<String, bool>,
    fetcher: OnceLock<Weak<Fetcher>>,
}

impl Processor {
    pub fn new(config: ProcessorConfig, store: Arc<Store>, identity: Arc<Resolver>) -> Arc<Self> {
        let subjects = SubjectCreation::new(store.clone(), config.max_concurrent_subject_creations);
        let data_collection_cache = moka::sync::Cache::builder()
            .time_to_live(config.data_collection_cache_ttl)
            .max_capacity(50_000)
            .build();
        Arc::new(Self {
            store,
            identity,
            pending: PendingQueues::new(config.pending_ttl),
            subjects,
            data_collection_cache,
            fetcher: OnceLock::new(),
        })
    }

    /// Wires C2 in after construction, since the `Fetcher` itself is built
    /// with this processor as its [`RecordSink`] and the two can't be
    /// constructed in either order without a cycle. A `Weak` reference
    /// avoids the `Processor` <-> `Fetcher` `Arc` cycle that a strong one
    /// would create.
    pub fn set_fetcher(&self, fetcher: Weak<Fetcher>) {
        let _ = self.fetcher.set(fetcher);
    }

    /// Reports a row or record left incomplete by an ordering violation to
    /// C2 for remote repair (§4.2, scenario 6). A no-op until
    /// [`Processor::set_fetcher`] has run.
    fn mark_incomplete(&self, kind: FetchKind, subject: &SubjectId, uri: Option<&AtUri>) {
        if let Some(fetcher) = self.fetcher.get().and_then(Weak::upgrade) {
            fetcher.mark_incomplete(kind, subject, uri);
        }
    }

    pub fn pending_metrics(&self) -> PendingMetrics {
        self.pending.metrics()
    }

    /// Background TTL sweep for the pending queues (§4.5.4); spawn as its
    /// own task alongside the event-dispatch loop.
    pub async fn run_pending_sweeper(&self) {
        self.pending.run_sweeper().await;
    }

    pub async fn handle_event(&self, event: FirehoseEvent) {
        match event {
            FirehoseEvent::Commit(commit) => self.handle_commit(commit).await,
            FirehoseEvent::Identity(identity) => self.handle_identity(identity).await,
            FirehoseEvent::Account(account) => self.handle_account(account).await,
        }
    }

    async fn handle_commit(&self, commit: CommitEvent) {
        for op in commit.ops {
            self.handle_op(&commit.repo, op).await;
        }
    }

    /// Dispatches one op. Every failure mode here is logged and swallowed
    /// per §4.5.8: the cursor still advances regardless of what happens to
    /// a single op.
    async fn handle_op(&self, repo: &SubjectId, op: CommitOp) {
        if op.action == CommitAction::Delete {
            if let Err(err) = self.store.delete_by_uri(&op.uri, &op.collection).await {
                debug!(target: LOG_TARGET, uri = %op.uri, err = %err.fmt_compact(), "delete failed");
            }
            return;
        }

        if self.is_data_collection_forbidden(repo).await {
            debug!(target: LOG_TARGET, %repo, "data collection forbidden for subject, dropping op");
            return;
        }

        if self.subjects.ensure(repo).await {
            self.mark_incomplete(FetchKind::User, repo, None);
        }
        self.flush_pending_for_subject(repo).await;

        let Some(record) = op.record else {
            return;
        };
        self.dispatch_record(repo, &op.uri, record).await;
    }

    async fn dispatch_record(&self, author: &SubjectId, uri: &AtUri, record: Record) {
        match record {
            Record::Post(r) => {
                let created_at = created_at_of(&r.created_at);
                let reply = r.reply.as_ref();
                self.handle_post(
                    uri.clone(),
                    author.clone(),
                    r.text,
                    reply.map(|rr| rr.root.clone()),
                    reply.map(|rr| rr.parent.clone()),
                    quoted_uri(r.embed.as_ref()),
                    created_at,
                )
                .await;
            }
            Record::Like(r) => {
                self.handle_like(uri.clone(), r.subject, author.clone(), created_at_of(&r.created_at)).await;
            }
            Record::Repost(r) => {
                self.handle_repost(uri.clone(), r.subject, author.clone(), created_at_of(&r.created_at)).await;
            }
            Record::Bookmark(r) => {
                self.handle_bookmark(uri.clone(), r.subject, author.clone(), created_at_of(&r.created_at)).await;
            }
            Record::Follow(r) => {
                self.handle_follow(uri.clone(), author.clone(), r.subject, created_at_of(&r.created_at)).await;
            }
            Record::Block(r) => {
                self.handle_block(uri.clone(), author.clone(), r.subject, created_at_of(&r.created_at)).await;
            }
            Record::List(r) => {
                let outcome = self
                    .store
                    .create_list(uri, author, &r.name, r.purpose.as_deref(), created_at_of(&r.created_at))
                    .await;
                self.after_list_write(uri, outcome).await;
            }
            Record::ListItem(r) => {
                self.handle_list_item(uri.clone(), r.list, r.subject, created_at_of(&r.created_at)).await;
            }
            Record::FeedGenerator(r) => {
                if let Err(err) = self
                    .store
                    .create_feed_generator(uri, author, &r.did, &r.display_name, created_at_of(&r.created_at))
                    .await
                {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "feed generator create failed");
                }
            }
            Record::StarterPack(r) => {
                if let Err(err) =
                    self.store.create_starter_pack(uri, author, &r.name, &r.list, created_at_of(&r.created_at)).await
                {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "starter pack create failed");
                }
            }
            Record::LabelerService(r) => {
                if let Err(err) =
                    self.store.create_labeler_service(uri, author, r.policies.as_ref(), created_at_of(&r.created_at)).await
                {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "labeler service create failed");
                }
            }
            Record::Verification(r) => {
                if let Err(err) = self
                    .store
                    .create_verification(uri, author, &r.subject, &r.handle, &r.display_name, created_at_of(&r.created_at))
                    .await
                {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "verification create failed");
                }
            }
            Record::Profile(r) => {
                let avatar_cid = r.avatar.as_ref().map(|b| b.cid.as_str());
                let banner_cid = r.banner.as_ref().map(|b| b.cid.as_str());
                if let Err(err) = self
                    .store
                    .upsert_profile(author, r.display_name.as_deref(), r.description.as_deref(), avatar_cid, banner_cid)
                    .await
                {
                    debug!(target: LOG_TARGET, %author, err = %err.fmt_compact(), "profile upsert failed");
                }
            }
            Record::Label(r) => {
                let created_at = created_at_of(&r.cts);
                if let Err(err) = self.store.apply_label(&r.src, &r.subject, &r.val, r.neg, created_at).await {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "label apply failed");
                }
            }
            Record::Generic(value, collection) => {
                let created_at = value
                    .get("createdAt")
                    .and_then(|v| v.as_str())
                    .and_then(firehose_core::parse_rfc3339)
                    .unwrap_or_else(OffsetDateTime::now_utc);
                if let Err(err) = self.store.create_generic(uri, &collection, author, &value, created_at).await {
                    debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "generic record create failed");
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_post(
        &self,
        uri: AtUri,
        author: SubjectId,
        text: String,
        reply_root: Option<AtUri>,
        reply_parent: Option<AtUri>,
        quoted: Option<AtUri>,
        created_at: OffsetDateTime,
    ) {
        let outcome = self
            .store
            .create_post(&uri, &author, &text, reply_root.as_ref(), reply_parent.as_ref(), quoted.as_ref(), created_at)
            .await;

        match outcome {
            Ok(WriteOutcome::Inserted) => {
                self.notify_mentions(&uri, &author, &text, created_at).await;
                self.flush_pending_for_post(&uri).await;
            }
            Ok(WriteOutcome::AlreadyExists) => {}
            Ok(WriteOutcome::ForeignKeyMissing) => {
                let op = DeferredOp::Post {
                    uri: uri.clone(),
                    author,
                    text,
                    reply_root,
                    reply_parent: reply_parent.clone(),
                    quoted: quoted.clone(),
                    created_at,
                };
                if let Some(parent) = &reply_parent {
                    self.pending.enqueue_on_post(parent, op.clone());
                    self.mark_incomplete(FetchKind::Post, parent.authority(), Some(parent));
                }
                if let Some(quoted) = &quoted {
                    self.pending.enqueue_on_post(quoted, op);
                    self.mark_incomplete(FetchKind::Post, quoted.authority(), Some(quoted));
                }
            }
            Err(err) => {
                debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "post create failed");
            }
        }
    }

    async fn notify_mentions(&self, post_uri: &AtUri, author: &SubjectId, text: &str, created_at: OffsetDateTime) {
        for handle in mentions::extract_mentions(text) {
            match self.store.find_subject_by_handle(&handle).await {
                Ok(Some(mentioned)) => {
                    if let Err(err) = self.store.create_mention_notification(post_uri, author, &mentioned, created_at).await
                    {
                        debug!(target: LOG_TARGET, %post_uri, %handle, err = %err.fmt_compact(), "mention notification failed");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(target: LOG_TARGET, %handle, err = %err.fmt_compact(), "mention lookup failed");
                }
            }
        }
    }

    async fn handle_like(&self, uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_like(&uri, &post_uri, &subject, created_at).await;
        self.after_post_interaction(
            outcome,
            &post_uri,
            DeferredOp::Like { uri, post_uri: post_uri.clone(), subject, created_at },
            "like",
        )
        .await;
    }

    async fn handle_repost(&self, uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_repost(&uri, &post_uri, &subject, created_at).await;
        self.after_post_interaction(
            outcome,
            &post_uri,
            DeferredOp::Repost { uri, post_uri: post_uri.clone(), subject, created_at },
            "repost",
        )
        .await;
    }

    async fn handle_bookmark(&self, uri: AtUri, post_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_bookmark(&uri, &post_uri, &subject, created_at).await;
        self.after_post_interaction(
            outcome,
            &post_uri,
            DeferredOp::Bookmark { uri, post_uri: post_uri.clone(), subject, created_at },
            "bookmark",
        )
        .await;
    }

    async fn after_post_interaction(&self, outcome: Result<WriteOutcome, StoreError>, post_uri: &AtUri, op: DeferredOp, kind: &str) {
        match outcome {
            Ok(WriteOutcome::Inserted) | Ok(WriteOutcome::AlreadyExists) => {}
            Ok(WriteOutcome::ForeignKeyMissing) => {
                self.pending.enqueue_on_post(post_uri, op);
                self.mark_incomplete(FetchKind::Post, post_uri.authority(), Some(post_uri));
            }
            Err(err) => {
                debug!(target: LOG_TARGET, %post_uri, kind, err = %err.fmt_compact(), "post interaction failed");
            }
        }
    }

    async fn handle_follow(&self, uri: AtUri, follower: SubjectId, followee: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_follow(&uri, &follower, &followee, created_at).await;
        match outcome {
            Ok(WriteOutcome::Inserted) | Ok(WriteOutcome::AlreadyExists) => {}
            Ok(WriteOutcome::ForeignKeyMissing) => {
                self.mark_incomplete(FetchKind::Follow, &followee, None);
                self.pending.enqueue_on_subject(&followee, DeferredOp::Follow { uri, follower, followee, created_at });
            }
            Err(err) => {
                debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "follow create failed");
            }
        }
    }

    async fn handle_block(&self, uri: AtUri, blocker: SubjectId, blocked: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_block(&uri, &blocker, &blocked, created_at).await;
        match outcome {
            Ok(WriteOutcome::Inserted) | Ok(WriteOutcome::AlreadyExists) => {}
            Ok(WriteOutcome::ForeignKeyMissing) => {
                self.mark_incomplete(FetchKind::User, &blocked, None);
                self.pending.enqueue_on_subject(&blocked, DeferredOp::Block { uri, blocker, blocked, created_at });
            }
            Err(err) => {
                debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "block create failed");
            }
        }
    }

    async fn handle_list_item(&self, uri: AtUri, list_uri: AtUri, subject: SubjectId, created_at: OffsetDateTime) {
        let outcome = self.store.create_list_item(&uri, &list_uri, &subject, created_at).await;
        match outcome {
            Ok(WriteOutcome::Inserted) | Ok(WriteOutcome::AlreadyExists) => {}
            Ok(WriteOutcome::ForeignKeyMissing) => {
                self.mark_incomplete(FetchKind::Record, list_uri.authority(), Some(&list_uri));
                self.pending.enqueue_on_list(&list_uri, DeferredOp::ListItem { uri, list_uri: list_uri.clone(), subject, created_at });
            }
            Err(err) => {
                debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "list item create failed");
            }
        }
    }

    async fn after_list_write(&self, uri: &AtUri, outcome: Result<WriteOutcome, StoreError>) {
        match outcome {
            Ok(WriteOutcome::Inserted) => self.flush_pending_for_list(uri).await,
            Ok(WriteOutcome::AlreadyExists) | Ok(WriteOutcome::ForeignKeyMissing) => {}
            Err(err) => {
                debug!(target: LOG_TARGET, %uri, err = %err.fmt_compact(), "list create failed");
            }
        }
    }

    async fn flush_pending_for_post(&self, post_uri: &AtUri) {
        for op in self.pending.take_for_post(post_uri) {
            self.replay(op).await;
        }
    }

    async fn flush_pending_for_list(&self, list_uri: &AtUri) {
        for op in self.pending.take_for_list(list_uri) {
            self.replay(op).await;
        }
    }

    async fn flush_pending_for_subject(&self, subject: &SubjectId) {
        for op in self.pending.take_for_subject(subject) {
            self.replay(op).await;
        }
    }

    async fn replay(&self, op: DeferredOp) {
        match op {
            DeferredOp::Like { uri, post_uri, subject, created_at } => self.handle_like(uri, post_uri, subject, created_at).await,
            DeferredOp::Repost { uri, post_uri, subject, created_at } => {
                self.handle_repost(uri, post_uri, subject, created_at).await
            }
            DeferredOp::Bookmark { uri, post_uri, subject, created_at } => {
                self.handle_bookmark(uri, post_uri, subject, created_at).await
            }
            DeferredOp::Post { uri, author, text, reply_root, reply_parent, quoted, created_at } => {
                self.handle_post(uri, author, text, reply_root, reply_parent, quoted, created_at).await
            }
            DeferredOp::Follow { uri, follower, followee, created_at } => self.handle_follow(uri, follower, followee, created_at).await,
            DeferredOp::Block { uri, blocker, blocked, created_at } => self.handle_block(uri, blocker, blocked, created_at).await,
            DeferredOp::ListItem { uri, list_uri, subject, created_at } => {
                self.handle_list_item(uri, list_uri, subject, created_at).await
            }
        }
    }

    /// Identity event (§4.5.6): upsert the handle, invalidating C1's
    /// cached handle for this subject so the next lookup observes the
    /// change.
    async fn handle_identity(&self, event: IdentityEvent) {
        self.subjects.ensure(&event.subject_id).await;
        if let Some(handle) = &event.handle {
            if let Err(err) = self.store.update_user_handle(&event.subject_id, handle).await {
                debug!(target: LOG_TARGET, subject = %event.subject_id, err = %err.fmt_compact(), "handle update failed");
            }
            self.identity.invalidate_handle(&event.subject_id);
        }
    }

    /// Account event (§4.5.6): status column only, never a deletion, even
    /// for a `"deleted"` status.
    async fn handle_account(&self, event: AccountEvent) {
        self.subjects.ensure(&event.subject_id).await;
        let Some(status) = event.status.as_deref().and_then(AccountStatus::parse) else {
            info!(target: LOG_TARGET, subject = %event.subject_id, active = event.active, "account event with unrecognized status");
            return;
        };
        if let Err(err) = self.store.update_user_status(&event.subject_id, status).await {
            debug!(target: LOG_TARGET, subject = %event.subject_id, err = %err.fmt_compact(), "status update failed");
        }
    }

    async fn is_data_collection_forbidden(&self, subject: &SubjectId) -> bool {
        if let Some(forbidden) = self.data_collection_cache.get(subject.as_str()) {
            return forbidden;
        }
        let forbidden = self.store.is_data_collection_forbidden(subject).await.unwrap_or_else(|err| {
            warn!(target: LOG_TARGET, %subject, err = %err.fmt_compact(), "opt-out lookup failed, assuming allowed");
            false
        });
        self.data_collection_cache.insert(subject.as_str().to_string(), forbidden);
        forbidden
    }
}

#[async_trait::async_trait]
impl RecordSink for Processor {
    async fn process_record(&self, uri: &AtUri, _cid: Option<&firehose_core::Cid>, author: &SubjectId, value: serde_json::Value) {
        match Record::from_collection_and_value(uri.collection(), value) {
            Ok(record) => self.dispatch_record(author, uri, record).await,
            Err(err) => debug!(target: LOG_TARGET, %uri, %err, "fetched record shape mismatch, dropping"),
        }
    }

    async fn flush_pending_user_ops(&self, subject: &SubjectId) {
        self.flush_pending_for_subject(subject).await;
    }
}

fn created_at_of(raw: &str) -> OffsetDateTime {
    firehose_core::parse_rfc3339(raw).unwrap_or_else(OffsetDateTime::now_utc)
}

fn quoted_uri(embed: Option<&Embed>) -> Option<AtUri> {
    match embed {
        Some(Embed::Record { uri, .. }) => Some(uri.clone()),
        Some(Embed::RecordWithMedia { record, .. }) => Some(record.clone()),
        _ => None,
    }
}
