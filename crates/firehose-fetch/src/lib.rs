//! Remote record fetcher (C2): repairs rows left incomplete by ordering
//! violations in the stream by pulling the missing record straight from its
//! origin server. Grounded on the upstream PDS data fetcher this system
//! replaces, and on the teacher codebase's background-task shape
//! (`task::missing_event_fetcher`) for the periodic-wakeup loop.

pub mod error;
mod sanitize;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use error::{FetchError, FetchResult};
use firehose_core::{AtUri, Cid, SubjectId};
use firehose_identity::Resolver;
use firehose_store::Store;
pub use sanitize::sanitize_subject;
use tracing::{debug, info, warn};

pub const LOG_TARGET: &str = "firehose::fetch";

/// What kind of thing is missing; drives which upstream endpoint gets hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    User,
    Post,
    Like,
    Repost,
    Follow,
    Record,
}

impl FetchKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Post => "post",
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Follow => "follow",
            Self::Record => "record",
        }
    }
}

#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Hands a freshly-fetched record back to the processor as if it had
    /// just arrived over the stream.
    async fn process_record(&self, uri: &AtUri, cid: Option<&Cid>, author: &SubjectId, value: serde_json::Value);

    /// Called once a user row has been created (minimally or with a full
    /// profile) so ops pending on that subject can run.
    async fn flush_pending_user_ops(&self, subject: &SubjectId);
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub scan_interval: Duration,
    pub batch_log_size: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            scan_interval: Duration::from_secs(30),
            batch_log_size: 5000,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: FetchKind,
    subject: SubjectId,
    uri: Option<AtUri>,
    retry_count: u32,
    last_attempt: Instant,
}

pub struct Fetcher {
    config: FetchConfig,
    http: reqwest::Client,
    identity: Arc<Resolver>,
    store: Arc<Store>,
    sink: Arc<dyn RecordSink>,
    entries: Mutex<HashMap<String, Entry>>,
    success_count: std::sync::atomic::AtomicU64,
}

impl Fetcher {
    pub fn new(config: FetchConfig, identity: Arc<Resolver>, store: Arc<Store>, sink: Arc<dyn RecordSink>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            identity,
            store,
            sink,
            entries: Mutex::new(HashMap::new()),
            success_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Marks an entry as needing a fetch. A duplicate on the same key only
    /// bumps `retry_count`, matching the upstream's merge-not-replace
    /// behavior so repeated misses don't reset the backoff.
    pub fn mark_incomplete(&self, kind: FetchKind, subject: &SubjectId, uri: Option<&AtUri>) {
        let clean = sanitize_subject(subject.as_str());
        let key = match &uri {
            Some(uri) => format!("{}:{}:{}", kind.as_str(), clean, uri),
            None => format!("{}:{}", kind.as_str(), clean),
        };
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(key)
            .and_modify(|e| {
                e.retry_count += 1;
                e.last_attempt = Instant::now();
            })
            .or_insert_with(|| Entry {
                kind,
                subject: SubjectId::new(clean),
                uri: uri.cloned(),
                retry_count: 0,
                last_attempt: Instant::now(),
            });
    }

    /// Runs the periodic background scan forever; spawn this as its own
    /// task.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        loop {
            ticker.tick().await;
            self.process_incomplete().await;
        }
    }

    pub async fn process_incomplete(&self) {
        let due: Vec<(String, Entry)> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.last_attempt.elapsed() >= self.config.retry_delay)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };
        if due.is_empty() {
            return;
        }
        debug!(target: LOG_TARGET, count = due.len(), "processing incomplete entries");

        for (key, entry) in due {
            if entry.retry_count >= self.config.max_retries {
                warn!(target: LOG_TARGET, kind = entry.kind.as_str(), subject = %entry.subject, "max retries exceeded");
                if matches!(entry.kind, FetchKind::User | FetchKind::Like | FetchKind::Repost | FetchKind::Follow) {
                    self.create_minimal_user(&entry.subject).await;
                }
                self.entries.lock().unwrap().remove(&key);
                continue;
            }

            match self.fetch_one(&entry).await {
                Ok(true) => {
                    self.entries.lock().unwrap().remove(&key);
                    let count = self.success_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    if count % self.config.batch_log_size == 0 {
                        info!(target: LOG_TARGET, count, "fetch batch milestone");
                    }
                }
                Ok(false) => {
                    let mut entries = self.entries.lock().unwrap();
                    if let Some(e) = entries.get_mut(&key) {
                        e.retry_count += 1;
                        e.last_attempt = Instant::now();
                    }
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, kind = entry.kind.as_str(), subject = %entry.subject, %err, "fetch attempt failed");
                    let mut entries = self.entries.lock().unwrap();
                    if let Some(e) = entries.get_mut(&key) {
                        e.retry_count += 1;
                        e.last_attempt = Instant::now();
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` on success (including "gone, stop retrying"),
    /// `Ok(false)` to leave the entry in place for another pass.
    async fn fetch_one(&self, entry: &Entry) -> FetchResult<bool> {
        let endpoint = self
            .identity
            .resolve_to_endpoint(&entry.subject)
            .await
            .ok_or_else(|| FetchError::NoEndpoint { subject: entry.subject.as_str().to_string() })?;

        match entry.kind {
            FetchKind::User | FetchKind::Like | FetchKind::Repost | FetchKind::Follow => {
                self.fetch_user_record(&entry.subject, &endpoint).await
            }
            FetchKind::Post | FetchKind::Record => {
                let Some(uri) = &entry.uri else {
                    return Ok(true);
                };
                self.fetch_record_by_uri(uri, &endpoint).await
            }
        }
    }

    async fn fetch_user_record(&self, subject: &SubjectId, endpoint: &str) -> FetchResult<bool> {
        let encoded = urlencoding::encode(subject.as_str());
        let url =
            format!("{endpoint}/xrpc/com.atproto.repo.getRecord?repo={encoded}&collection=app.bsky.actor.profile&rkey=self");
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Http { source })?;

        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("RecordNotFound") {
                self.create_minimal_user(subject).await;
                return Ok(true);
            }
            return Err(FetchError::Status { status: reqwest::StatusCode::BAD_REQUEST });
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status { status: resp.status() });
        }

        let body: serde_json::Value = resp.json().await.map_err(|source| FetchError::Http { source })?;
        let Some(profile) = body.get("value") else {
            return Err(FetchError::MalformedResponse);
        };
        let handle = self.identity.resolve_to_handle(subject).await;
        let display_name = profile.get("displayName").and_then(|v| v.as_str());
        let description = profile.get("description").and_then(|v| v.as_str());
        let avatar_cid = extract_blob_cid(profile.get("avatar"));
        let banner_cid = extract_blob_cid(profile.get("banner"));

        let _ = self.store.ensure_user(subject, handle.as_deref()).await;
        let _ = self
            .store
            .upsert_profile(subject, display_name, description, avatar_cid.as_deref(), banner_cid.as_deref())
            .await;
        self.sink.flush_pending_user_ops(subject).await;
        Ok(true)
    }

    async fn fetch_record_by_uri(&self, uri: &AtUri, endpoint: &str) -> FetchResult<bool> {
        let repo = urlencoding::encode(uri.authority().as_str());
        let collection = urlencoding::encode(uri.collection());
        let rkey = urlencoding::encode(uri.rkey());
        let url = format!(
            "{endpoint}/xrpc/com.atproto.repo.getRecord?repo={repo}&collection={collection}&rkey={rkey}"
        );

        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Http { source })?;

        if resp.status() == reqwest::StatusCode::BAD_REQUEST || resp.status() == reqwest::StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("RecordNotFound") {
                return Ok(true);
            }
            return Err(FetchError::Status { status: reqwest::StatusCode::NOT_FOUND });
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status { status: resp.status() });
        }

        let body: serde_json::Value = resp.json().await.map_err(|source| FetchError::Http { source })?;
        let (Some(_), Some(cid), Some(value)) = (body.get("uri"), body.get("cid").and_then(|v| v.as_str()), body.get("value"))
        else {
            return Err(FetchError::MalformedResponse);
        };
        let author = SubjectId::new(uri.authority().as_str());
        self.sink
            .process_record(uri, Some(&Cid::new(cid)), &author, value.clone())
            .await;
        Ok(true)
    }

    async fn create_minimal_user(&self, subject: &SubjectId) {
        let handle = self.identity.resolve_to_handle(subject).await;
        match self.store.ensure_user(subject, handle.as_deref()).await {
            Ok(_) => {
                info!(target: LOG_TARGET, %subject, "created minimal user record");
                self.sink.flush_pending_user_ops(subject).await;
            }
            Err(err) => warn!(target: LOG_TARGET, %subject, %err, "failed to create minimal user"),
        }
    }
}

fn extract_blob_cid(blob: Option<&serde_json::Value>) -> Option<String> {
    let blob = blob?;
    if let Some(s) = blob.as_str() {
        return (s != "undefined").then(|| s.to_string());
    }
    let obj = blob.as_object()?;
    if let Some(r#ref) = obj.get("ref") {
        if let Some(s) = r#ref.as_str() {
            return (s != "undefined").then(|| s.to_string());
        }
        if let Some(link) = r#ref.get("$link").and_then(|v| v.as_str()) {
            return (link != "undefined").then(|| link.to_string());
        }
    }
    obj.get("cid").and_then(|v| v.as_str()).map(ToString::to_string)
}
