//! Identity resolution (C1): subject-id to document/endpoint/handle, with
//! caching, a circuit breaker, bounded concurrency and retry-with-backoff.
//! Grounded on the upstream DID resolver this system replaces and, for the
//! in-flight request de-duplication, on the teacher codebase's
//! `ConnectionCache` (`Arc<Mutex<HashMap<K, Arc<OnceCell<V>>>>>` pattern).

mod circuit_breaker;
mod document;
pub mod error;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
pub use circuit_breaker::CircuitBreaker;
pub use document::{DidDocument, Service};
pub use error::{IdentityError, IdentityResult};
use firehose_core::SubjectId;
use firehose_util_error::FmtCompact as _;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use snafu::ResultExt as _;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, trace, warn};

pub const LOG_TARGET: &str = "firehose::identity";

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub directory_base_url: String,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
    pub concurrency: usize,
    pub batch_log_size: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            directory_base_url: "https://plc.directory".to_string(),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
            cache_capacity: 100_000,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            concurrency: 15,
            batch_log_size: 5000,
        }
    }
}

type PendingDoc = Arc<OnceCell<Option<Arc<DidDocument>>>>;

pub struct Resolver {
    config: IdentityConfig,
    http: reqwest::Client,
    dns: TokioAsyncResolver,
    doc_cache: moka::sync::Cache<String, Arc<DidDocument>>,
    handle_cache: moka::sync::Cache<String, String>,
    breaker: CircuitBreaker,
    semaphore: Arc<Semaphore>,
    inflight: Mutex<HashMap<String, PendingDoc>>,
    resolutions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Resolver {
    pub fn new(config: IdentityConfig) -> IdentityResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(error::HttpSnafu)?;

        let dns = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        let doc_cache = moka::sync::Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        let handle_cache = moka::sync::Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        let breaker = CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        Ok(Self {
            config,
            http,
            dns,
            doc_cache,
            handle_cache,
            breaker,
            semaphore,
            inflight: Mutex::new(HashMap::new()),
            resolutions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    /// Drops a subject's cached handle, e.g. after an identity event
    /// reports a handle change (§4.5.6).
    pub fn invalidate_handle(&self, subject: &SubjectId) {
        self.handle_cache.invalidate(subject.as_str());
    }

    pub async fn resolve_to_document(&self, subject: &SubjectId) -> Option<Arc<DidDocument>> {
        if let Some(doc) = self.doc_cache.get(subject.as_str()) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(doc);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut inflight = self.inflight.lock().unwrap();
            inflight
                .entry(subject.as_str().to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| async { self.fetch_document(subject).await })
            .await
            .clone();

        // Only remove the map entry if it still points at this cell: a
        // racing caller may have already removed it and inserted a fresh
        // one, starting a second independent fetch for the same subject.
        let mut inflight = self.inflight.lock().unwrap();
        if let Entry::Occupied(entry) = inflight.entry(subject.as_str().to_string()) {
            if Arc::ptr_eq(entry.get(), &cell) {
                entry.remove();
            }
        }
        drop(inflight);

        if let Some(doc) = &result {
            self.doc_cache.insert(subject.as_str().to_string(), doc.clone());
        }
        result
    }

    pub async fn resolve_to_endpoint(&self, subject: &SubjectId) -> Option<String> {
        let doc = self.resolve_to_document(subject).await?;
        doc.pds_endpoint().map(ToString::to_string)
    }

    pub async fn resolve_to_handle(&self, subject: &SubjectId) -> Option<String> {
        if let Some(handle) = self.handle_cache.get(subject.as_str()) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(handle);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let doc = self.resolve_to_document(subject).await?;
        let handle = doc.handle()?.to_string();
        self.handle_cache.insert(subject.as_str().to_string(), handle.clone());

        let count = self.resolutions.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.config.batch_log_size == 0 {
            let hits = self.cache_hits.load(Ordering::Relaxed);
            let misses = self.cache_misses.load(Ordering::Relaxed);
            let total = hits + misses;
            let rate = if total > 0 { hits as f64 / total as f64 * 100.0 } else { 0.0 };
            info!(target: LOG_TARGET, count, hit_rate = rate, "identity resolution batch");
        }

        Some(handle)
    }

    /// Handle to subject-id: DNS TXT at `_atproto.<handle>` first, HTTPS
    /// well-known fallback.
    pub async fn resolve_handle_to_subject(&self, handle: &str) -> Option<SubjectId> {
        if let Some(id) = self.resolve_handle_via_dns(handle).await {
            return Some(id);
        }
        self.resolve_handle_via_https(handle).await
    }

    async fn resolve_handle_via_dns(&self, handle: &str) -> Option<SubjectId> {
        let name = format!("_atproto.{handle}");
        let lookup = self.dns.txt_lookup(name).await.ok()?;
        for record in lookup.iter() {
            let text = record
                .txt_data()
                .iter()
                .flat_map(|chunk| chunk.iter().copied())
                .collect::<Vec<u8>>();
            let text = String::from_utf8_lossy(&text).trim().to_string();
            if let Some(did) = text.strip_prefix("did=") {
                return Some(SubjectId::new(did));
            }
            if text.starts_with("did:") {
                return Some(SubjectId::new(text));
            }
        }
        None
    }

    async fn resolve_handle_via_https(&self, handle: &str) -> Option<SubjectId> {
        let url = format!("https://{handle}/.well-known/atproto-did");
        let resp = self
            .http
            .get(&url)
            .header("Accept", "text/plain")
            .send()
            .await
            .ok()?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return None;
        }
        if !resp.status().is_success() {
            warn!(target: LOG_TARGET, %handle, status = %resp.status(), "well-known lookup failed");
            return None;
        }
        let body = resp.text().await.ok()?;
        let did = body.trim();
        if did.starts_with('<') || did.starts_with('{') || !did.starts_with("did:") {
            return None;
        }
        Some(SubjectId::new(did))
    }

    async fn fetch_document(&self, subject: &SubjectId) -> Option<Arc<DidDocument>> {
        match subject.method() {
            Some("plc") => self.fetch_plc_document(subject).await,
            Some("web") => self.fetch_web_document(subject).await,
            other => {
                warn!(target: LOG_TARGET, subject = %subject, method = ?other, "unsupported subject method");
                None
            }
        }
    }

    async fn fetch_plc_document(&self, subject: &SubjectId) -> Option<Arc<DidDocument>> {
        if self.breaker.is_open() {
            warn!(target: LOG_TARGET, %subject, "circuit breaker open, skipping resolution");
            return None;
        }

        let _permit = self.semaphore.acquire().await.ok()?;
        let url = format!("{}/{}", self.config.directory_base_url, subject);

        let attempt = || async {
            let resp = self
                .http
                .get(&url)
                .header("Accept", "application/did+ld+json, application/json")
                .send()
                .await
                .context(error::HttpSnafu)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if resp.status().is_server_error() {
                return error::StatusSnafu { status: resp.status() }.fail();
            }
            if !resp.status().is_success() {
                return error::StatusSnafu { status: resp.status() }.fail();
            }
            let doc: DidDocument = resp.json().await.context(error::HttpSnafu)?;
            if doc.id != subject.as_str() {
                return error::IdMismatchSnafu {
                    expected: subject.as_str().to_string(),
                    got: doc.id.clone(),
                }
                .fail();
            }
            Ok(Some(doc))
        };

        let result: IdentityResult<Option<DidDocument>> = attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.config.base_delay)
                    .with_max_times(self.config.max_retries as usize),
            )
            .notify(|err, _| debug!(target: LOG_TARGET, err = %err.fmt_compact(), "plc resolution attempt failed"))
            .await;

        match result {
            Ok(doc) => {
                self.breaker.record_success();
                doc.map(Arc::new)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(target: LOG_TARGET, %subject, err = %err.fmt_compact(), "plc resolution failed");
                None
            }
        }
    }

    async fn fetch_web_document(&self, subject: &SubjectId) -> Option<Arc<DidDocument>> {
        let domain_and_path = subject.as_str().strip_prefix("did:web:")?;
        let parts: Vec<&str> = domain_and_path.split(':').collect();
        let domain = parts[0];
        let url = if parts.len() > 1 {
            format!("https://{}/{}/did.json", domain, parts[1..].join("/"))
        } else {
            format!("https://{domain}/.well-known/did.json")
        };

        trace!(target: LOG_TARGET, %subject, %url, "resolving web did");

        let attempt = || async {
            let resp = self
                .http
                .get(&url)
                .header("Accept", "application/did+ld+json, application/json")
                .send()
                .await
                .context(error::HttpSnafu)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return error::StatusSnafu { status: resp.status() }.fail();
            }
            let doc: DidDocument = resp.json().await.context(error::HttpSnafu)?;
            if doc.id != subject.as_str() {
                return error::IdMismatchSnafu {
                    expected: subject.as_str().to_string(),
                    got: doc.id.clone(),
                }
                .fail();
            }
            Ok(Some(doc))
        };

        let result: IdentityResult<Option<DidDocument>> = attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.config.base_delay)
                    .with_max_times(self.config.max_retries as usize),
            )
            .notify(|err, _| debug!(target: LOG_TARGET, err = %err.fmt_compact(), "web did resolution attempt failed"))
            .await;

        match result {
            Ok(doc) => doc.map(Arc::new),
            Err(err) => {
                warn!(target: LOG_TARGET, %subject, err = %err.fmt_compact(), "web did resolution failed");
                None
            }
        }
    }
}
