//! Best-effort response cache keyed by the trimmed question text.
//!
//! Keys are case-sensitive and otherwise unnormalized. Backend failures are
//! logged and read as a miss (or a skipped write); they never fail a query.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use tracing::{debug, warn};

use docqa_core::config::CacheSettings;
use docqa_core::error::{Error, Result};
use docqa_core::traits::KeyValueCache;
use docqa_core::types::PipelineResponse;

#[derive(Clone)]
struct Entry {
    payload: String,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> { Some(value.ttl) }

    fn expire_after_update(&self, _key: &String, value: &Entry, _updated_at: Instant, _remaining: Option<Duration>) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`KeyValueCache`] with per-entry expiry.
pub struct MokaCache {
    cache: Cache<String, Entry>,
}

impl MokaCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).expire_after(EntryTtl).build();
        Self { cache }
    }
}

impl KeyValueCache for MokaCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> { Ok(self.cache.get(key).map(|e| e.payload)) }

    fn set_with_expiry(&self, key: &str, ttl: Duration, value: &str) -> anyhow::Result<()> {
        self.cache.insert(key.to_string(), Entry { payload: value.to_string(), ttl });
        Ok(())
    }
}

pub struct ResponseCache {
    backend: Option<Arc<dyn KeyValueCache>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(backend: Option<Arc<dyn KeyValueCache>>, ttl: Duration) -> Self { Self { backend, ttl } }

    pub fn disabled() -> Self { Self::new(None, Duration::from_secs(3600)) }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        let backend: Option<Arc<dyn KeyValueCache>> =
            if settings.enabled { Some(Arc::new(MokaCache::new(settings.max_entries))) } else { None };
        Self::new(backend, Duration::from_secs(settings.ttl_secs))
    }

    pub fn is_enabled(&self) -> bool { self.backend.is_some() }

    /// Cached response for `question`, with fields missing from older
    /// entries filled with empty defaults.
    pub fn get(&self, question: &str) -> Option<PipelineResponse> {
        match self.try_get(question) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    pub fn put(&self, question: &str, response: &PipelineResponse) {
        if let Err(e) = self.try_put(question, response) { warn!("{}", e); }
    }

    fn try_get(&self, question: &str) -> Result<Option<PipelineResponse>> {
        let Some(backend) = &self.backend else { return Ok(None) };
        let raw = backend.get(question.trim()).map_err(|e| Error::CacheUnavailable(format!("get failed: {:#}", e)))?;
        let Some(raw) = raw else { return Ok(None) };
        let response = serde_json::from_str(&raw).map_err(|e| Error::CacheUnavailable(format!("unreadable entry: {}", e)))?;
        debug!("Cache hit for {:?}", question.trim());
        Ok(Some(response))
    }

    fn try_put(&self, question: &str, response: &PipelineResponse) -> Result<()> {
        let Some(backend) = &self.backend else { return Ok(()) };
        let payload = serde_json::to_string(response).map_err(|e| Error::CacheUnavailable(e.to_string()))?;
        backend
            .set_with_expiry(question.trim(), self.ttl, &payload)
            .map_err(|e| Error::CacheUnavailable(format!("set failed: {:#}", e)))
    }
}
