// src/core/cache.rs

//! Key/value cache used to short-circuit slow probes and to count requests
//! for the rate limiter.

use std::future::Future;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::error::{CacheError, ProbeFailure};
use crate::core::models::Fragment;

// --- TTLs ---

pub const RANK_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const IP_TTL: Duration = Duration::from_secs(30 * 60);
pub const DNS_TTL: Duration = Duration::from_secs(30 * 60);
pub const WHOIS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const HTTP_TTL: Duration = Duration::from_secs(30 * 60);
pub const TLS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CONTENT_TTL: Duration = Duration::from_secs(60 * 60);

/// A string key/value store with per-key expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Increments the integer stored at `key`, creating it at 1. Existing expiry is kept.
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn flush(&self) -> Result<(), CacheError>;
}

impl<'a> dyn Cache + 'a {
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl).await
    }
}

// --- In-memory backend ---

/// Upper bound on the number of entries `MemoryCache` keeps.
pub const MEMORY_CACHE_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Lifetime set by this write. `None` keeps whatever expiry the key had.
    ttl: Option<Duration>,
}

/// Reads each entry's lifetime from the write that produced it.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: StdInstant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: StdInstant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl.or(duration_until_expiry)
    }
}

/// Process-local cache backed by moka. Expired entries are evicted in the
/// background and the entry count is capped.
pub struct MemoryCache {
    entries: MokaCache<String, Entry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(MEMORY_CACHE_CAPACITY)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let entries = MokaCache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build();
        Self { entries }
    }

    /// Number of stored entries once pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), Entry { value, ttl: Some(ttl) }).await;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let outcome = self
            .entries
            .entry(key.to_string())
            .and_compute_with(|current| {
                let next = match current {
                    Some(entry) => entry.into_value().value.parse::<i64>().ok().map(|n| n + 1),
                    None => Some(1),
                };
                std::future::ready(match next {
                    Some(n) => Op::Put(Entry { value: n.to_string(), ttl: None }),
                    None => Op::Nop,
                })
            })
            .await;
        match outcome {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => entry
                .into_value()
                .value
                .parse()
                .map_err(|_| CacheError::NotAnInteger(key.to_string())),
            _ => Err(CacheError::NotAnInteger(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .entry(key.to_string())
            .and_compute_with(|current| {
                std::future::ready(match current {
                    Some(entry) => Op::Put(Entry { value: entry.into_value().value, ttl: Some(ttl) }),
                    None => Op::Nop,
                })
            })
            .await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.invalidate_all();
        Ok(())
    }
}

// --- Cache-through ---

/// A fragment together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub fragment: Fragment,
    pub from_cache: bool,
}

/// Serves a probe result from the cache, or fetches and stores it.
///
/// Cache read failures and undecodable entries count as misses. A failed
/// fetch is returned as-is and nothing is written. A failed write is logged
/// and otherwise ignored. Exactly one fragment is produced per call.
///
/// # Arguments
///
/// * `cache` - The cache to consult, if one is configured.
/// * `key` - Cache key, conventionally `<probe>:<domain or url>`.
/// * `ttl` - Lifetime of a freshly written entry.
/// * `fetch` - Produces the value when the cache cannot.
/// * `into` - Wraps the value into its fragment.
pub async fn cache_through<T, F, Fut>(
    cache: Option<&dyn Cache>,
    key: &str,
    ttl: Duration,
    fetch: F,
    into: impl FnOnce(T) -> Fragment,
) -> Result<Cached, ProbeFailure>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ProbeFailure>>,
{
    let Some(cache) = cache else {
        let value = fetch().await?;
        return Ok(Cached { fragment: into(value), from_cache: false });
    };

    match cache.get_json::<T>(key).await {
        Ok(Some(value)) => {
            debug!(key, "Cache hit.");
            return Ok(Cached { fragment: into(value), from_cache: true });
        }
        Ok(None) => debug!(key, "Cache miss."),
        Err(e) => debug!(key, error = %e, "Cache read failed, fetching instead."),
    }

    let value = fetch().await?;
    if let Err(e) = cache.set_json(key, &value, ttl).await {
        debug!(key, error = %e, "Cache write failed.");
    }
    Ok(Cached { fragment: into(value), from_cache: false })
}
