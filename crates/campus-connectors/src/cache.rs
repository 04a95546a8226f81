use std::time::Duration;

use async_trait::async_trait;
use campus_api::{GateError, Tenant, TenantDirectory, TenantKey};
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Clone)]
struct Entry<T> {
    expires_at: Instant,
    value: T,
}

/// Entries kept per map before new results stop being cached.
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Time-bounded cache in front of another [`TenantDirectory`].
///
/// Only successful lookups are cached (including "no such tenant"); errors
/// always reach the caller so the pipeline can fail closed. Entries expire
/// after `ttl` so a suspension takes effect without a restart.
///
/// Each map holds at most `max_entries`. Expired entries are swept once a
/// map is half full; when it is still full after the sweep the result is
/// returned uncached.
pub struct CachedTenantDirectory<D> {
    inner: D,
    ttl: Duration,
    max_entries: usize,
    by_key: DashMap<String, Entry<Option<Tenant>>>,
    key_by_id: DashMap<String, Entry<Option<TenantKey>>>,
}

impl<D: TenantDirectory> CachedTenantDirectory<D> {
    pub fn new(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            by_key: DashMap::new(),
            key_by_id: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn invalidate(&self) {
        self.by_key.clear();
        self.key_by_id.clear();
    }

    /// Number of cached lookups, expired or not.
    pub fn len(&self) -> usize {
        self.by_key.len() + self.key_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store<T>(&self, map: &DashMap<String, Entry<T>>, key: &str, value: T) {
        let now = Instant::now();
        if map.len() > self.max_entries / 2 {
            map.retain(|_, e| e.expires_at > now);
        }
        if map.len() >= self.max_entries && !map.contains_key(key) {
            return;
        }
        map.insert(
            key.to_string(),
            Entry {
                expires_at: now + self.ttl,
                value,
            },
        );
    }
}

fn fresh<T: Clone>(map: &DashMap<String, Entry<T>>, key: &str) -> Option<T> {
    let entry = map.get(key)?;
    if entry.expires_at > Instant::now() {
        Some(entry.value.clone())
    } else {
        drop(entry);
        map.remove(key);
        None
    }
}

#[async_trait]
impl<D: TenantDirectory> TenantDirectory for CachedTenantDirectory<D> {
    async fn tenant_by_key(&self, key: &str) -> Result<Option<Tenant>, GateError> {
        if let Some(hit) = fresh(&self.by_key, key) {
            return Ok(hit);
        }
        let value = self.inner.tenant_by_key(key).await?;
        self.store(&self.by_key, key, value.clone());
        Ok(value)
    }

    async fn tenant_key_by_id(&self, id: &str) -> Result<Option<TenantKey>, GateError> {
        if let Some(hit) = fresh(&self.key_by_id, id) {
            return Ok(hit);
        }
        let value = self.inner.tenant_key_by_id(id).await?;
        self.store(&self.key_by_id, id, value.clone());
        Ok(value)
    }
}
