//! Read-through, write-through cache decorator for a ResourceStore
//!
//! Reads try the cache first and fall back to the store, populating the cache
//! on a miss. Writes go to the store first; only after the store acknowledged
//! them is the cache refreshed (updates) or invalidated (deletes). There is no
//! transaction spanning both: if the cache step fails the entry stays stale
//! until its TTL lapses.
//!
//! Two writers of the same record can finish their refreshes out of order.
//! After replacing an entry the refresh reads the store once more and drops
//! the entry if the store has moved on, so a late refresh never leaves an
//! older value behind.
//!
//! Population on a miss uses set-if-absent, so a reader that fetched an old
//! value never overwrites a refresh made by a concurrent writer. One race
//! remains: a reader that fetched a record just before a concurrent delete
//! (or before a refresh dropped the entry) can repopulate the key with what
//! it read, which then lives until its TTL.

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, MAX_TTL_SECS};
use crate::error::{Error, Result};
use crate::guard::ensure_owner;
use crate::resource_store::ResourceStore;
use crate::types::*;

/// How long a cached record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Same TTL for every record
    Fixed(i64),
    /// Until the record's own expiry date. Records without one, or already
    /// past it, are not cached.
    UntilExpiry,
}

impl TtlPolicy {
    pub fn ttl_for<T: Record>(&self, record: &T, now: DateTime<Utc>) -> Option<i64> {
        match self {
            TtlPolicy::Fixed(secs) => Some(*secs),
            TtlPolicy::UntilExpiry => {
                let remaining = record.expires_at()? - now;
                let millis = remaining.num_milliseconds();
                if millis <= 0 {
                    None
                } else {
                    Some(((millis + 999) / 1000).min(MAX_TTL_SECS))
                }
            }
        }
    }
}

pub struct CachedResourceStore<T: Record> {
    inner: ResourceStore<T>,
    cache: Arc<dyn Cache>,
    policy: TtlPolicy,
    timeout: Duration,
}

impl<T: Record> Clone for CachedResourceStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl<T: Record> CachedResourceStore<T> {
    pub fn new(inner: ResourceStore<T>, cache: Arc<dyn Cache>, policy: TtlPolicy) -> Self {
        let timeout = inner.database().timeout;
        Self {
            inner,
            cache,
            policy,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The undecorated store, for queries the cache does not cover
    pub fn inner(&self) -> &ResourceStore<T> {
        &self.inner
    }

    /// `<database>:<table>:<id>`, so databases sharing a cache never collide
    pub fn cache_key(&self, id: &str) -> String {
        let table = self.inner.table();
        format!("{}:{}:{}", table.database, table.name, id)
    }

    async fn cache_call<R, F>(&self, op: &'static str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    target: "cache".to_string(),
                    op,
                })
            })
    }

    /// Cached copy of `id`, if there is a usable one
    async fn cached(&self, id: &str) -> Option<T> {
        let key = self.cache_key(id);
        match self.cache_call("get", self.cache.get(&key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Dropping undecodable cache entry {}: {}", key, e);
                    let _ = self.cache_call("delete", self.cache.delete(&key)).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read of {} failed, using the store: {}", key, e);
                None
            }
        }
    }

    /// Add `record` to the cache unless a live entry is already there
    async fn populate(&self, record: &T) {
        let Some(ttl) = self.policy.ttl_for(record, self.inner.database().now()) else {
            return;
        };
        let key = self.cache_key(record.id());
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot encode {} for the cache: {}", key, e);
                return;
            }
        };

        match self.cache_call("set", self.cache.set(&key, bytes, ttl)).await {
            Ok(()) => {}
            Err(Error::AlreadyCached(_)) => debug!("{} already cached", key),
            Err(e) => warn!("Cache population of {} failed: {}", key, e),
        }
    }

    /// Current store copy of `id` with its encoding. Drops the cache entry
    /// when the record is gone or cannot be read.
    async fn reread(&self, id: &str) -> Option<(T, Vec<u8>)> {
        let key = self.cache_key(id);
        let stored = match self.inner.find(id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                self.invalidate(&[id.to_string()]).await;
                return None;
            }
            Err(e) => {
                error!("Re-reading {} after a write failed, dropping its entry: {}", key, e);
                self.invalidate(&[id.to_string()]).await;
                return None;
            }
        };
        match serde_json::to_vec(&stored) {
            Ok(bytes) => Some((stored, bytes)),
            Err(e) => {
                error!("Cannot encode {} for the cache, dropping its entry: {}", key, e);
                self.invalidate(&[id.to_string()]).await;
                None
            }
        }
    }

    /// Overwrite the entry for `id` with what the store holds now
    async fn refresh(&self, id: &str) {
        let key = self.cache_key(id);
        let Some((stored, bytes)) = self.reread(id).await else {
            return;
        };
        let Some(ttl) = self.policy.ttl_for(&stored, self.inner.database().now()) else {
            self.invalidate(&[id.to_string()]).await;
            return;
        };

        if let Err(e) = self
            .cache_call("replace", self.cache.replace(&key, bytes.clone(), ttl))
            .await
        {
            error!("Cache refresh of {} failed, entry may be stale: {}", key, e);
            self.invalidate(&[id.to_string()]).await;
            return;
        }

        // A concurrent writer may have refreshed before us
        match self.reread(id).await {
            Some((_, current)) if current == bytes => {}
            Some(_) => {
                debug!("{} changed during its refresh, dropping the entry", key);
                self.invalidate(&[id.to_string()]).await;
            }
            None => {}
        }
    }

    async fn invalidate(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let keys: Vec<String> = ids.iter().map(|id| self.cache_key(id)).collect();
        let result = if keys.len() == 1 {
            self.cache_call("delete", self.cache.delete(&keys[0]))
                .await
                .map(usize::from)
        } else {
            self.cache_call("delete_multi", self.cache.delete_multi(&keys))
                .await
        };
        if let Err(e) = result {
            error!(
                "Cache invalidation of {} keys in {} failed, entries may be stale: {}",
                keys.len(),
                self.inner.table(),
                e
            );
        }
    }

    // Create

    pub async fn insert(&self, record: &T) -> Result<WriteResult> {
        let result = self.inner.insert(record).await?;
        self.populate(record).await;
        Ok(result)
    }

    pub async fn insert_many(&self, records: &[T]) -> Result<WriteResult> {
        let result = self.inner.insert_many(records).await?;
        for record in records {
            self.populate(record).await;
        }
        Ok(result)
    }

    // Read

    pub async fn get_by_id(&self, id: &str) -> Result<T> {
        if let Some(record) = self.cached(id).await {
            return Ok(record);
        }
        let record = self.inner.get_by_id(id).await?;
        self.populate(&record).await;
        Ok(record)
    }

    pub async fn find(&self, id: &str) -> Result<Option<T>> {
        match self.get_by_id(id).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // Update

    pub async fn update(&self, record: &T) -> Result<WriteResult> {
        let result = self.inner.update(record).await?;
        self.refresh(record.id()).await;
        Ok(result)
    }

    pub async fn update_id(&self, id: &str, partial: Document) -> Result<WriteResult> {
        let result = self.inner.update_id(id, partial).await?;
        self.refresh(id).await;
        Ok(result)
    }

    // Delete

    pub async fn delete_id(&self, id: &str) -> Result<WriteResult> {
        let result = self.inner.delete_id(id).await?;
        self.invalidate(&[id.to_string()]).await;
        Ok(result)
    }

    /// Delete by predicate, then drop exactly the removed ids from the cache
    pub async fn delete_where(&self, filter: &Filter) -> Result<WriteResult> {
        let result = self.inner.delete_where_tracked(filter).await?;
        self.invalidate(&result.changed_ids()).await;
        Ok(result)
    }

    /// Drop the cache entry for `id` without touching the store
    pub async fn evict(&self, id: &str) {
        self.invalidate(&[id.to_string()]).await;
    }

    // Owner-scoped access

    pub async fn get_owned(&self, id: &str, caller: &str) -> Result<T> {
        ensure_owner(self.get_by_id(id).await?, caller)
    }

    pub async fn update_owned(&self, record: &T, caller: &str) -> Result<WriteResult> {
        self.get_owned(record.id(), caller).await?;
        if record.owner() != caller {
            return Err(crate::guard::not_found(record.id()));
        }
        self.update(record).await
    }

    pub async fn update_id_owned(
        &self,
        id: &str,
        mut partial: Document,
        caller: &str,
    ) -> Result<WriteResult> {
        self.get_owned(id, caller).await?;
        partial.remove("owner");
        self.update_id(id, partial).await
    }

    pub async fn delete_owned(&self, id: &str, caller: &str) -> Result<WriteResult> {
        self.get_owned(id, caller).await?;
        self.delete_id(id).await
    }

    pub async fn list_owned(&self, owner: &str) -> Result<Vec<T>> {
        self.inner.list_owned(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::r#impl::InMemoryCache;
    use crate::docstore::r#impl::InMemoryDocumentStore;
    use crate::docstore::{DocumentStore, IndexSpec};
    use crate::filter;
    use crate::models::{Label, Token, TokenKind};
    use crate::resource_store::{to_document, Database};
    use chrono::TimeZone;

    async fn labels_with(cache: Arc<dyn Cache>) -> CachedResourceStore<Label> {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let db = Database::new(store.clone(), "test");
        store.create_database("test").await.unwrap();
        store.create_table(&db.table("labels")).await.unwrap();
        store
            .create_index(&db.table("labels"), &IndexSpec::simple("owner"))
            .await
            .unwrap();

        CachedResourceStore::new(ResourceStore::new(&db, "labels"), cache, TtlPolicy::Fixed(60))
    }

    async fn labels() -> (CachedResourceStore<Label>, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        (labels_with(cache.clone()).await, cache)
    }

    /// Holds back `replace` calls whose payload contains `marker`
    struct LaggingCache {
        inner: InMemoryCache,
        marker: &'static [u8],
        lag: Duration,
    }

    #[async_trait::async_trait]
    impl Cache for LaggingCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
            self.inner.set(key, value, ttl_secs).await
        }

        async fn replace(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
            if value.windows(self.marker.len()).any(|w| w == self.marker) {
                tokio::time::sleep(self.lag).await;
            }
            self.inner.replace(key, value, ttl_secs).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn delete_multi(&self, keys: &[String]) -> Result<usize> {
            self.inner.delete_multi(keys).await
        }

        async fn delete_mask(&self, pattern: &str) -> Result<usize> {
            self.inner.delete_mask(pattern).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
    }

    fn label(owner: &str, name: &str) -> Label {
        Label {
            resource: Resource::new(owner, name, Utc::now()),
            builtin: false,
            emails_total: 0,
            emails_unread: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_populates_cache() {
        let (labels, cache) = labels().await;
        let l = label("alice", "Work");
        labels.insert(&l).await.unwrap();
        assert!(cache.exists(&labels.cache_key(l.id())).await.unwrap());
    }

    #[tokio::test]
    async fn test_hit_does_not_touch_store() {
        let (labels, _cache) = labels().await;
        let l = label("alice", "Work");
        labels.insert(&l).await.unwrap();

        // Remove behind the decorator's back; the cached copy still answers
        labels.inner().delete_id(l.id()).await.unwrap();
        assert_eq!(labels.get_by_id(l.id()).await.unwrap(), l);
    }

    #[tokio::test]
    async fn test_update_id_refreshes_entry() {
        let (labels, cache) = labels().await;
        let l = label("alice", "Work");
        labels.insert(&l).await.unwrap();

        let partial = to_document(&serde_json::json!({"name": "Office"})).unwrap();
        labels.update_id(l.id(), partial).await.unwrap();

        assert!(cache.exists(&labels.cache_key(l.id())).await.unwrap());
        assert_eq!(labels.get_by_id(l.id()).await.unwrap().resource.name, "Office");
    }

    #[tokio::test]
    async fn test_delete_where_invalidates_only_removed_keys() {
        let (labels, cache) = labels().await;
        let a1 = label("alice", "a1");
        let a2 = label("alice", "a2");
        let b1 = label("bob", "b1");
        for l in [&a1, &a2, &b1] {
            labels.insert(l).await.unwrap();
        }

        let result = labels.delete_where(&filter!("owner" => "alice")).await.unwrap();
        assert_eq!(result.dropped, 2);

        assert!(!cache.exists(&labels.cache_key(a1.id())).await.unwrap());
        assert!(!cache.exists(&labels.cache_key(a2.id())).await.unwrap());
        assert!(cache.exists(&labels.cache_key(b1.id())).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_owner_is_not_found() {
        let (labels, _cache) = labels().await;
        let l = label("alice", "Work");
        labels.insert(&l).await.unwrap();

        assert!(matches!(
            labels.get_owned(l.id(), "bob").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            labels.delete_owned(l.id(), "bob").await,
            Err(Error::NotFound(_))
        ));
        assert!(labels.get_owned(l.id(), "alice").await.is_ok());
    }

    #[test]
    fn test_ttl_until_expiry_rounds_up() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut token = Token {
            resource: Resource::new("acc", "", now),
            expiry_date: now + chrono::Duration::milliseconds(1500),
            kind: TokenKind::Auth,
        };
        assert_eq!(TtlPolicy::UntilExpiry.ttl_for(&token, now), Some(2));

        token.expiry_date = now + chrono::Duration::days(365);
        assert_eq!(TtlPolicy::UntilExpiry.ttl_for(&token, now), Some(MAX_TTL_SECS));

        token.expiry_date = now;
        assert_eq!(TtlPolicy::UntilExpiry.ttl_for(&token, now), None);
    }

    #[tokio::test]
    async fn test_cache_key_names_database() {
        let (labels, _cache) = labels().await;
        assert_eq!(labels.cache_key("abc"), "test:labels:abc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_refresh_does_not_win() {
        let cache = Arc::new(LaggingCache {
            inner: InMemoryCache::new(),
            marker: b"AAA",
            lag: Duration::from_millis(100),
        });
        let labels = labels_with(cache).await;
        let l = label("alice", "Work");
        labels.insert(&l).await.unwrap();

        let first = {
            let labels = labels.clone();
            let id = l.id().to_string();
            tokio::spawn(async move {
                let partial = to_document(&serde_json::json!({"name": "AAA"})).unwrap();
                labels.update_id(&id, partial).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let partial = to_document(&serde_json::json!({"name": "BBB"})).unwrap();
        labels.update_id(l.id(), partial).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(labels.inner().get_by_id(l.id()).await.unwrap().resource.name, "BBB");
        assert_eq!(labels.get_by_id(l.id()).await.unwrap().resource.name, "BBB");
    }
}
