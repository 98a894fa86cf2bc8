//! In-memory cache implementation

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::{check_ttl, mask_to_regex, Cache, CacheOptions};
use crate::error::{Error, Result};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local cache. Expired entries are dropped when next touched.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mirrors the connect call of networked backends. A process-local cache
    /// has nowhere to connect to, so an address or password is refused
    /// rather than ignored.
    pub fn connect(options: &CacheOptions) -> Result<Self> {
        if !options.address.is_empty() || !options.password.is_empty() {
            return Err(Error::Config(format!(
                "The in-memory cache takes no address or password (got address {:?}); \
                 use the redis backend",
                options.address
            )));
        }
        debug!("Using in-memory cache");
        Ok(Self::new())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
        let ttl = check_ttl(ttl_secs)?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if entries.get(key).map_or(false, |entry| entry.is_live(now)) {
            return Err(Error::AlreadyCached(key.to_string()));
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn replace(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
        let ttl = check_ttl(ttl_secs)?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.remove(key).map_or(false, |entry| entry.is_live(now)))
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count())
    }

    async fn delete_mask(&self, pattern: &str) -> Result<usize> {
        let re = mask_to_regex(pattern)?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let matching: Vec<String> = entries
            .keys()
            .filter(|key| re.is_match(key))
            .cloned()
            .collect();

        Ok(matching
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .map_or(false, |entry| entry.is_live(Instant::now())))
    }
}
