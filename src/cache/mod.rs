//! Cache trait and implementations
//!
//! The Cache is a key/value store with per-key expiry that sits in front of
//! the document store for read-heavy tables.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

pub mod r#impl;

/// Connection options for a cache backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub address: String,
    /// Logical database index inside the cache server
    pub database: i64,
    pub password: String,
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Value stored under `key`, or `None` on a miss
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` only if `key` is absent. An existing, unexpired key is
    /// left alone and reported as `AlreadyCached`. Atomic in every backend.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()>;

    /// Store `value` whether or not `key` is present
    async fn replace(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()>;

    /// Remove one key. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove a list of keys in one round trip. Returns how many were present.
    async fn delete_multi(&self, keys: &[String]) -> Result<usize>;

    /// Remove every key matching a glob-style pattern (`*` and `?`)
    async fn delete_mask(&self, pattern: &str) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Longest lifetime any cache entry may have (30 days)
pub const MAX_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Reject TTLs that would mean "never expire" or that exceed `MAX_TTL_SECS`
pub fn check_ttl(ttl_secs: i64) -> Result<Duration> {
    if ttl_secs <= 0 || ttl_secs > MAX_TTL_SECS {
        return Err(Error::InvalidTtl(ttl_secs));
    }
    Ok(Duration::from_secs(ttl_secs as u64))
}

/// Compile a glob-style key mask into an anchored regex
pub fn mask_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| Error::InvalidArgument(format!("Invalid key mask: {}", e)))
}
