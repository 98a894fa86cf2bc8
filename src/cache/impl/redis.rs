//! Redis cache implementation
//!
//! One multiplexed connection is shared by every caller; each operation
//! clones the handle rather than opening a connection.

use async_trait::async_trait;
use log::{debug, info};
use ::redis::aio::MultiplexedConnection;
use ::redis::{ConnectionInfo, IntoConnectionInfo};

use crate::cache::{check_ttl, Cache, CacheOptions};
use crate::error::{Error, Result};

/// Keys requested per SCAN round trip in `delete_mask`
const SCAN_BATCH: usize = 500;

pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(options: &CacheOptions) -> Result<Self> {
        let info = connection_info(options)?;
        info!(
            "Connecting to redis cache at {} (database {})",
            options.address, options.database
        );
        let client = ::redis::Client::open(info)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

/// Connection details for `options`. The address is either `host:port` or a
/// full `redis://` URL; the database index and password override whatever
/// the URL carries.
pub fn connection_info(options: &CacheOptions) -> Result<ConnectionInfo> {
    if options.address.trim().is_empty() {
        return Err(Error::Config("The redis cache needs an address".to_string()));
    }
    let url = if options.address.contains("://") {
        options.address.clone()
    } else {
        format!("redis://{}", options.address)
    };

    let mut info = url.as_str().into_connection_info()?;
    info.redis.db = options.database;
    if !options.password.is_empty() {
        info.redis.password = Some(options.password.clone());
    }
    Ok(info)
}

/// Translate a `*`/`?` key mask into a redis MATCH pattern, escaping the
/// characters redis would otherwise treat as glob syntax.
pub fn redis_mask(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '[' | ']' | '\\' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
        check_ttl(ttl_secs)?;
        let mut conn = self.conn.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(Error::AlreadyCached(key.to_string())),
        }
    }

    async fn replace(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<()> {
        check_ttl(ttl_secs)?;
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = ::redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn delete_mask(&self, pattern: &str) -> Result<usize> {
        let pattern = redis_mask(pattern);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: usize = ::redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Removed {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: usize = ::redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found > 0)
    }
}
