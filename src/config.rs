//! Configuration
//!
//! Loaded from a TOML file, then overridden from `LOCKBOX_*` environment
//! variables.

use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::{CacheOptions, MAX_TTL_SECS};
use crate::error::{Error, Result};
use crate::setup::DEFAULT_DATABASES;
use crate::authenticator::r#impl::token::DEFAULT_SESSION_HOURS;
use crate::tables::labels::DEFAULT_LABEL_TTL;

/// Longest session a token may be issued for (one year)
pub const MAX_SESSION_HOURS: i64 = 24 * 365;

/// Document store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,

    /// File path for the sqlite backend
    pub address: String,

    pub auth_key: String,

    /// Database used by the running service
    pub database: String,

    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            address: "lockbox.db".to_string(),
            auth_key: String::new(),
            database: "dev".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Cache backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local; instances do not share entries
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    #[serde(flatten)]
    pub options: CacheOptions,

    pub timeout_ms: u64,

    /// Lifetime of cached labels
    pub label_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            options: CacheOptions::default(),
            timeout_ms: 1000,
            label_ttl_secs: DEFAULT_LABEL_TTL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub session_duration_hours: i64,
    /// bcrypt cost for stored passwords
    pub password_hash_cost: u32,
    /// Databases created by the bootstrap
    pub databases: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            session_duration_hours: DEFAULT_SESSION_HOURS,
            password_hash_cost: bcrypt::DEFAULT_COST,
            databases: DEFAULT_DATABASES.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Read `path` if given, apply the environment and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                let content = fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from variables looked up through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("LOCKBOX_STORE_URL") {
            self.store.address = v;
        }
        if let Some(v) = var("LOCKBOX_STORE_AUTHKEY") {
            self.store.auth_key = v;
        }
        if let Some(v) = var("LOCKBOX_ENV") {
            self.store.database = v;
        }
        if let Some(v) = var("LOCKBOX_CACHE_BACKEND") {
            self.cache.backend = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => CacheBackend::Memory,
                "redis" => CacheBackend::Redis,
                other => {
                    return Err(Error::Config(format!(
                        "LOCKBOX_CACHE_BACKEND must be memory or redis, got {:?}",
                        other
                    )))
                }
            };
        }
        if let Some(v) = var("LOCKBOX_CACHE_URL") {
            self.cache.options.address = v;
        }
        if let Some(v) = var("LOCKBOX_CACHE_DB") {
            self.cache.options.database = parse_number("LOCKBOX_CACHE_DB", &v)?;
        }
        if let Some(v) = var("LOCKBOX_CACHE_PASSWORD") {
            self.cache.options.password = v;
        }
        if let Some(v) = var("LOCKBOX_SESSION_HOURS") {
            self.session_duration_hours = parse_number("LOCKBOX_SESSION_HOURS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.databases.iter().any(|d| d == &self.store.database) {
            return Err(Error::Config(format!(
                "Database {:?} is not one of {:?}",
                self.store.database, self.databases
            )));
        }
        if !(1..=MAX_SESSION_HOURS).contains(&self.session_duration_hours) {
            return Err(Error::Config(format!(
                "session_duration_hours must be between 1 and {}",
                MAX_SESSION_HOURS
            )));
        }
        if !(4..=31).contains(&self.password_hash_cost) {
            return Err(Error::Config(
                "password_hash_cost must be between 4 and 31".to_string(),
            ));
        }
        match self.cache.backend {
            CacheBackend::Memory => {
                if !self.cache.options.address.is_empty() || !self.cache.options.password.is_empty()
                {
                    return Err(Error::Config(
                        "cache address and password need backend = \"redis\"".to_string(),
                    ));
                }
            }
            CacheBackend::Redis => {
                if self.cache.options.address.trim().is_empty() {
                    return Err(Error::Config(
                        "The redis cache needs an address".to_string(),
                    ));
                }
            }
        }
        if !(1..=MAX_TTL_SECS).contains(&self.cache.label_ttl_secs) {
            return Err(Error::Config(format!(
                "label_ttl_secs must be between 1 and {}",
                MAX_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.timeout_ms)
    }

    /// Session lifetime. An unvalidated, out-of-range value falls back to
    /// the default.
    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.session_duration_hours)
            .filter(|d| *d > chrono::Duration::zero())
            .unwrap_or_else(|| {
                warn!(
                    "session_duration_hours {} is out of range, using {}",
                    self.session_duration_hours, DEFAULT_SESSION_HOURS
                );
                chrono::Duration::hours(DEFAULT_SESSION_HOURS)
            })
    }
}

fn parse_number(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session_duration_hours, 72);
        assert_eq!(config.databases, vec!["prod", "staging", "dev", "test"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml(
            r#"
            session_duration_hours = 24

            [store]
            backend = "sqlite"
            address = "/var/lib/lockbox.db"
            database = "prod"

            [cache]
            backend = "redis"
            address = "localhost:6379"
            database = 2
            label_ttl_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.store.database, "prod");
        assert_eq!(config.store.timeout_ms, 5000);
        assert_eq!(config.cache.options.address, "localhost:6379");
        assert_eq!(config.cache.options.database, 2);
        assert_eq!(config.cache.label_ttl_secs, 30);
        assert_eq!(config.session_duration(), chrono::Duration::hours(24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_options_need_redis() {
        let vars: HashMap<&str, &str> = [("LOCKBOX_CACHE_URL", "cache.internal:6379")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config
            .apply_env(|key| (key == "LOCKBOX_CACHE_BACKEND").then(|| "Redis".to_string()))
            .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert!(config.validate().is_ok());

        config.cache.options.address.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOCKBOX_ENV", "staging"),
            ("LOCKBOX_CACHE_DB", "3"),
            ("LOCKBOX_SESSION_HOURS", "12"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.database, "staging");
        assert_eq!(config.cache.options.database, 3);
        assert_eq!(config.session_duration_hours, 12);
    }

    #[test]
    fn test_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env(|key| (key == "LOCKBOX_CACHE_DB").then(|| "x".to_string())),
            Err(Error::Config(_))
        ));

        config.store.database = "qa".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        let vars: HashMap<&str, String> =
            [("LOCKBOX_SESSION_HOURS", i64::MAX.to_string())].into_iter().collect();
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).cloned()).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(
            config.session_duration(),
            chrono::Duration::hours(DEFAULT_SESSION_HOURS)
        );

        let mut config = Config::default();
        config.cache.label_ttl_secs = MAX_TTL_SECS + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
