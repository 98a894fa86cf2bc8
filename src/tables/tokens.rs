//! Tokens table, cached for each token's remaining lifetime

use chrono::Duration;
use log::debug;
use std::sync::Arc;

use crate::cache::Cache;
use crate::cached_store::{CachedResourceStore, TtlPolicy};
use crate::error::{Error, Result};
use crate::filter;
use crate::models::{Token, TokenKind};
use crate::resource_store::{Database, ResourceStore};
use crate::tables::TOKENS;
use crate::types::*;

#[derive(Clone)]
pub struct TokensTable {
    tokens: CachedResourceStore<Token>,
}

impl TokensTable {
    pub fn new(db: &Database, cache: Arc<dyn Cache>) -> Self {
        Self {
            tokens: CachedResourceStore::new(
                ResourceStore::new(db, TOKENS),
                cache,
                TtlPolicy::UntilExpiry,
            ),
        }
    }

    pub fn with_cache_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.tokens = self.tokens.with_timeout(timeout);
        self
    }

    pub fn store(&self) -> &CachedResourceStore<Token> {
        &self.tokens
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.tokens.inner().database().now()
    }

    /// Create and store a token for `owner` expiring `ttl` from now
    pub async fn create(&self, owner: &str, kind: TokenKind, ttl: Duration) -> Result<Token> {
        if ttl <= Duration::zero() {
            return Err(Error::InvalidArgument(format!(
                "Token lifetime must be positive, got {}s",
                ttl.num_seconds()
            )));
        }

        let now = self.now();
        let expiry_date = now.checked_add_signed(ttl).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Token lifetime of {}s is out of range",
                ttl.num_seconds()
            ))
        })?;
        let token = Token {
            resource: Resource::new(owner, "", now),
            expiry_date,
            kind,
        };
        self.tokens.insert(&token).await?;
        debug!("Issued {} token for {}", kind.as_str(), owner);
        Ok(token)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Token>> {
        self.tokens.find(id).await
    }

    /// Remove a token. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tokens.delete_id(id).await?.dropped > 0)
    }

    pub async fn delete_for_owner(&self, owner: &str) -> Result<usize> {
        Ok(self.tokens.delete_where(&filter!("owner" => owner)).await?.dropped)
    }

    pub async fn list_owned(&self, owner: &str) -> Result<Vec<Token>> {
        self.tokens.list_owned(owner).await
    }
}
