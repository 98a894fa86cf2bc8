//! Token authority
//!
//! Tokens are stored resources whose id is the bearer credential. A token
//! is valid strictly before its expiry date. Expired tokens are deleted the
//! first time they are presented; there is no background sweep.

use async_trait::async_trait;
use chrono::Duration;
use log::{debug, error, info};

use crate::authenticator::Authenticator;
use crate::error::{Error, Result};
use crate::models::{Account, Token, TokenKind};
use crate::tables::{AccountsTable, TokensTable};
use crate::types::*;

/// Default lifetime of a session token
pub const DEFAULT_SESSION_HOURS: i64 = 72;

#[derive(Clone)]
pub struct TokenAuthority {
    accounts: AccountsTable,
    tokens: TokensTable,
    session_duration: Duration,
}

impl TokenAuthority {
    pub fn new(accounts: AccountsTable, tokens: TokensTable) -> Self {
        Self {
            accounts,
            tokens,
            session_duration: Duration::hours(DEFAULT_SESSION_HOURS),
        }
    }

    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.tokens.store().inner().database().now()
    }

    /// Issue a token of `kind` for `account_id`, valid for `ttl`
    pub async fn issue(&self, account_id: &str, kind: TokenKind, ttl: Duration) -> Result<Token> {
        self.tokens.create(account_id, kind, ttl).await
    }

    /// Delete an expired token and report it as expired
    async fn evict(&self, token: &Token) -> Error {
        info!(
            "Evicting expired {} token of {}",
            token.kind.as_str(),
            token.owner()
        );
        if let Err(e) = self.tokens.delete(token.id()).await {
            error!("Deleting expired token {} failed: {}", token.id(), e);
        }
        Error::ExpiredToken
    }

    /// Look up a live token of any kind
    pub async fn validate(&self, id: &str) -> Result<Token> {
        let token = self.tokens.find(id).await?.ok_or(Error::InvalidToken)?;
        if token.is_expired(self.now()) {
            return Err(self.evict(&token).await);
        }
        Ok(token)
    }

    /// Explicit logout. Revoking an unknown token is not an error.
    pub async fn revoke(&self, id: &str) -> Result<()> {
        if self.tokens.delete(id).await? {
            debug!("Revoked token {}", id);
        }
        Ok(())
    }

    /// Revoke every token of an account
    pub async fn revoke_all(&self, account_id: &str) -> Result<usize> {
        self.tokens.delete_for_owner(account_id).await
    }

    /// Check credentials and start a session
    pub async fn login(&self, credentials: &Credentials) -> Result<Token> {
        let account = self
            .accounts
            .verify_password(&credentials.username, &credentials.password)
            .await?
            .ok_or_else(|| Error::InvalidArgument("Wrong username or password".to_string()))?;

        let token = self
            .issue(account.id(), TokenKind::Auth, self.session_duration)
            .await?;
        info!("Account {} logged in", account.resource.name);
        Ok(token)
    }

    /// Consume a single-use token of `kind` issued for `account_id`
    pub async fn redeem(&self, id: &str, kind: TokenKind, account_id: &str) -> Result<Token> {
        let token = self.validate(id).await?;
        if token.kind != kind || token.owner() != account_id {
            debug!("Token {} does not match {} for {}", id, kind.as_str(), account_id);
            return Err(Error::InvalidToken);
        }
        self.tokens.delete(id).await?;
        Ok(token)
    }
}

#[async_trait]
impl Authenticator for TokenAuthority {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token> {
        self.login(credentials).await
    }

    async fn validate_token(&self, token: &str) -> Result<(Account, Token)> {
        let token = self.validate(token).await?;
        if token.kind != TokenKind::Auth {
            return Err(Error::InvalidToken);
        }

        match self.accounts.find(token.owner()).await? {
            Some(account) => Ok((account, token)),
            None => {
                info!("Removing token {} of deleted account {}", token.id(), token.owner());
                self.tokens.delete(token.id()).await?;
                Err(Error::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::r#impl::InMemoryCache;
    use crate::docstore::r#impl::InMemoryDocumentStore;
    use crate::docstore::DocumentStore;
    use crate::resource_store::Database;
    use crate::setup::bootstrap_database;
    use crate::tables::LabelsTable;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    struct Fixture {
        clock: ManualClock,
        authority: TokenAuthority,
        accounts: AccountsTable,
        labels: LabelsTable,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        bootstrap_database(store.as_ref(), "test").await.unwrap();

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let db = Database::new(store, "test").with_clock(Arc::new(clock.clone()));
        let cache = Arc::new(InMemoryCache::new());

        let accounts = AccountsTable::new(&db).with_hash_cost(4);
        let labels = LabelsTable::new(&db, cache.clone(), 60);
        let tokens = TokensTable::new(&db, cache);
        Fixture {
            clock,
            authority: TokenAuthority::new(accounts.clone(), tokens),
            accounts,
            labels,
        }
    }

    #[tokio::test]
    async fn test_login_and_validate() {
        let f = fixture().await;
        let account = f.accounts.register("alice", "secret", &f.labels).await.unwrap();

        let creds = Credentials {
            username: "Alice".to_string(),
            password: "secret".to_string(),
        };
        let token = f.authority.authenticate(&creds).await.unwrap();
        assert_eq!(token.owner(), account.id());

        let header = format!("Bearer {}", token.id());
        let (resolved, _) = f.authority.authenticate_header(Some(header.as_str())).await.unwrap();
        assert_eq!(resolved.id(), account.id());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let f = fixture().await;
        f.accounts.register("alice", "secret", &f.labels).await.unwrap();

        let creds = Credentials {
            username: "alice".to_string(),
            password: "nope".to_string(),
        };
        assert!(matches!(
            f.authority.authenticate(&creds).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let f = fixture().await;
        let token = f
            .authority
            .issue("acc", TokenKind::Auth, Duration::seconds(10))
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(9));
        assert!(f.authority.validate(token.id()).await.is_ok());

        f.clock.advance(Duration::seconds(1));
        assert!(matches!(
            f.authority.validate(token.id()).await,
            Err(Error::ExpiredToken)
        ));
        assert!(matches!(
            f.authority.validate(token.id()).await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let f = fixture().await;
        let token = f
            .authority
            .issue("acc", TokenKind::Auth, Duration::hours(1))
            .await
            .unwrap();
        f.authority.revoke(token.id()).await.unwrap();
        f.authority.revoke(token.id()).await.unwrap();
        assert!(matches!(
            f.authority.validate(token.id()).await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_orphaned_token_is_removed() {
        let f = fixture().await;
        let account = f.accounts.register("alice", "secret", &f.labels).await.unwrap();
        let token = f
            .authority
            .issue(account.id(), TokenKind::Auth, Duration::hours(1))
            .await
            .unwrap();

        f.accounts.delete(account.id()).await.unwrap();
        assert!(matches!(
            f.authority.validate_token(token.id()).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            f.authority.validate(token.id()).await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_invite_tokens() {
        let f = fixture().await;
        let invite = f
            .authority
            .issue("acc", TokenKind::Invite, Duration::days(7))
            .await
            .unwrap();

        // Invites never authorize requests
        assert!(matches!(
            f.authority.validate_token(invite.id()).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            f.authority.redeem(invite.id(), TokenKind::Invite, "other").await,
            Err(Error::InvalidToken)
        ));

        f.authority
            .redeem(invite.id(), TokenKind::Invite, "acc")
            .await
            .unwrap();
        assert!(matches!(
            f.authority.redeem(invite.id(), TokenKind::Invite, "acc").await,
            Err(Error::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.authority
                .issue("acc", TokenKind::Invite, Duration::days(365 * 300_000))
                .await,
            Err(Error::InvalidArgument(_))
        ));

        // Far but representable expiry dates still work
        let token = f
            .authority
            .issue("acc", TokenKind::Auth, Duration::days(365 * 100))
            .await
            .unwrap();
        assert!(f.authority.validate(token.id()).await.is_ok());
    }
}
