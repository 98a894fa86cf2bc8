//! Service and request contexts
//!
//! `Services` holds one instance of every table, built once at startup and
//! shared by all requests. `RequestContext` is what a handler gets after
//! the bearer token of a request has been resolved.

use log::{info, warn};
use std::sync::Arc;

use crate::authenticator::r#impl::TokenAuthority;
use crate::authenticator::Authenticator;
use crate::cache::r#impl::{InMemoryCache, RedisCache};
use crate::cache::Cache;
use crate::config::{Backend, CacheBackend, Config};
use crate::docstore::r#impl::{InMemoryDocumentStore, SqliteDocumentStore};
use crate::docstore::DocumentStore;
use crate::error::Result;
use crate::filter;
use crate::models::{Account, Contact, Label, LabelWithCounts, Token};
use crate::resource_store::{Database, ResourceStore};
use crate::tables::*;
use crate::types::*;

pub struct Services {
    pub db: Database,
    pub cache: Arc<dyn Cache>,
    pub accounts: AccountsTable,
    pub tokens: TokensTable,
    pub labels: LabelsTable,
    pub threads: ThreadsTable,
    pub emails: EmailsTable,
    pub contacts: ContactsTable,
    pub files: FilesTable,
    pub attachments: AttachmentsTable,
    pub keys: KeysTable,
    pub authority: TokenAuthority,
}

impl Services {
    pub fn new(db: Database, cache: Arc<dyn Cache>, config: &Config) -> Self {
        let accounts = AccountsTable::new(&db).with_hash_cost(config.password_hash_cost);
        let tokens = TokensTable::new(&db, cache.clone()).with_cache_timeout(config.cache_timeout());
        let labels = LabelsTable::new(&db, cache.clone(), config.cache.label_ttl_secs)
            .with_cache_timeout(config.cache_timeout());
        let authority = TokenAuthority::new(accounts.clone(), tokens.clone())
            .with_session_duration(config.session_duration());

        Self {
            accounts,
            tokens,
            labels,
            threads: ThreadsTable::new(&db),
            emails: ResourceStore::new(&db, EMAILS),
            contacts: ResourceStore::new(&db, CONTACTS),
            files: ResourceStore::new(&db, FILES),
            attachments: ResourceStore::new(&db, ATTACHMENTS),
            keys: ResourceStore::new(&db, KEYS),
            authority,
            cache,
            db,
        }
    }

    /// Connect the configured store and cache
    pub async fn connect(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store.backend {
            Backend::Memory => {
                warn!("Using the in-memory document store; nothing survives a restart");
                Arc::new(InMemoryDocumentStore::new())
            }
            Backend::Sqlite => {
                info!("Opening sqlite document store at {}", config.store.address);
                Arc::new(SqliteDocumentStore::new(&config.store.address).await?)
            }
        };
        let cache: Arc<dyn Cache> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryCache::connect(&config.cache.options)?),
            CacheBackend::Redis => Arc::new(RedisCache::connect(&config.cache.options).await?),
        };

        let db = Database::new(store, config.store.database.clone())
            .with_timeout(config.store_timeout());
        Ok(Self::new(db, cache, config))
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Account> {
        self.accounts.register(username, password, &self.labels).await
    }

    /// Resolve an `Authorization` header into a request context
    pub async fn authenticate(self: &Arc<Self>, header: Option<&str>) -> Result<RequestContext> {
        let (account, token) = self.authority.authenticate_header(header).await?;
        Ok(RequestContext {
            services: Arc::clone(self),
            account,
            token,
        })
    }

    /// Delete an account and everything it owns. Returns how many records
    /// were removed.
    pub async fn delete_account(&self, account_id: &str) -> Result<usize> {
        let owned = filter!("owner" => account_id);
        let mut dropped = 0;

        dropped += self.authority.revoke_all(account_id).await?;
        dropped += self.labels.delete_for_owner(account_id).await?;
        dropped += self.threads.store().delete_where(&owned).await?.dropped;
        dropped += self.emails.delete_where(&owned).await?.dropped;
        dropped += self.contacts.delete_where(&owned).await?.dropped;
        dropped += self.files.delete_where(&owned).await?.dropped;
        dropped += self.attachments.delete_where(&owned).await?.dropped;
        dropped += self.keys.delete_where(&owned).await?.dropped;
        if self.accounts.delete(account_id).await? {
            dropped += 1;
        }

        info!("Deleted account {} ({} records)", account_id, dropped);
        Ok(dropped)
    }
}

/// An authenticated request
pub struct RequestContext {
    pub services: Arc<Services>,
    pub account: Account,
    pub token: Token,
}

impl RequestContext {
    pub fn account_id(&self) -> &str {
        self.account.id()
    }

    pub async fn logout(&self) -> Result<()> {
        self.services.authority.revoke(self.token.id()).await
    }

    pub async fn labels(&self) -> Result<Vec<LabelWithCounts>> {
        self.services.labels.list_with_counts(self.account_id()).await
    }

    pub async fn label(&self, id: &str) -> Result<LabelWithCounts> {
        self.services.labels.get_with_counts(id, self.account_id()).await
    }

    pub async fn create_label(&self, name: &str) -> Result<Label> {
        self.services.labels.create(self.account_id(), name).await
    }

    pub async fn contact(&self, id: &str) -> Result<Contact> {
        self.services.contacts.get_owned(id, self.account_id()).await
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        self.services.contacts.list_owned(self.account_id()).await
    }
}
