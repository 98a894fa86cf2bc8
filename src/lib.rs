//! Lockbox - Data-access layer for an encrypted webmail service
//!
//! This library provides ownership-scoped storage of user resources over a
//! document store, a cache in front of read-heavy tables, and the bearer
//! token lifecycle that gates every authenticated request.

pub mod error;
pub mod types;
pub mod models;
pub mod docstore;
pub mod guard;
pub mod resource_store;
pub mod cache;
pub mod cached_store;
pub mod aggregation;
pub mod authenticator;
pub mod tables;
pub mod setup;
pub mod config;
pub mod context;

pub use error::{Error, Result};
pub use types::*;
pub use docstore::{Cursor, DocumentStore, IndexSpec};
pub use resource_store::{Database, ResourceStore};
pub use cache::Cache;
pub use cached_store::{CachedResourceStore, TtlPolicy};
pub use aggregation::LabelCounter;
pub use authenticator::Authenticator;
pub use authenticator::r#impl::TokenAuthority;
pub use config::Config;
pub use context::{RequestContext, Services};

#[cfg(test)]
mod tests;
