//! Labels table
//!
//! Labels are read on nearly every request and rarely written, so the table
//! sits behind the cache. Builtin labels are created with the account and
//! cannot be renamed or deleted by their owner.

use std::sync::Arc;

use crate::aggregation::LabelCounter;
use crate::cache::Cache;
use crate::cached_store::{CachedResourceStore, TtlPolicy};
use crate::error::{Error, Result};
use crate::filter;
use crate::models::{Label, LabelWithCounts, Thread, BUILTIN_LABELS};
use crate::resource_store::{Database, ResourceStore};
use crate::tables::{LABELS, THREADS};
use crate::types::*;

/// Default cache lifetime of a label
pub const DEFAULT_LABEL_TTL: i64 = 60;

#[derive(Clone)]
pub struct LabelsTable {
    labels: CachedResourceStore<Label>,
    counter: LabelCounter,
}

impl LabelsTable {
    pub fn new(db: &Database, cache: Arc<dyn Cache>, ttl_secs: i64) -> Self {
        let store: ResourceStore<Label> = ResourceStore::new(db, LABELS);
        let threads: ResourceStore<Thread> = ResourceStore::new(db, THREADS);
        Self {
            counter: LabelCounter::new(store.clone(), threads),
            labels: CachedResourceStore::new(store, cache, TtlPolicy::Fixed(ttl_secs)),
        }
    }

    pub fn with_cache_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.labels = self.labels.with_timeout(timeout);
        self
    }

    pub fn store(&self) -> &CachedResourceStore<Label> {
        &self.labels
    }

    pub fn counter(&self) -> &LabelCounter {
        &self.counter
    }

    /// The builtin label set for a new account, not yet stored
    pub fn builtin_set(&self, owner: &str) -> Vec<Label> {
        let now = self.labels.inner().database().now();
        BUILTIN_LABELS
            .iter()
            .map(|name| Label {
                resource: Resource::new(owner, *name, now),
                builtin: true,
                emails_total: 0,
                emails_unread: 0,
            })
            .collect()
    }

    /// Store the builtin labels of `owner` in one batch
    pub async fn create_builtins(&self, owner: &str) -> Result<Vec<Label>> {
        let labels = self.builtin_set(owner);
        self.labels.insert_many(&labels).await?;
        Ok(labels)
    }

    pub async fn create(&self, owner: &str, name: &str) -> Result<Label> {
        let label = Label {
            resource: Resource::new(owner, name, self.labels.inner().database().now()),
            builtin: false,
            emails_total: 0,
            emails_unread: 0,
        };
        self.labels.insert(&label).await?;
        Ok(label)
    }

    pub async fn get_owned(&self, id: &str, caller: &str) -> Result<Label> {
        self.labels.get_owned(id, caller).await
    }

    /// A label of `caller` with its thread counters
    pub async fn get_with_counts(&self, id: &str, caller: &str) -> Result<LabelWithCounts> {
        let label = self.labels.get_owned(id, caller).await?;
        self.counter.label_with_counts(label).await
    }

    /// Every label of `owner` with its thread counters
    pub async fn list_with_counts(&self, owner: &str) -> Result<Vec<LabelWithCounts>> {
        let labels = self.labels.list_owned(owner).await?;
        self.counter.labels_with_counts(owner, labels).await
    }

    pub async fn rename(&self, id: &str, name: &str, caller: &str) -> Result<Label> {
        let mut label = self.labels.get_owned(id, caller).await?;
        if label.builtin {
            return Err(Error::BuiltinLabel(label.resource.name));
        }
        label.resource.name = name.to_string();
        self.labels.inner().touch(&mut label);
        self.labels.update(&label).await?;
        Ok(label)
    }

    pub async fn delete(&self, id: &str, caller: &str) -> Result<()> {
        let label = self.labels.get_owned(id, caller).await?;
        if label.builtin {
            return Err(Error::BuiltinLabel(label.resource.name));
        }
        self.labels.delete_id(id).await?;
        Ok(())
    }

    /// Remove every label of `owner`, builtin ones included
    pub async fn delete_for_owner(&self, owner: &str) -> Result<usize> {
        Ok(self.labels.delete_where(&filter!("owner" => owner)).await?.dropped)
    }
}
