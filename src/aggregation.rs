//! Thread counters for labels
//!
//! Counts are computed from the threads table on every read and never
//! written back to the label. A thread filed under Spam, Trash or Sent is
//! never counted as unread, whichever label is being counted.

use log::debug;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{Label, LabelWithCounts, Thread, EXCLUDED_LABELS};
use crate::resource_store::ResourceStore;
use crate::types::*;

/// Compound index resolving builtin labels by (name, owner, builtin)
pub const BUILTIN_INDEX: &str = "name_owner_builtin";

/// Multi-valued index over `Thread::labels`
pub const THREAD_LABELS_INDEX: &str = "labels";

/// Label ids whose threads are never counted as unread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions(HashSet<String>);

impl Exclusions {
    pub fn contains(&self, label_id: &str) -> bool {
        self.0.contains(label_id)
    }

    /// Whether `thread` is filed under any excluded label
    pub fn touches(&self, thread: &Thread) -> bool {
        thread.labels.iter().any(|id| self.0.contains(id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadCounts {
    pub total: usize,
    pub unread: usize,
}

#[derive(Clone)]
pub struct LabelCounter {
    labels: ResourceStore<Label>,
    threads: ResourceStore<Thread>,
}

impl LabelCounter {
    pub fn new(labels: ResourceStore<Label>, threads: ResourceStore<Thread>) -> Self {
        Self { labels, threads }
    }

    /// Resolve the owner's Spam, Trash and Sent label ids in one index lookup
    pub async fn exclusions(&self, owner: &str) -> Result<Exclusions> {
        let lookups: Vec<IndexKey> = EXCLUDED_LABELS
            .iter()
            .map(|name| vec![Value::from(*name), Value::from(owner), Value::Bool(true)])
            .collect();

        let found = self.labels.find_by_index_fetch(BUILTIN_INDEX, &lookups).await?;
        if found.len() != EXCLUDED_LABELS.len() {
            return Err(Error::MissingBuiltinLabels {
                owner: owner.to_string(),
                found: found.len(),
            });
        }

        Ok(Exclusions(
            found.into_iter().map(|label| label.resource.id).collect(),
        ))
    }

    pub async fn count(&self, label_id: &str, exclusions: &Exclusions) -> Result<ThreadCounts> {
        let threads = self
            .threads
            .find_by_index_fetch(THREAD_LABELS_INDEX, &[vec![Value::from(label_id)]])
            .await?;

        let unread = threads
            .iter()
            .filter(|thread| !thread.is_read && !exclusions.touches(thread))
            .count();

        debug!(
            "Label {}: {} threads, {} unread",
            label_id,
            threads.len(),
            unread
        );
        Ok(ThreadCounts {
            total: threads.len(),
            unread,
        })
    }

    pub async fn with_counts(&self, label: Label, exclusions: &Exclusions) -> Result<LabelWithCounts> {
        let counts = self.count(label.id(), exclusions).await?;
        Ok(LabelWithCounts {
            label,
            threads_total: counts.total,
            threads_unread: counts.unread,
        })
    }

    /// Counts for one label, resolving its owner's exclusions first
    pub async fn label_with_counts(&self, label: Label) -> Result<LabelWithCounts> {
        let exclusions = self.exclusions(label.owner()).await?;
        self.with_counts(label, &exclusions).await
    }

    /// Counts for several labels of one owner, sharing one exclusion lookup
    pub async fn labels_with_counts(
        &self,
        owner: &str,
        labels: Vec<Label>,
    ) -> Result<Vec<LabelWithCounts>> {
        let exclusions = self.exclusions(owner).await?;
        let mut counted = Vec::with_capacity(labels.len());
        for label in labels {
            counted.push(self.with_counts(label, &exclusions).await?);
        }
        Ok(counted)
    }
}
