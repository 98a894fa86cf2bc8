//! Threads table

use serde_json::Value;

use crate::aggregation::THREAD_LABELS_INDEX;
use crate::error::Result;
use crate::models::Thread;
use crate::resource_store::{to_document, Database, ResourceStore};
use crate::tables::THREADS;

#[derive(Clone)]
pub struct ThreadsTable {
    threads: ResourceStore<Thread>,
}

impl ThreadsTable {
    pub fn new(db: &Database) -> Self {
        Self {
            threads: ResourceStore::new(db, THREADS),
        }
    }

    pub fn store(&self) -> &ResourceStore<Thread> {
        &self.threads
    }

    /// Threads filed under `label_id`
    pub async fn list_by_label(&self, label_id: &str) -> Result<Vec<Thread>> {
        self.threads
            .find_by_index_fetch(THREAD_LABELS_INDEX, &[vec![Value::from(label_id)]])
            .await
    }

    /// Replace the label set of a thread owned by `caller`
    pub async fn set_labels(&self, id: &str, labels: Vec<String>, caller: &str) -> Result<Thread> {
        let mut thread = self.threads.get_owned(id, caller).await?;
        thread.labels = labels;
        self.threads.touch(&mut thread);
        self.threads.update(&thread).await?;
        Ok(thread)
    }

    pub async fn mark_read(&self, id: &str, is_read: bool, caller: &str) -> Result<()> {
        let thread = self.threads.get_owned(id, caller).await?;
        let mut partial = to_document(&serde_json::json!({ "is_read": is_read }))?;
        let mut resource = thread.resource;
        resource.touch(self.threads.database().now());
        partial.insert(
            "date_modified".to_string(),
            serde_json::to_value(resource.date_modified)?,
        );
        self.threads.update_id(id, partial).await?;
        Ok(())
    }
}
