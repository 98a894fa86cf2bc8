//! Generic CRUD over one table of the document store
//!
//! `ResourceStore<T>` owns the table name and maps raw documents to and from
//! `T`. Functions ending in `fetch_one` report `NotFound` when nothing
//! matches; functions ending in `fetch` return an empty vector instead.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::docstore::{Cursor, DocumentStore};
use crate::error::{Error, Result};
use crate::guard::{ensure_owner, not_found};
use crate::types::*;

/// Default deadline for a single store round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one database of a document store, shared by every table in it
#[derive(Clone)]
pub struct Database {
    pub store: Arc<dyn DocumentStore>,
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub timeout: Duration,
}

impl Database {
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn table(&self, name: &str) -> Table {
        Table::new(self.name.clone(), name)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// Serialize a record or partial record into a raw document
pub fn to_document<S: Serialize>(value: &S) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(Error::InvalidArgument(
            "Resource must serialize to an object".to_string(),
        )),
    }
}

pub struct ResourceStore<T: Record> {
    db: Database,
    table: Table,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for ResourceStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            table: self.table.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> ResourceStore<T> {
    pub fn new(db: &Database, table: &str) -> Self {
        Self {
            db: db.clone(),
            table: db.table(table),
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Refresh `date_modified` from the store's clock. Callers do this before
    /// every update.
    pub fn touch(&self, record: &mut T) {
        record.resource_mut().touch(self.db.now());
    }

    /// Apply the deadline and tag backend failures with the table and
    /// operation.
    async fn run<R, F>(&self, op: &'static str, write: bool, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let result = match tokio::time::timeout(self.db.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                return Err(Error::Timeout {
                    target: self.table.to_string(),
                    op,
                })
            }
        };

        result.map_err(|err| {
            if err.is_logical() {
                return err;
            }
            let table = self.table.to_string();
            let message = err.to_string();
            if write {
                Error::StoreWrite { table, op, message }
            } else {
                Error::StoreRead { table, op, message }
            }
        })
    }

    // Create

    pub async fn insert(&self, record: &T) -> Result<WriteResult> {
        let doc = to_document(record)?;
        self.run("insert", true, self.db.store.insert(&self.table, vec![doc]))
            .await
    }

    /// Insert several records in one write. Either all are created or none.
    pub async fn insert_many(&self, records: &[T]) -> Result<WriteResult> {
        let docs = records.iter().map(to_document).collect::<Result<Vec<_>>>()?;
        self.run("insert", true, self.db.store.insert(&self.table, docs))
            .await
    }

    // Read

    pub async fn find(&self, id: &str) -> Result<Option<T>> {
        self.run("get", false, async {
            match self.db.store.get(&self.table, id).await? {
                Some(doc) => Ok(Some(serde_json::from_value(Value::Object(doc))?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<T> {
        self.find(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn find_by(&self, field: &str, value: impl Into<Value>) -> Result<Cursor> {
        let mut filter = Filter::new();
        filter.insert(field.to_string(), value.into());
        self.find_where(&filter).await
    }

    pub async fn find_by_and_fetch(&self, field: &str, value: impl Into<Value>) -> Result<Vec<T>> {
        let cursor = self.find_by(field, value).await?;
        self.run("fetch", false, async move { cursor.all() }).await
    }

    pub async fn find_by_and_fetch_one(&self, field: &str, value: impl Into<Value>) -> Result<T> {
        let cursor = self.find_by(field, value).await?;
        self.run("fetch", false, async move { cursor.one() }).await
    }

    pub async fn find_where(&self, filter: &Filter) -> Result<Cursor> {
        self.run("filter", false, self.db.store.filter(&self.table, filter))
            .await
    }

    pub async fn find_where_and_fetch(&self, filter: &Filter) -> Result<Vec<T>> {
        let cursor = self.find_where(filter).await?;
        self.run("fetch", false, async move { cursor.all() }).await
    }

    pub async fn find_where_and_fetch_one(&self, filter: &Filter) -> Result<T> {
        let cursor = self.find_where(filter).await?;
        self.run("fetch", false, async move { cursor.one() }).await
    }

    pub async fn find_by_index(&self, index: &str, keys: &[IndexKey]) -> Result<Cursor> {
        self.run(
            "get_all",
            false,
            self.db.store.get_all_by_index(&self.table, index, keys),
        )
        .await
    }

    pub async fn find_by_index_fetch(&self, index: &str, keys: &[IndexKey]) -> Result<Vec<T>> {
        let cursor = self.find_by_index(index, keys).await?;
        self.run("fetch", false, async move { cursor.all() }).await
    }

    pub async fn find_by_index_fetch_one(&self, index: &str, keys: &[IndexKey]) -> Result<T> {
        let cursor = self.find_by_index(index, keys).await?;
        self.run("fetch", false, async move { cursor.one() }).await
    }

    // Update

    /// Replace the stored record. The caller touches it first.
    pub async fn update(&self, record: &T) -> Result<WriteResult> {
        let doc = to_document(record)?;
        let result = self
            .run("replace", true, self.db.store.replace(&self.table, doc))
            .await?;
        if result.skipped > 0 {
            return Err(not_found(record.id()));
        }
        Ok(result)
    }

    /// Merge `partial` into the stored record
    pub async fn update_id(&self, id: &str, partial: Document) -> Result<WriteResult> {
        let result = self
            .run("update", true, self.db.store.update(&self.table, id, partial))
            .await?;
        if result.skipped > 0 {
            return Err(not_found(id));
        }
        Ok(result)
    }

    // Delete

    /// Delete by id. Deleting a missing id is not an error.
    pub async fn delete_id(&self, id: &str) -> Result<WriteResult> {
        self.run("delete", true, self.db.store.delete(&self.table, id))
            .await
    }

    pub async fn delete_where(&self, filter: &Filter) -> Result<WriteResult> {
        self.run(
            "delete",
            true,
            self.db.store.delete_where(&self.table, filter, false),
        )
        .await
    }

    /// Like `delete_where`, also returning every removed document
    pub async fn delete_where_tracked(&self, filter: &Filter) -> Result<WriteResult> {
        self.run(
            "delete",
            true,
            self.db.store.delete_where(&self.table, filter, true),
        )
        .await
    }

    // Owner-scoped access

    pub async fn get_owned(&self, id: &str, caller: &str) -> Result<T> {
        ensure_owner(self.get_by_id(id).await?, caller)
    }

    /// Replace a record the caller owns. The stored owner is checked, and the
    /// owner field of `record` cannot be changed.
    pub async fn update_owned(&self, record: &T, caller: &str) -> Result<WriteResult> {
        self.get_owned(record.id(), caller).await?;
        if record.owner() != caller {
            return Err(not_found(record.id()));
        }
        self.update(record).await
    }

    pub async fn update_id_owned(
        &self,
        id: &str,
        mut partial: Document,
        caller: &str,
    ) -> Result<WriteResult> {
        self.get_owned(id, caller).await?;
        partial.remove("owner");
        self.update_id(id, partial).await
    }

    pub async fn delete_owned(&self, id: &str, caller: &str) -> Result<WriteResult> {
        self.get_owned(id, caller).await?;
        self.delete_id(id).await
    }

    /// Every record owned by `owner`, via the `owner` index
    pub async fn list_owned(&self, owner: &str) -> Result<Vec<T>> {
        self.find_by_index_fetch("owner", &[vec![Value::from(owner)]])
            .await
    }
}
