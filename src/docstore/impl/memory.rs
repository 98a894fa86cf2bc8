//! In-memory document store implementation

use async_trait::async_trait;
use futures::channel::oneshot;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::RwLock;

use crate::docstore::{filter_matches, merge_patch, Cursor, DocumentStore, IndexSpec};
use crate::error::{Error, Result};
use crate::types::*;

/// Write commands for the store (only writes go through the channel)
enum WriteCommand {
    CreateDatabase(String, oneshot::Sender<Result<bool>>),
    CreateTable(Table, oneshot::Sender<Result<bool>>),
    CreateIndex(Table, IndexSpec, oneshot::Sender<Result<bool>>),
    Insert(Table, Vec<Document>, oneshot::Sender<Result<WriteResult>>),
    Replace(Table, Document, oneshot::Sender<Result<WriteResult>>),
    Update(Table, String, Document, oneshot::Sender<Result<WriteResult>>),
    Delete(Table, String, oneshot::Sender<Result<WriteResult>>),
    DeleteWhere(Table, Filter, bool, oneshot::Sender<Result<WriteResult>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Default)]
struct TableState {
    docs: BTreeMap<String, Document>,
    indexes: HashMap<String, IndexSpec>,
}

/// Databases keyed by name, tables keyed by name inside each database
#[derive(Default)]
struct StoreState {
    databases: HashMap<String, HashMap<String, TableState>>,
}

fn document_id(doc: &Document) -> Result<String> {
    doc.get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument("Document has no id".to_string()))
}

impl StoreState {
    fn table(&self, table: &Table) -> Result<&TableState> {
        self.databases
            .get(&table.database)
            .and_then(|tables| tables.get(&table.name))
            .ok_or_else(|| Error::Database(format!("Table not found: {}", table)))
    }

    fn table_mut(&mut self, table: &Table) -> Result<&mut TableState> {
        self.databases
            .get_mut(&table.database)
            .and_then(|tables| tables.get_mut(&table.name))
            .ok_or_else(|| Error::Database(format!("Table not found: {}", table)))
    }

    fn create_database(&mut self, name: String) -> Result<bool> {
        if self.databases.contains_key(&name) {
            return Ok(false);
        }
        self.databases.insert(name, HashMap::new());
        Ok(true)
    }

    fn create_table(&mut self, table: &Table) -> Result<bool> {
        let tables = self
            .databases
            .get_mut(&table.database)
            .ok_or_else(|| Error::Database(format!("Database not found: {}", table.database)))?;
        if tables.contains_key(&table.name) {
            return Ok(false);
        }
        tables.insert(table.name.clone(), TableState::default());
        Ok(true)
    }

    fn create_index(&mut self, table: &Table, index: IndexSpec) -> Result<bool> {
        let state = self.table_mut(table)?;
        if state.indexes.contains_key(&index.name) {
            return Ok(false);
        }
        state.indexes.insert(index.name.clone(), index);
        Ok(true)
    }

    /// All-or-nothing batch insert
    fn insert(&mut self, table: &Table, docs: Vec<Document>) -> Result<WriteResult> {
        let state = self.table_mut(table)?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in &docs {
            let id = document_id(doc)?;
            if state.docs.contains_key(&id) || ids.contains(&id) {
                return Err(Error::Conflict {
                    field: "id".to_string(),
                    value: id,
                });
            }
            ids.push(id);
        }

        let created = docs.len();
        for (id, doc) in ids.into_iter().zip(docs) {
            state.docs.insert(id, doc);
        }

        Ok(WriteResult {
            created,
            ..Default::default()
        })
    }

    fn replace(&mut self, table: &Table, doc: Document) -> Result<WriteResult> {
        let id = document_id(&doc)?;
        let state = self.table_mut(table)?;

        match state.docs.get_mut(&id) {
            Some(existing) if *existing == doc => Ok(WriteResult {
                unchanged: 1,
                ..Default::default()
            }),
            Some(existing) => {
                *existing = doc;
                Ok(WriteResult {
                    updated: 1,
                    ..Default::default()
                })
            }
            None => Ok(WriteResult {
                skipped: 1,
                ..Default::default()
            }),
        }
    }

    fn update(&mut self, table: &Table, id: &str, mut partial: Document) -> Result<WriteResult> {
        let state = self.table_mut(table)?;
        // The id is the primary key and never changes
        partial.remove("id");

        match state.docs.get_mut(id) {
            Some(existing) => {
                let before = existing.clone();
                merge_patch(existing, partial);
                let changed = *existing != before;
                Ok(WriteResult {
                    updated: usize::from(changed),
                    unchanged: usize::from(!changed),
                    ..Default::default()
                })
            }
            None => Ok(WriteResult {
                skipped: 1,
                ..Default::default()
            }),
        }
    }

    fn delete(&mut self, table: &Table, id: &str) -> Result<WriteResult> {
        let state = self.table_mut(table)?;
        let removed = state.docs.remove(id);
        Ok(WriteResult {
            dropped: usize::from(removed.is_some()),
            skipped: usize::from(removed.is_none()),
            ..Default::default()
        })
    }

    fn delete_where(&mut self, table: &Table, filter: &Filter, return_changes: bool) -> Result<WriteResult> {
        let state = self.table_mut(table)?;

        let ids: Vec<String> = state
            .docs
            .iter()
            .filter(|(_, doc)| filter_matches(doc, filter))
            .map(|(id, _)| id.clone())
            .collect();

        let mut changes = Vec::new();
        for id in &ids {
            if let Some(doc) = state.docs.remove(id) {
                if return_changes {
                    changes.push(doc);
                }
            }
        }

        Ok(WriteResult {
            dropped: ids.len(),
            changes,
            ..Default::default()
        })
    }
}

/// In-memory document store with a single writer task.
///
/// Reads take the state lock directly; every write is serialized through the
/// writer loop so batch inserts and predicate deletes are atomic.
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
    write_tx: Sender<WriteCommand>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let (write_tx, write_rx) = channel(100);
        let state = Arc::new(RwLock::new(StoreState::default()));

        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            Self::writer_loop(state_clone, write_rx).await;
        });

        Self { state, write_tx }
    }

    async fn writer_loop(state: Arc<RwLock<StoreState>>, mut rx: Receiver<WriteCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriteCommand::CreateDatabase(name, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.create_database(name));
                }
                WriteCommand::CreateTable(table, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.create_table(&table));
                }
                WriteCommand::CreateIndex(table, index, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.create_index(&table, index));
                }
                WriteCommand::Insert(table, docs, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.insert(&table, docs));
                }
                WriteCommand::Replace(table, doc, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.replace(&table, doc));
                }
                WriteCommand::Update(table, id, partial, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.update(&table, &id, partial));
                }
                WriteCommand::Delete(table, id, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.delete(&table, &id));
                }
                WriteCommand::DeleteWhere(table, filter, return_changes, reply) => {
                    let mut state = state.write().await;
                    let _ = reply.send(state.delete_where(&table, &filter, return_changes));
                }
                WriteCommand::Shutdown(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> WriteCommand,
        op: &str,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.write_tx
            .send(make(tx))
            .await
            .map_err(|_| Error::Internal(format!("Failed to send {} command", op)))?;

        rx.await
            .map_err(|_| Error::Internal(format!("Failed to receive {} response", op)))?
    }

    /// Stop the writer loop. Subsequent writes fail.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.write_tx
            .send(WriteCommand::Shutdown(tx))
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown command".to_string()))?;

        rx.await
            .map_err(|_| Error::Internal("Failed to receive shutdown response".to_string()))?;

        Ok(())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_database(&self, database: &str) -> Result<bool> {
        let name = database.to_string();
        self.send(|tx| WriteCommand::CreateDatabase(name, tx), "create database")
            .await
    }

    async fn create_table(&self, table: &Table) -> Result<bool> {
        let table = table.clone();
        self.send(|tx| WriteCommand::CreateTable(table, tx), "create table")
            .await
    }

    async fn create_index(&self, table: &Table, index: &IndexSpec) -> Result<bool> {
        let (table, index) = (table.clone(), index.clone());
        self.send(|tx| WriteCommand::CreateIndex(table, index, tx), "create index")
            .await
    }

    async fn get(&self, table: &Table, id: &str) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.table(table)?.docs.get(id).cloned())
    }

    async fn filter(&self, table: &Table, filter: &Filter) -> Result<Cursor> {
        let state = self.state.read().await;
        let docs = state
            .table(table)?
            .docs
            .values()
            .filter(|doc| filter_matches(doc, filter))
            .cloned()
            .collect();
        Ok(Cursor::new(docs))
    }

    async fn get_all_by_index(
        &self,
        table: &Table,
        index: &str,
        keys: &[IndexKey],
    ) -> Result<Cursor> {
        let state = self.state.read().await;
        let table_state = state.table(table)?;
        let spec = table_state
            .indexes
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(format!("{} on {}", index, table)))?;

        let docs = table_state
            .docs
            .values()
            .filter(|doc| keys.iter().any(|key| spec.matches(doc, key)))
            .cloned()
            .collect();
        Ok(Cursor::new(docs))
    }

    async fn insert(&self, table: &Table, docs: Vec<Document>) -> Result<WriteResult> {
        let table = table.clone();
        self.send(|tx| WriteCommand::Insert(table, docs, tx), "insert")
            .await
    }

    async fn replace(&self, table: &Table, doc: Document) -> Result<WriteResult> {
        let table = table.clone();
        self.send(|tx| WriteCommand::Replace(table, doc, tx), "replace")
            .await
    }

    async fn update(&self, table: &Table, id: &str, partial: Document) -> Result<WriteResult> {
        let (table, id) = (table.clone(), id.to_string());
        self.send(|tx| WriteCommand::Update(table, id, partial, tx), "update")
            .await
    }

    async fn delete(&self, table: &Table, id: &str) -> Result<WriteResult> {
        let (table, id) = (table.clone(), id.to_string());
        self.send(|tx| WriteCommand::Delete(table, id, tx), "delete")
            .await
    }

    async fn delete_where(
        &self,
        table: &Table,
        filter: &Filter,
        return_changes: bool,
    ) -> Result<WriteResult> {
        let (table, filter) = (table.clone(), filter.clone());
        self.send(
            |tx| WriteCommand::DeleteWhere(table, filter, return_changes, tx),
            "delete where",
        )
        .await
    }
}
