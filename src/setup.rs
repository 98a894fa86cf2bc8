//! Schema bootstrap
//!
//! Creates every database, table and index the tables rely on. Safe to run
//! on every start: existing objects are left alone.

use log::{debug, info};

use crate::aggregation::{BUILTIN_INDEX, THREAD_LABELS_INDEX};
use crate::docstore::{DocumentStore, IndexSpec};
use crate::error::Result;
use crate::tables::*;
use crate::types::Table;

/// Databases created by default, one per deployment environment
pub const DEFAULT_DATABASES: [&str; 4] = ["prod", "staging", "dev", "test"];

/// One table and its declared indexes
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    fn owned(name: &'static str, extra: Vec<IndexSpec>) -> Self {
        let mut indexes = vec![IndexSpec::simple("owner")];
        indexes.extend(extra);
        Self { name, indexes }
    }
}

pub fn schema() -> Vec<TableSchema> {
    vec![
        TableSchema {
            name: ACCOUNTS,
            indexes: vec![IndexSpec::simple("name")],
        },
        TableSchema::owned(TOKENS, vec![]),
        TableSchema::owned(
            LABELS,
            vec![IndexSpec::compound(
                BUILTIN_INDEX,
                &["name", "owner", "builtin"],
            )],
        ),
        TableSchema::owned(THREADS, vec![IndexSpec::multi(THREAD_LABELS_INDEX)]),
        TableSchema::owned(EMAILS, vec![IndexSpec::simple("thread")]),
        TableSchema::owned(CONTACTS, vec![]),
        TableSchema::owned(FILES, vec![]),
        TableSchema::owned(ATTACHMENTS, vec![]),
        TableSchema::owned(KEYS, vec![IndexSpec::simple("key_id")]),
    ]
}

/// Bootstrap one database. Returns how many objects were created.
pub async fn bootstrap_database(store: &dyn DocumentStore, database: &str) -> Result<usize> {
    let mut created = 0;
    if store.create_database(database).await? {
        debug!("Created database {}", database);
        created += 1;
    }

    for table_schema in schema() {
        let table = Table::new(database, table_schema.name);
        if store.create_table(&table).await? {
            debug!("Created table {}", table);
            created += 1;
        }
        for index in &table_schema.indexes {
            if store.create_index(&table, index).await? {
                debug!("Created index {} on {}", index.name, table);
                created += 1;
            }
        }
    }
    Ok(created)
}

/// Bootstrap every database in `databases`
pub async fn bootstrap<S: AsRef<str>>(store: &dyn DocumentStore, databases: &[S]) -> Result<usize> {
    let mut created = 0;
    for database in databases {
        let database = database.as_ref();
        let n = bootstrap_database(store, database).await?;
        info!("Bootstrapped database {} ({} objects created)", database, n);
        created += n;
    }
    Ok(created)
}
