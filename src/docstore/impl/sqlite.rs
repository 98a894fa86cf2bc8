//! SQLite-based document store implementation
//!
//! Every table is a SQLite table `<database>__<table>` holding the JSON body of
//! each document next to its id. Declared indexes are kept in a registry table
//! so lookups know their shape; single-field and compound indexes are also
//! backed by SQLite expression indexes.

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::docstore::{validate_field, Cursor, DocumentStore, IndexKind, IndexSpec};
use crate::error::{Error, Result};
use crate::types::*;

const REGISTRY: &str = "CREATE TABLE IF NOT EXISTS _databases (
        name TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS _tables (
        db TEXT NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (db, name)
    );
    CREATE TABLE IF NOT EXISTS _indexes (
        db TEXT NOT NULL,
        tbl TEXT NOT NULL,
        name TEXT NOT NULL,
        spec TEXT NOT NULL,
        PRIMARY KEY (db, tbl, name)
    );";

/// SQLite-based document store. One connection is opened at construction
/// and shared by every operation; operations take turns on it.
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn sql_table(table: &Table) -> Result<String> {
    validate_field(&table.database)?;
    validate_field(&table.name)?;
    Ok(format!("\"{}__{}\"", table.database, table.name))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn parse_doc(text: &str) -> Result<Document> {
    match serde_json::from_str(text)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(Error::Database("Stored document is not an object".to_string())),
    }
}

fn document_id(doc: &Document) -> Result<String> {
    doc.get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument("Document has no id".to_string()))
}

fn extract(field: &str) -> String {
    format!("json_extract(doc, '$.{}')", field)
}

/// WHERE clause and parameters for an equality filter
fn filter_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
    if filter.is_empty() {
        return Ok(("1".to_string(), Vec::new()));
    }

    let mut clauses = Vec::with_capacity(filter.len());
    let mut values = Vec::with_capacity(filter.len());
    for (field, value) in filter {
        validate_field(field)?;
        clauses.push(format!("{} IS ?", extract(field)));
        values.push(to_sql(value));
    }
    Ok((clauses.join(" AND "), values))
}

/// WHERE clause and parameters matching any of `keys` on `spec`
fn index_clause(spec: &IndexSpec, keys: &[IndexKey]) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = Vec::with_capacity(keys.len());
    let mut values = Vec::new();

    for key in keys {
        let fields = spec.fields();
        if key.len() != fields.len() {
            return Err(Error::InvalidArgument(format!(
                "Index {} takes {} values, got {}",
                spec.name,
                fields.len(),
                key.len()
            )));
        }

        let clause = match &spec.kind {
            IndexKind::Simple { field } => format!("{} IS ?", extract(field)),
            IndexKind::Multi { field } => format!(
                "(json_type(doc, '$.{0}') = 'array' AND EXISTS \
                 (SELECT 1 FROM json_each(doc, '$.{0}') WHERE json_each.value IS ?))",
                field
            ),
            IndexKind::Compound { fields } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|field| format!("{} IS ?", extract(field)))
                    .collect();
                format!("({})", parts.join(" AND "))
            }
        };
        clauses.push(clause);
        values.extend(key.iter().map(to_sql));
    }

    Ok((clauses.join(" OR "), values))
}

fn select_docs(conn: &Connection, sql: &str, values: Vec<SqlValue>) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    rows.iter().map(|text| parse_doc(text)).collect()
}

impl SqliteDocumentStore {
    /// Open (creating if needed) a document store at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute_batch(REGISTRY)?;
            Ok::<Connection, Error>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Internal("SQLite connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_database(&self, database: &str) -> Result<bool> {
        validate_field(database)?;
        let database = database.to_string();

        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO _databases (name) VALUES (?1)",
                params![database],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn create_table(&self, table: &Table) -> Result<bool> {
        let sql_name = sql_table(table)?;
        let table = table.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let known: Option<String> = tx
                .query_row(
                    "SELECT name FROM _databases WHERE name = ?1",
                    params![table.database],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Err(Error::Database(format!(
                    "Database not found: {}",
                    table.database
                )));
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO _tables (db, name) VALUES (?1, ?2)",
                params![table.database, table.name],
            )?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
                    sql_name
                ),
                [],
            )?;
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn create_index(&self, table: &Table, index: &IndexSpec) -> Result<bool> {
        let sql_name = sql_table(table)?;
        validate_field(&index.name)?;
        for field in index.fields() {
            validate_field(field)?;
        }
        let spec_json = serde_json::to_string(index)?;
        let table = table.clone();
        let index = index.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO _indexes (db, tbl, name, spec) VALUES (?1, ?2, ?3, ?4)",
                params![table.database, table.name, index.name, spec_json],
            )?;

            let expressions = match &index.kind {
                IndexKind::Simple { field } => Some(extract(field)),
                IndexKind::Compound { fields } => Some(
                    fields
                        .iter()
                        .map(|field| extract(field))
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                // json_each lookups cannot be backed by an expression index
                IndexKind::Multi { .. } => None,
            };
            if let Some(expressions) = expressions {
                tx.execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS \"{}__{}__{}\" ON {} ({})",
                        table.database, table.name, index.name, sql_name, expressions
                    ),
                    [],
                )?;
            }
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn get(&self, table: &Table, id: &str) -> Result<Option<Document>> {
        let sql_name = sql_table(table)?;
        let id = id.to_string();

        self.with_conn(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    &format!("SELECT doc FROM {} WHERE id = ?1", sql_name),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            text.as_deref().map(parse_doc).transpose()
        })
        .await
    }

    async fn filter(&self, table: &Table, filter: &Filter) -> Result<Cursor> {
        let sql_name = sql_table(table)?;
        let (clause, values) = filter_clause(filter)?;

        self.with_conn(move |conn| {
            let sql = format!("SELECT doc FROM {} WHERE {} ORDER BY id", sql_name, clause);
            Ok(Cursor::new(select_docs(conn, &sql, values)?))
        })
        .await
    }

    async fn get_all_by_index(
        &self,
        table: &Table,
        index: &str,
        keys: &[IndexKey],
    ) -> Result<Cursor> {
        let sql_name = sql_table(table)?;
        let table = table.clone();
        let index = index.to_string();
        let keys = keys.to_vec();

        self.with_conn(move |conn| {
            let spec_json: Option<String> = conn
                .query_row(
                    "SELECT spec FROM _indexes WHERE db = ?1 AND tbl = ?2 AND name = ?3",
                    params![table.database, table.name, index],
                    |row| row.get(0),
                )
                .optional()?;
            let spec: IndexSpec = match spec_json {
                Some(json) => serde_json::from_str(&json)?,
                None => return Err(Error::IndexNotFound(format!("{} on {}", index, table))),
            };

            if keys.is_empty() {
                return Ok(Cursor::empty());
            }

            let (clause, values) = index_clause(&spec, &keys)?;
            let sql = format!("SELECT doc FROM {} WHERE {} ORDER BY id", sql_name, clause);
            Ok(Cursor::new(select_docs(conn, &sql, values)?))
        })
        .await
    }

    async fn insert(&self, table: &Table, docs: Vec<Document>) -> Result<WriteResult> {
        let sql_name = sql_table(table)?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let created = docs.len();
            {
                let mut stmt =
                    tx.prepare(&format!("INSERT INTO {} (id, doc) VALUES (?1, ?2)", sql_name))?;
                for doc in &docs {
                    let id = document_id(doc)?;
                    let body = serde_json::to_string(doc)?;
                    if let Err(e) = stmt.execute(params![id, body]) {
                        return Err(match e.sqlite_error_code() {
                            Some(ErrorCode::ConstraintViolation) => Error::Conflict {
                                field: "id".to_string(),
                                value: id,
                            },
                            _ => Error::from(e),
                        });
                    }
                }
            }
            tx.commit()?;

            Ok(WriteResult {
                created,
                ..Default::default()
            })
        })
        .await
    }

    async fn replace(&self, table: &Table, doc: Document) -> Result<WriteResult> {
        let sql_name = sql_table(table)?;
        let id = document_id(&doc)?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    &format!("SELECT doc FROM {} WHERE id = ?1", sql_name),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            let result = match existing {
                None => WriteResult {
                    skipped: 1,
                    ..Default::default()
                },
                Some(text) if parse_doc(&text)? == doc => WriteResult {
                    unchanged: 1,
                    ..Default::default()
                },
                Some(_) => {
                    tx.execute(
                        &format!("UPDATE {} SET doc = ?2 WHERE id = ?1", sql_name),
                        params![id, serde_json::to_string(&doc)?],
                    )?;
                    WriteResult {
                        updated: 1,
                        ..Default::default()
                    }
                }
            };
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn update(&self, table: &Table, id: &str, mut partial: Document) -> Result<WriteResult> {
        let sql_name = sql_table(table)?;
        let id = id.to_string();
        partial.remove("id");
        let patch = serde_json::to_string(&partial)?;

        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!("UPDATE {} SET doc = json_patch(doc, ?2) WHERE id = ?1", sql_name),
                params![id, patch],
            )?;
            Ok(WriteResult {
                updated: changed,
                skipped: usize::from(changed == 0),
                ..Default::default()
            })
        })
        .await
    }

    async fn delete(&self, table: &Table, id: &str) -> Result<WriteResult> {
        let sql_name = sql_table(table)?;
        let id = id.to_string();

        self.with_conn(move |conn| {
            let dropped = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", sql_name), params![id])?;
            Ok(WriteResult {
                dropped,
                skipped: usize::from(dropped == 0),
                ..Default::default()
            })
        })
        .await
    }

    async fn delete_where(
        &self,
        table: &Table,
        filter: &Filter,
        return_changes: bool,
    ) -> Result<WriteResult> {
        let sql_name = sql_table(table)?;
        let (clause, values) = filter_clause(filter)?;

        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM {} WHERE {} RETURNING doc", sql_name, clause);
            let removed = select_docs(conn, &sql, values)?;
            Ok(WriteResult {
                dropped: removed.len(),
                changes: if return_changes { removed } else { Vec::new() },
                ..Default::default()
            })
        })
        .await
    }
}
