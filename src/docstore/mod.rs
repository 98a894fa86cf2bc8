//! DocumentStore trait and implementations
//!
//! The DocumentStore is the persistence capability the resource stores are
//! built on: JSON documents keyed by `id`, grouped into tables inside named
//! databases, with equality filters and declared secondary indexes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::types::*;

pub mod r#impl;

/// Shape of a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexKind {
    /// Equality on one field
    Simple { field: String },
    /// Field holds an array; a lookup matches any element
    Multi { field: String },
    /// Equality on several fields at once
    Compound { fields: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn simple(field: &str) -> Self {
        Self {
            name: field.to_string(),
            kind: IndexKind::Simple {
                field: field.to_string(),
            },
        }
    }

    pub fn multi(field: &str) -> Self {
        Self {
            name: field.to_string(),
            kind: IndexKind::Multi {
                field: field.to_string(),
            },
        }
    }

    pub fn compound(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: IndexKind::Compound {
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        match &self.kind {
            IndexKind::Simple { field } | IndexKind::Multi { field } => vec![field.as_str()],
            IndexKind::Compound { fields } => fields.iter().map(String::as_str).collect(),
        }
    }

    /// Whether `doc` is returned for `key`
    pub fn matches(&self, doc: &Document, key: &IndexKey) -> bool {
        match &self.kind {
            IndexKind::Simple { field } => {
                key.len() == 1 && doc.get(field).map_or(false, |v| v == &key[0])
            }
            IndexKind::Multi { field } => {
                key.len() == 1
                    && match doc.get(field) {
                        Some(Value::Array(items)) => items.contains(&key[0]),
                        _ => false,
                    }
            }
            IndexKind::Compound { fields } => {
                key.len() == fields.len()
                    && fields
                        .iter()
                        .zip(key)
                        .all(|(field, value)| doc.get(field).map_or(false, |v| v == value))
            }
        }
    }
}

/// Whether `doc` satisfies every predicate of `filter`
pub fn filter_matches(doc: &Document, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(field, value)| doc.get(field).map_or(value.is_null(), |v| v == value))
}

/// Field names end up inside SQL and key patterns, so only plain identifiers
/// are accepted.
pub fn validate_field(field: &str) -> Result<()> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("Invalid field name: {}", field)))
    }
}

/// Results of a read, consumed one document at a time or exhausted into
/// "one" or "all".
#[derive(Debug, Default)]
pub struct Cursor {
    docs: VecDeque<Document>,
}

impl Cursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Exactly one result. Zero results is `NotFound`, several is
    /// `AmbiguousResult`.
    pub fn one<T: DeserializeOwned>(mut self) -> Result<T> {
        match self.docs.len() {
            0 => Err(Error::NotFound("no matching record".to_string())),
            1 => {
                let doc = self.docs.pop_front().unwrap_or_default();
                Ok(serde_json::from_value(Value::Object(doc))?)
            }
            n => Err(Error::AmbiguousResult(n)),
        }
    }

    /// Every result. Zero results is an empty vector.
    pub fn all<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.docs
            .into_iter()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(Error::from))
            .collect()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.docs.pop_front()
    }
}

/// Capability the resource stores require from the persistent store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a database if it does not exist. Returns whether it was created.
    async fn create_database(&self, database: &str) -> Result<bool>;

    /// Create a table if it does not exist. Returns whether it was created.
    async fn create_table(&self, table: &Table) -> Result<bool>;

    /// Declare a secondary index if it does not exist. Returns whether it was
    /// created.
    async fn create_index(&self, table: &Table, index: &IndexSpec) -> Result<bool>;

    /// Fetch one document by id
    async fn get(&self, table: &Table, id: &str) -> Result<Option<Document>>;

    /// Documents matching every predicate of `filter`
    async fn filter(&self, table: &Table, filter: &Filter) -> Result<Cursor>;

    /// Documents matching any of `keys` on a declared index
    async fn get_all_by_index(&self, table: &Table, index: &str, keys: &[IndexKey])
        -> Result<Cursor>;

    /// Insert new documents. An existing id is a `Conflict`.
    async fn insert(&self, table: &Table, docs: Vec<Document>) -> Result<WriteResult>;

    /// Replace the document with the same id. A missing id is reported as
    /// `skipped`.
    async fn replace(&self, table: &Table, doc: Document) -> Result<WriteResult>;

    /// Merge `partial` into the document with `id`. A missing id is reported
    /// as `skipped`.
    async fn update(&self, table: &Table, id: &str, partial: Document) -> Result<WriteResult>;

    /// Delete one document by id
    async fn delete(&self, table: &Table, id: &str) -> Result<WriteResult>;

    /// Delete every document matching `filter`, optionally returning the
    /// removed documents in `changes`.
    async fn delete_where(
        &self,
        table: &Table,
        filter: &Filter,
        return_changes: bool,
    ) -> Result<WriteResult>;
}

/// Merge `patch` into `target`: nested objects merge, `null` removes a field,
/// anything else replaces.
pub fn merge_patch(target: &mut Document, patch: Document) {
    for (field, value) in patch {
        match value {
            Value::Null => {
                target.remove(&field);
            }
            Value::Object(inner) => match target.get_mut(&field) {
                Some(Value::Object(existing)) => merge_patch(existing, inner),
                _ => {
                    let mut fresh = Document::new();
                    merge_patch(&mut fresh, inner);
                    target.insert(field, Value::Object(fresh));
                }
            },
            other => {
                target.insert(field, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_multi_index_matches_any_element() {
        let spec = IndexSpec::multi("labels");
        let d = doc(json!({"id": "t1", "labels": ["a", "b"]}));
        assert!(spec.matches(&d, &vec![json!("b")]));
        assert!(!spec.matches(&d, &vec![json!("c")]));
    }

    #[test]
    fn test_compound_index_needs_every_field() {
        let spec = IndexSpec::compound("name_owner_builtin", &["name", "owner", "builtin"]);
        let d = doc(json!({"name": "Spam", "owner": "acc", "builtin": true}));
        assert!(spec.matches(&d, &vec![json!("Spam"), json!("acc"), json!(true)]));
        assert!(!spec.matches(&d, &vec![json!("Spam"), json!("acc"), json!(false)]));
        assert!(!spec.matches(&d, &vec![json!("Spam"), json!("acc")]));
    }

    #[test]
    fn test_cursor_one_and_all() {
        let empty = Cursor::empty();
        assert!(matches!(empty.one::<Value>(), Err(Error::NotFound(_))));
        assert!(Cursor::empty().all::<Value>().unwrap().is_empty());

        let two = Cursor::new(vec![doc(json!({"id": "a"})), doc(json!({"id": "b"}))]);
        assert!(matches!(two.one::<Value>(), Err(Error::AmbiguousResult(2))));
    }

    #[test]
    fn test_merge_patch() {
        let mut target = doc(json!({"a": 1, "b": {"c": 2, "d": 3}, "e": 4}));
        merge_patch(&mut target, doc(json!({"a": 5, "b": {"c": null}, "e": null})));
        assert_eq!(Value::Object(target), json!({"a": 5, "b": {"d": 3}}));
    }

    #[test]
    fn test_validate_field() {
        assert!(validate_field("date_created").is_ok());
        assert!(validate_field("x'; DROP").is_err());
        assert!(validate_field("").is_err());
    }
}
