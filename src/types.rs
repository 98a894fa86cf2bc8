//! Core types used throughout the data-access layer

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Raw stored document
pub type Document = Map<String, Value>;

/// AND of equality predicates, keyed by top-level field name
pub type Filter = BTreeMap<String, Value>;

/// One lookup key for a secondary index. Single-field indexes take one value,
/// compound indexes one value per indexed field, in declaration order.
pub type IndexKey = Vec<Value>;

/// Account id
pub type AccountId = String;

/// Build a [`Filter`] from `field => value` pairs.
#[macro_export]
macro_rules! filter {
    ($($field:expr => $value:expr),* $(,)?) => {{
        let mut f = $crate::types::Filter::new();
        $(f.insert($field.to_string(), ::serde_json::json!($value));)*
        f
    }};
}

/// A collection inside a named database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    pub database: String,
    pub name: String,
}

impl Table {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Fields shared by every stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,

    /// Owning account id; empty for account records
    #[serde(default)]
    pub owner: AccountId,

    #[serde(default)]
    pub name: String,

    pub date_created: DateTime<Utc>,

    pub date_modified: DateTime<Utc>,
}

impl Resource {
    /// Create a resource with a fresh id
    pub fn new(owner: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), owner, name, now)
    }

    pub fn with_id(
        id: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            name: name.into(),
            date_created: now,
            date_modified: now,
        }
    }

    /// Refresh `date_modified`. Never moves it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) -> &mut Self {
        if now > self.date_modified {
            self.date_modified = now;
        }
        self
    }
}

/// A storable resource type
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn resource(&self) -> &Resource;

    fn resource_mut(&mut self) -> &mut Resource;

    fn id(&self) -> &str {
        &self.resource().id
    }

    fn owner(&self) -> &str {
        &self.resource().owner
    }

    /// Natural expiry, for resources that have one
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Acknowledgement of a write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub dropped: usize,
    /// Old values of removed documents, when change tracking was requested
    pub changes: Vec<Document>,
}

impl WriteResult {
    /// Ids of the documents reported in `changes`
    pub fn changed_ids(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Login credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
