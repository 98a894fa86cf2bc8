//! Error types for the data-access layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No record, or a record owned by somebody else. The two cases are
    /// reported identically.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {field} {value:?} is already used")]
    Conflict { field: String, value: String },

    #[error("Expected exactly one result, got {0}")]
    AmbiguousResult(usize),

    #[error("Missing auth token")]
    MissingAuthHeader,

    #[error("Invalid authorization header")]
    MalformedAuthHeader,

    #[error("Invalid authorization token")]
    InvalidToken,

    #[error("Authorization token has expired")]
    ExpiredToken,

    #[error("Read from {table} failed during {op}: {message}")]
    StoreRead {
        table: String,
        op: &'static str,
        message: String,
    },

    #[error("Write to {table} failed during {op}: {message}")]
    StoreWrite {
        table: String,
        op: &'static str,
        message: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Key is already cached: {0}")]
    AlreadyCached(String),

    #[error("Invalid cache TTL: {0}s")]
    InvalidTtl(i64),

    #[error("Timed out: {op} on {target}")]
    Timeout { target: String, op: &'static str },

    #[error("Account {owner} is missing builtin labels (found {found} of 3)")]
    MissingBuiltinLabels { owner: String, found: usize },

    #[error("Builtin label cannot be modified: {0}")]
    BuiltinLabel(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code for rendering the error to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::AmbiguousResult(_) => "ambiguous_result",
            Error::MissingAuthHeader => "auth_missing_header",
            Error::MalformedAuthHeader => "auth_malformed_header",
            Error::InvalidToken => "auth_invalid_token",
            Error::ExpiredToken => "auth_expired_token",
            Error::StoreRead { .. } => "store_read",
            Error::StoreWrite { .. } => "store_write",
            Error::Cache(_) => "cache",
            Error::AlreadyCached(_) => "cache_already_set",
            Error::InvalidTtl(_) => "cache_invalid_ttl",
            Error::Timeout { .. } => "timeout",
            Error::MissingBuiltinLabels { .. } => "missing_builtin_labels",
            Error::BuiltinLabel(_) => "builtin_label",
            Error::IndexNotFound(_) => "index_not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Database(_) => "database",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }

    /// Errors that describe the request rather than a failing backend. These
    /// pass through the store wrappers untouched.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Conflict { .. }
                | Error::AmbiguousResult(_)
                | Error::Timeout { .. }
                | Error::IndexNotFound(_)
                | Error::InvalidArgument(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Cache(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("Password hashing failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Blocking task failed: {}", err))
    }
}
