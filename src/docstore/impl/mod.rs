//! DocumentStore implementations

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
