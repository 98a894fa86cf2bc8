//! Per-resource tables
//!
//! Each table composes one ResourceStore (or its cached decorator) with the
//! queries specific to its resource type. Resource types with no extra
//! queries use the generic store directly.

use crate::models::{Attachment, Contact, Email, File, Key};
use crate::resource_store::ResourceStore;

pub mod accounts;
pub mod labels;
pub mod threads;
pub mod tokens;

pub use accounts::AccountsTable;
pub use labels::LabelsTable;
pub use threads::ThreadsTable;
pub use tokens::TokensTable;

pub const ACCOUNTS: &str = "accounts";
pub const TOKENS: &str = "tokens";
pub const LABELS: &str = "labels";
pub const THREADS: &str = "threads";
pub const EMAILS: &str = "emails";
pub const CONTACTS: &str = "contacts";
pub const FILES: &str = "files";
pub const ATTACHMENTS: &str = "attachments";
pub const KEYS: &str = "keys";

pub type EmailsTable = ResourceStore<Email>;
pub type ContactsTable = ResourceStore<Contact>;
pub type FilesTable = ResourceStore<File>;
pub type AttachmentsTable = ResourceStore<Attachment>;
pub type KeysTable = ResourceStore<Key>;
