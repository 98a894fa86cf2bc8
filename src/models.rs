//! Stored resource types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Record, Resource};

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                fn resource(&self) -> &Resource {
                    &self.resource
                }

                fn resource_mut(&mut self) -> &mut Resource {
                    &mut self.resource
                }
            }
        )*
    };
}

/// Names of the labels every account is created with
pub const BUILTIN_LABELS: [&str; 5] = ["Inbox", "Sent", "Trash", "Spam", "Starred"];

/// Builtin labels whose threads never count as unread elsewhere
pub const EXCLUDED_LABELS: [&str; 3] = ["Spam", "Trash", "Sent"];

/// A user account. `resource.name` is the unique username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(flatten)]
    pub resource: Resource,

    /// bcrypt hash of the password
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub pgp_fingerprint: String,

    #[serde(default)]
    pub alt_email: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Auth,
    Invite,
    Verify,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Auth => "auth",
            TokenKind::Invite => "invite",
            TokenKind::Verify => "verify",
        }
    }
}

/// Bearer token. The id is the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(flatten)]
    pub resource: Resource,

    pub expiry_date: DateTime<Utc>,

    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl Token {
    /// A token is valid strictly before its expiry date
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(flatten)]
    pub resource: Resource,

    #[serde(default)]
    pub builtin: bool,

    #[serde(default)]
    pub emails_total: u64,

    #[serde(default)]
    pub emails_unread: u64,
}

/// A label together with thread counters computed at read time. This type is
/// never written back to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelWithCounts {
    #[serde(flatten)]
    pub label: Label,

    pub threads_total: usize,

    pub threads_unread: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Secure {
    #[default]
    None,
    Some,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(flatten)]
    pub resource: Resource,

    /// Label ids, indexed as a multi-valued index
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default)]
    pub emails: Vec<String>,

    #[serde(default)]
    pub is_read: bool,

    #[serde(default)]
    pub secure: Secure,
}

/// PGP-encrypted payload. The server never looks inside.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Encrypted {
    #[serde(default)]
    pub encoding: String,

    #[serde(default)]
    pub pgp_fingerprints: Vec<String>,

    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub version_major: u32,

    #[serde(default)]
    pub version_minor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    #[serde(flatten)]
    pub resource: Resource,

    /// "sent" or "received"
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub from: Vec<String>,

    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default)]
    pub thread: String,

    #[serde(default)]
    pub attachments: Vec<String>,

    #[serde(default)]
    pub body: Encrypted,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(flatten)]
    pub resource: Resource,

    #[serde(flatten)]
    pub data: Encrypted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(flatten)]
    pub resource: Resource,

    #[serde(flatten)]
    pub data: Encrypted,

    #[serde(default)]
    pub mime: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(flatten)]
    pub resource: Resource,

    #[serde(flatten)]
    pub data: Encrypted,

    #[serde(default)]
    pub mime: String,

    #[serde(default)]
    pub size: u64,
}

/// Public key. The id is the key fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(flatten)]
    pub resource: Resource,

    /// ASCII-armored key
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub key_id: String,

    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl_record!(Account, Label, Thread, Email, Contact, File, Attachment, Key);

impl Record for Token {
    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expiry_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_token_expires_at_expiry_date() {
        let token = Token {
            resource: Resource::new("acc", "", t0()),
            expiry_date: t0() + Duration::seconds(3600),
            kind: TokenKind::Auth,
        };
        assert!(!token.is_expired(t0() + Duration::seconds(3599)));
        assert!(token.is_expired(t0() + Duration::seconds(3600)));
    }

    #[test]
    fn test_resource_fields_are_flattened() {
        let thread = Thread {
            resource: Resource::with_id("t1", "acc", "hello", t0()),
            labels: vec!["l1".to_string()],
            members: vec![],
            emails: vec![],
            is_read: false,
            secure: Secure::Some,
        };
        let value = serde_json::to_value(&thread).unwrap();
        assert_eq!(value["id"], "t1");
        assert_eq!(value["owner"], "acc");
        assert_eq!(value["labels"][0], "l1");
        assert_eq!(value["secure"], "some");
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut resource = Resource::new("acc", "", t0());
        resource.touch(t0() - Duration::seconds(10));
        assert_eq!(resource.date_modified, t0());
        resource.touch(t0() + Duration::seconds(10));
        assert!(resource.date_modified > resource.date_created);
    }
}
