//! Ownership checks for resource accessors
//!
//! A resource belongs to the account named in its `owner` field. Fetching,
//! updating or deleting somebody else's resource looks exactly like the
//! resource not existing.

use log::debug;

use crate::error::{Error, Result};
use crate::types::Record;

/// Pass `record` through if `caller` owns it, `NotFound` otherwise
pub fn ensure_owner<T: Record>(record: T, caller: &str) -> Result<T> {
    if !caller.is_empty() && record.owner() == caller {
        Ok(record)
    } else {
        debug!("Ownership mismatch on {} for caller {}", record.id(), caller);
        Err(not_found(record.id()))
    }
}

/// The error every accessor reports for a missing or foreign resource
pub fn not_found(id: &str) -> Error {
    Error::NotFound(format!("Resource not found: {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Contact;
    use crate::types::Resource;
    use chrono::Utc;

    fn contact(owner: &str) -> Contact {
        Contact {
            resource: Resource::with_id("c1", owner, "Bob", Utc::now()),
            data: Default::default(),
        }
    }

    #[test]
    fn test_owner_passes() {
        assert!(ensure_owner(contact("alice"), "alice").is_ok());
    }

    #[test]
    fn test_foreign_owner_is_not_found() {
        let err = ensure_owner(contact("alice"), "bob").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), not_found("c1").to_string());
    }

    #[test]
    fn test_empty_caller_never_matches() {
        assert!(ensure_owner(contact(""), "").is_err());
    }
}
