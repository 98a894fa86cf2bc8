//! Authenticator trait and implementations
//!
//! The Authenticator turns credentials into bearer tokens and resolves a
//! bearer token back to the account that owns it.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Account, Token};
use crate::types::*;

pub mod r#impl;

/// Trait for authenticating API requests
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check a username and password and issue a session token
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token>;

    /// Resolve a token id to its owner. Expired tokens are deleted and
    /// reported as `ExpiredToken`.
    async fn validate_token(&self, token: &str) -> Result<(Account, Token)>;

    /// Resolve the value of an `Authorization` header
    async fn authenticate_header(&self, header: Option<&str>) -> Result<(Account, Token)> {
        let token = parse_bearer(header)?;
        self.validate_token(token).await
    }
}

/// Extract the token id from `Bearer <token>`
pub fn parse_bearer(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or(Error::MissingAuthHeader)?.trim();
    if header.is_empty() {
        return Err(Error::MissingAuthHeader);
    }

    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(Error::MalformedAuthHeader),
    }
}
