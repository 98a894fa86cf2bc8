//! Accounts table
//!
//! Usernames are unique. Uniqueness is checked before insert, so two
//! concurrent registrations of the same name can both pass the check.

use log::{error, info};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Account;
use crate::resource_store::{Database, ResourceStore};
use crate::tables::{LabelsTable, ACCOUNTS};
use crate::types::*;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;

/// Canonical form of a username: trimmed, lowercase, without dots
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase().replace('.', "")
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(Error::InvalidArgument(format!(
            "Username must be {} to {} characters long",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-';
    if !username.chars().all(allowed) {
        return Err(Error::InvalidArgument(format!(
            "Username contains invalid characters: {}",
            username
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccountsTable {
    accounts: ResourceStore<Account>,
    hash_cost: u32,
}

impl AccountsTable {
    pub fn new(db: &Database) -> Self {
        Self {
            accounts: ResourceStore::new(db, ACCOUNTS),
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost. Tests use the minimum.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn store(&self) -> &ResourceStore<Account> {
        &self.accounts
    }

    /// Create an account together with its builtin labels. If the labels
    /// cannot be stored the account is removed again.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        labels: &LabelsTable,
    ) -> Result<Account> {
        let name = normalize_username(username);
        validate_username(&name)?;
        if password.is_empty() {
            return Err(Error::InvalidArgument("Password must not be empty".to_string()));
        }

        if self.is_username_used(&name).await? {
            return Err(Error::Conflict {
                field: "name".to_string(),
                value: name,
            });
        }

        let password = password.to_string();
        let cost = self.hash_cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;

        let account = Account {
            resource: Resource::new("", name, self.accounts.database().now()),
            password: hash,
            pgp_fingerprint: String::new(),
            alt_email: String::new(),
            kind: "standard".to_string(),
            status: "registered".to_string(),
        };
        self.accounts.insert(&account).await?;

        if let Err(e) = labels.create_builtins(account.id()).await {
            error!(
                "Builtin labels for {} could not be created, removing the account: {}",
                account.resource.name, e
            );
            if let Err(rollback) = self.accounts.delete_id(account.id()).await {
                error!("Removing account {} failed: {}", account.id(), rollback);
            }
            return Err(e);
        }

        info!("Registered account {} ({})", account.resource.name, account.id());
        Ok(account)
    }

    pub async fn get(&self, id: &str) -> Result<Account> {
        self.accounts.get_by_id(id).await
    }

    pub async fn find(&self, id: &str) -> Result<Option<Account>> {
        self.accounts.find(id).await
    }

    pub async fn find_by_name(&self, username: &str) -> Result<Option<Account>> {
        let name = normalize_username(username);
        match self
            .accounts
            .find_by_index_fetch_one("name", &[vec![Value::from(name)]])
            .await
        {
            Ok(account) => Ok(Some(account)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn is_username_used(&self, username: &str) -> Result<bool> {
        let name = normalize_username(username);
        let cursor = self
            .accounts
            .find_by_index("name", &[vec![Value::from(name)]])
            .await?;
        Ok(!cursor.is_empty())
    }

    /// The account named `username`, if `password` matches its hash
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<Option<Account>> {
        let Some(account) = self.find_by_name(username).await? else {
            return Ok(None);
        };

        let password = password.to_string();
        let hash = account.password.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
        Ok(matches.then_some(account))
    }

    pub async fn set_password(&self, id: &str, password: &str) -> Result<()> {
        let mut account = self.accounts.get_by_id(id).await?;
        let password = password.to_string();
        let cost = self.hash_cost;
        account.password = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        self.accounts.touch(&mut account);
        self.accounts.update(&account).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.accounts.delete_id(id).await?.dropped > 0)
    }
}
