//! Integration tests running the services on the sqlite document store

use chrono::Utc;
use lockbox::cache::r#impl::InMemoryCache;
use lockbox::config::Backend;
use lockbox::docstore::r#impl::SqliteDocumentStore;
use lockbox::models::{Secure, Thread};
use lockbox::setup::{self, DEFAULT_DATABASES};
use lockbox::{filter, Config, Credentials, Database, DocumentStore, Error, Record, Resource};
use lockbox::Services;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_services(path: &Path) -> Arc<Services> {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(path).await.unwrap());
    setup::bootstrap(store.as_ref(), &DEFAULT_DATABASES).await.unwrap();

    let mut config = Config::default();
    config.password_hash_cost = 4;
    Arc::new(Services::new(
        Database::new(store, "test"),
        Arc::new(InMemoryCache::new()),
        &config,
    ))
}

#[tokio::test]
async fn test_bootstrap_twice_creates_nothing() {
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("lockbox.db");

    let store = SqliteDocumentStore::new(&db_path).await.unwrap();
    assert!(setup::bootstrap(&store, &DEFAULT_DATABASES).await.unwrap() > 0);

    let reopened = SqliteDocumentStore::new(&db_path).await.unwrap();
    assert_eq!(setup::bootstrap(&reopened, &DEFAULT_DATABASES).await.unwrap(), 0);
}

#[tokio::test]
async fn test_accounts_survive_reopen() {
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("lockbox.db");

    let alice_id = {
        let services = open_services(&db_path).await;
        services.register("alice", "password123").await.unwrap().resource.id
    };

    let services = open_services(&db_path).await;
    let creds = Credentials {
        username: "alice".to_string(),
        password: "password123".to_string(),
    };
    let token = services.authority.login(&creds).await.unwrap();
    assert_eq!(token.owner(), alice_id);
    assert_eq!(services.labels.list_with_counts(&alice_id).await.unwrap().len(), 5);

    assert!(matches!(
        services.register("alice", "x").await,
        Err(Error::Conflict { .. })
    ));
}

#[tokio::test]
async fn test_label_counts_on_sqlite() {
    let tmp_dir = TempDir::new().unwrap();
    let services = open_services(&tmp_dir.path().join("lockbox.db")).await;
    let alice = services.register("alice", "password123").await.unwrap();

    let labels = services.labels.list_with_counts(alice.id()).await.unwrap();
    let id_of = |name: &str| {
        labels
            .iter()
            .find(|l| l.label.resource.name == name)
            .map(|l| l.label.resource.id.clone())
            .unwrap()
    };
    let inbox = id_of("Inbox");
    let trash = id_of("Trash");

    for (labels, is_read) in [
        (vec![inbox.clone()], false),
        (vec![inbox.clone()], true),
        (vec![inbox.clone(), trash.clone()], false),
    ] {
        let thread = Thread {
            resource: Resource::new(alice.id(), "Hello", Utc::now()),
            labels,
            members: vec![],
            emails: vec![],
            is_read,
            secure: Secure::Some,
        };
        services.threads.store().insert(&thread).await.unwrap();
    }

    let counted = services.labels.get_with_counts(&inbox, alice.id()).await.unwrap();
    assert_eq!(counted.threads_total, 3);
    assert_eq!(counted.threads_unread, 1);

    let counted = services.labels.get_with_counts(&trash, alice.id()).await.unwrap();
    assert_eq!(counted.threads_total, 1);
    assert_eq!(counted.threads_unread, 0);
}

#[tokio::test]
async fn test_delete_where_reports_matches() {
    let tmp_dir = TempDir::new().unwrap();
    let services = open_services(&tmp_dir.path().join("lockbox.db")).await;
    let alice = services.register("alice", "password123").await.unwrap();

    for subject in ["a", "b", "c"] {
        let thread = Thread {
            resource: Resource::new(alice.id(), subject, Utc::now()),
            labels: vec![],
            members: vec![],
            emails: vec![],
            is_read: true,
            secure: Secure::None,
        };
        services.threads.store().insert(&thread).await.unwrap();
    }

    let store = services.threads.store();
    let result = store
        .delete_where(&filter!("owner" => alice.id(), "is_read" => true))
        .await
        .unwrap();
    assert_eq!(result.dropped, 3);
    assert_eq!(store.delete_where(&filter!("owner" => alice.id())).await.unwrap().dropped, 0);
}

#[test]
fn test_sqlite_backend_is_configurable() {
    let config = Config::from_toml("[store]\nbackend = \"sqlite\"\naddress = \"data.db\"").unwrap();
    assert_eq!(config.store.backend, Backend::Sqlite);
}
