//! Integration tests for ownership isolation and account deletion

use chrono::{Duration, Utc};
use lockbox::cache::r#impl::InMemoryCache;
use lockbox::docstore::r#impl::InMemoryDocumentStore;
use lockbox::models::{Contact, Encrypted, Key, Secure, Thread, TokenKind};
use lockbox::resource_store::to_document;
use lockbox::{setup, Authenticator, Config, Database, DocumentStore, Error, Record, Resource, Services};
use std::sync::Arc;

async fn setup_services() -> Arc<Services> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    setup::bootstrap_database(store.as_ref(), "test").await.unwrap();

    let mut config = Config::default();
    config.password_hash_cost = 4;
    Arc::new(Services::new(
        Database::new(store, "test"),
        Arc::new(InMemoryCache::new()),
        &config,
    ))
}

fn contact(owner: &str, name: &str) -> Contact {
    Contact {
        resource: Resource::new(owner, name, Utc::now()),
        data: Encrypted {
            encoding: "json".to_string(),
            pgp_fingerprints: vec!["ABCD".to_string()],
            data: "-----BEGIN PGP MESSAGE-----".to_string(),
            version_major: 1,
            version_minor: 0,
        },
    }
}

#[tokio::test]
async fn test_foreign_contact_looks_missing() {
    let services = setup_services().await;
    let alice = services.register("alice", "password123").await.unwrap();
    let bob = services.register("bob", "password123").await.unwrap();

    let c = contact(alice.id(), "Carol");
    services.contacts.insert(&c).await.unwrap();

    let missing = services.contacts.get_owned("no-such-id", bob.id()).await.unwrap_err();
    let foreign = services.contacts.get_owned(c.id(), bob.id()).await.unwrap_err();
    assert!(matches!(foreign, Error::NotFound(_)));
    assert_eq!(missing.code(), foreign.code());

    let mut changed = c.clone();
    changed.resource.name = "Mallory".to_string();
    assert!(matches!(
        services.contacts.update_owned(&changed, bob.id()).await,
        Err(Error::NotFound(_))
    ));
    let partial = to_document(&serde_json::json!({"name": "Mallory"})).unwrap();
    assert!(matches!(
        services.contacts.update_id_owned(c.id(), partial, bob.id()).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        services.contacts.delete_owned(c.id(), bob.id()).await,
        Err(Error::NotFound(_))
    ));

    let fetched = services.contacts.get_owned(c.id(), alice.id()).await.unwrap();
    assert_eq!(fetched, c);
}

#[tokio::test]
async fn test_owner_cannot_be_reassigned() {
    let services = setup_services().await;
    let alice = services.register("alice", "password123").await.unwrap();
    let bob = services.register("bob", "password123").await.unwrap();

    let c = contact(alice.id(), "Carol");
    services.contacts.insert(&c).await.unwrap();

    let mut moved = c.clone();
    moved.resource.owner = bob.id().to_string();
    assert!(matches!(
        services.contacts.update_owned(&moved, alice.id()).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        services.contacts.get_by_id(c.id()).await.unwrap().owner(),
        alice.id()
    );
}

#[tokio::test]
async fn test_request_context_is_scoped_to_caller() {
    let services = setup_services().await;
    let alice = services.register("alice", "password123").await.unwrap();
    let bob = services.register("bob", "password123").await.unwrap();

    let c = contact(alice.id(), "Carol");
    services.contacts.insert(&c).await.unwrap();

    let token = services
        .authority
        .issue(bob.id(), TokenKind::Auth, Duration::hours(1))
        .await
        .unwrap();
    let header = format!("Bearer {}", token.id());
    let ctx = services.authenticate(Some(header.as_str())).await.unwrap();

    assert!(matches!(ctx.contact(c.id()).await, Err(Error::NotFound(_))));
    assert!(ctx.contacts().await.unwrap().is_empty());
    assert_eq!(ctx.labels().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_delete_account_cascades() {
    let services = setup_services().await;
    let alice = services.register("alice", "password123").await.unwrap();
    let bob = services.register("bob", "password123").await.unwrap();

    let token = services
        .authority
        .issue(alice.id(), TokenKind::Auth, Duration::hours(1))
        .await
        .unwrap();
    services.contacts.insert(&contact(alice.id(), "Carol")).await.unwrap();
    services.contacts.insert(&contact(bob.id(), "Dave")).await.unwrap();
    services
        .keys
        .insert(&Key {
            resource: Resource::new(alice.id(), "alice key", Utc::now()),
            key: "-----BEGIN PGP PUBLIC KEY BLOCK-----".to_string(),
            key_id: "ABCD1234".to_string(),
            expiry_date: None,
        })
        .await
        .unwrap();
    services
        .threads
        .store()
        .insert(&Thread {
            resource: Resource::new(alice.id(), "Hi", Utc::now()),
            labels: vec![],
            members: vec![],
            emails: vec![],
            is_read: true,
            secure: Secure::All,
        })
        .await
        .unwrap();

    // token + 5 labels + contact + key + thread + account
    let dropped = services.delete_account(alice.id()).await.unwrap();
    assert_eq!(dropped, 10);

    assert!(services.accounts.find(alice.id()).await.unwrap().is_none());
    assert!(services.contacts.list_owned(alice.id()).await.unwrap().is_empty());
    assert!(services.labels.store().list_owned(alice.id()).await.unwrap().is_empty());
    assert!(matches!(
        services.authority.validate_token(token.id()).await,
        Err(Error::InvalidToken)
    ));

    assert_eq!(services.contacts.list_owned(bob.id()).await.unwrap().len(), 1);
    assert_eq!(services.labels.list_with_counts(bob.id()).await.unwrap().len(), 5);

    // The name is free again
    services.register("alice", "password123").await.unwrap();
}
