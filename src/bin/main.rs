//! Lockbox bootstrap tool
//!
//! Creates the databases, tables and indexes the service needs, then
//! optionally registers a seed account.
//!
//! Usage: lockbox [config.toml]

use lockbox::setup;
use lockbox::{Config, Services};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    log::info!(
        "Bootstrapping {:?} store at {} (service database: {})",
        config.store.backend,
        config.store.address,
        config.store.database
    );

    let services = Services::connect(&config).await?;
    let created = setup::bootstrap(services.db.store.as_ref(), &config.databases).await?;
    log::info!("Schema ready, {} objects created", created);

    if let (Ok(username), Ok(password)) = (
        std::env::var("LOCKBOX_SEED_USER"),
        std::env::var("LOCKBOX_SEED_PASSWORD"),
    ) {
        log::info!("Creating seed account {}...", username);
        match services.register(&username, &password).await {
            Ok(account) => log::info!("Seed account created with id {}", account.resource.id),
            Err(e) => log::warn!("Failed to create seed account (may already exist): {}", e),
        }
    }

    Ok(())
}
