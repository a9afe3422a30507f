//! `compras get`: release retrieval by storage key from the CLI.
//!
//! The HTTP API reads through the server's shared store instead.

use anyhow::{bail, Result};

use compras_core::store::{PersistedRelease, ReleaseStore};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn get_release(config: &Config, key: &str) -> Result<PersistedRelease> {
    let pool = db::connect(config).await?;
    let found = SqliteStore::new(pool.clone()).get_release(key).await;
    pool.close().await;

    match found? {
        Some(release) => Ok(release),
        None => bail!("release not found: {}", key),
    }
}

/// CLI entry point: print the stored canonical release as JSON.
pub async fn run_get(config: &Config, key: &str) -> Result<()> {
    let release = get_release(config, key).await?;

    println!("--- Release ---");
    println!("key:        {} ({})", release.ocid, release.key_kind);
    println!("id:         {}", release.id);
    println!(
        "title:      {}",
        release.title.as_deref().unwrap_or("(untitled)")
    );
    println!("created_at: {}", release.created_at.to_rfc3339());
    println!("updated_at: {}", release.updated_at.to_rfc3339());
    println!();
    println!("--- Canonical ---");
    println!("{}", serde_json::to_string_pretty(&release.raw_data)?);

    Ok(())
}
