use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // `ocid` holds the storage key: the upstream ocid, or `id:<id>` when
    // key_kind = 'id'. Timestamps are RFC 3339 UTC with microseconds, so
    // lexical order is chronological order. `search_text` is the lowercased
    // title, description and buyer name, folded in Rust because SQLite's
    // LOWER() only folds ASCII.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS releases (
            id TEXT PRIMARY KEY,
            ocid TEXT NOT NULL UNIQUE,
            key_kind TEXT NOT NULL DEFAULT 'ocid',
            release_id TEXT,
            title TEXT,
            description TEXT,
            buyer_name TEXT,
            buyer_region TEXT,
            status TEXT,
            procurement_method TEXT,
            procurement_method_details TEXT,
            main_procurement_category TEXT,
            submission_method TEXT NOT NULL DEFAULT '[]',
            budget_amount REAL,
            currency TEXT,
            published_date TEXT,
            tender_start_date TEXT,
            tender_end_date TEXT,
            raw_data TEXT NOT NULL,
            search_text TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parties (
            id TEXT PRIMARY KEY,
            release_id TEXT NOT NULL,
            party_id TEXT NOT NULL,
            name TEXT,
            identifier_scheme TEXT,
            identifier_id TEXT,
            legal_name TEXT,
            roles TEXT NOT NULL DEFAULT '[]',
            locality TEXT,
            region TEXT,
            country_name TEXT,
            contact_name TEXT,
            email TEXT,
            telephone TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(release_id, party_id),
            FOREIGN KEY (release_id) REFERENCES releases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            release_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            document_type TEXT,
            title TEXT,
            description TEXT,
            url TEXT,
            format TEXT,
            language TEXT,
            date_published TEXT,
            date_modified TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(release_id, document_id),
            FOREIGN KEY (release_id) REFERENCES releases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_releases_created_at ON releases(created_at DESC, ocid)",
        "CREATE INDEX IF NOT EXISTS idx_releases_published_date ON releases(published_date)",
        "CREATE INDEX IF NOT EXISTS idx_releases_buyer_name ON releases(buyer_name)",
        "CREATE INDEX IF NOT EXISTS idx_releases_buyer_region ON releases(buyer_region)",
        "CREATE INDEX IF NOT EXISTS idx_releases_status ON releases(status)",
        "CREATE INDEX IF NOT EXISTS idx_releases_search_text ON releases(search_text)",
        "CREATE INDEX IF NOT EXISTS idx_parties_release_id ON parties(release_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_release_id ON documents(release_id)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
