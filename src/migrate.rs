use std::collections::HashMap;

use anyhow::Context;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::time::now_ms;

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202610010900_content_tables.sql",
        include_str!("../migrations/202610010900_content_tables.sql"),
    ),
    (
        "202610010930_posts.sql",
        include_str!("../migrations/202610010930_posts.sql"),
    ),
    (
        "202610011000_settings.sql",
        include_str!("../migrations/202610011000_settings.sql"),
    ),
];

/// Names of the embedded migrations, in application order.
pub fn migration_names() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|(name, _)| *name)
}

/// Comment lines do not count towards a migration's checksum.
fn checksum(raw_sql: &str) -> String {
    let mut hasher = Sha256::new();
    for line in raw_sql.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with("--")) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

async fn ensure_ledger(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version TEXT PRIMARY KEY,
           applied_at INTEGER NOT NULL,
           checksum TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> anyhow::Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Run one migration script and record it, all in a single transaction.
async fn apply_file(pool: &SqlitePool, name: &str, raw_sql: &str) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(raw_sql)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("applying migration {name}"))?;
    sqlx::query("INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?1, ?2, ?3)")
        .bind(name)
        .bind(now_ms())
        .bind(checksum(raw_sql))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Bring the store's schema up to date. Already applied files are skipped
/// unless their contents changed, which is an error.
pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    ensure_ledger(pool).await?;
    let applied = applied_checksums(pool).await?;

    for (name, raw_sql) in MIGRATIONS {
        match applied.get(*name) {
            Some(stored) if *stored == checksum(raw_sql) => {
                debug!(target: "publish_import", event = "migration_skip_file", file = %name);
            }
            Some(_) => anyhow::bail!("migration {name} edited after application"),
            None => {
                apply_file(pool, name, raw_sql).await?;
                info!(target: "publish_import", event = "migration_file_applied", file = %name);
            }
        }
    }
    Ok(())
}
