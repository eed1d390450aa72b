use std::path::Path;

use anyhow::Result as AnyResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

/// Open (creating if needed) the SQLite store at `db_path`.
pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "publish_import",
                error = %e,
                event = "db_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target: "publish_import", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    check_pragmas(&pool).await?;

    Ok(pool)
}

/// Imports rely on foreign keys for row-level failures, so a store without
/// them is refused.
async fn check_pragmas(pool: &Pool<Sqlite>) -> AnyResult<()> {
    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode;").fetch_one(pool).await?;
    let foreign_keys: bool = sqlx::query_scalar("PRAGMA foreign_keys;").fetch_one(pool).await?;
    tracing::info!(
        target: "publish_import",
        event = "db_open",
        journal_mode = %journal_mode,
        foreign_keys
    );

    if !foreign_keys {
        anyhow::bail!("foreign key enforcement is disabled on this store");
    }
    if !journal_mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(target: "publish_import", event = "db_open_warning", journal_mode = %journal_mode);
    }
    Ok(())
}
