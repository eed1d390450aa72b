#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use publish_import::{apply_migrations, ImportBundle};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Row counts of every content table, in import order.
pub async fn content_counts(pool: &SqlitePool) -> Vec<i64> {
    let mut counts = Vec::new();
    for table in ["roles", "users", "tags", "subscribers", "posts", "settings"] {
        counts.push(count(pool, table).await);
    }
    counts
}

pub fn bundle(value: Value) -> ImportBundle {
    ImportBundle::from_value(value).expect("valid bundle shape")
}

/// A bundle touching every entity type with cross references between them.
pub fn full_bundle() -> Value {
    json!({
        "meta": {"exported_on": 1_700_000_000_000_i64, "version": "2.4.1"},
        "data": {
            "roles": [{"id": 1, "name": "Author"}, {"id": 2, "name": "Editor"}],
            "users": [
                {"id": 10, "email": "a@example.com", "name": "Ada", "roles": [1]},
                {"id": 11, "email": "e@example.com", "name": "Eve", "roles": ["Editor"]}
            ],
            "tags": [{"id": 20, "name": "Release Notes", "created_by": 11}],
            "subscribers": [{"email": "reader@example.com", "name": "Reader"}],
            "posts": [
                {"id": 30, "title": "Hello", "author_id": 10, "tags": [20]},
                {"title": "Second", "author": "e@example.com", "tags": ["release-notes"], "status": "published"}
            ],
            "settings": [
                {"key": "title", "value": "My Blog"},
                {"key": "db_hash", "value": "deadbeef"}
            ]
        }
    })
}
