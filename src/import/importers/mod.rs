use serde_json::Value;
use sqlx::SqliteConnection;

use super::importer::{EntityImporter, IdMap};
use super::table_order::EntityType;

mod posts;
mod roles;
mod settings;
mod subscribers;
mod tags;
mod users;

pub use posts::PostsImporter;
pub use roles::RolesImporter;
pub use settings::SettingsImporter;
pub use subscribers::SubscribersImporter;
pub use tags::TagsImporter;
pub use users::UsersImporter;

pub(crate) fn importer_for(entity: EntityType, rows: Vec<Value>) -> Box<dyn EntityImporter> {
    match entity {
        EntityType::Roles => Box::new(RolesImporter::new(rows)),
        EntityType::Users => Box::new(UsersImporter::new(rows)),
        EntityType::Tags => Box::new(TagsImporter::new(rows)),
        EntityType::Subscribers => Box::new(SubscribersImporter::new(rows)),
        EntityType::Posts => Box::new(PostsImporter::new(rows)),
        EntityType::Settings => Box::new(SettingsImporter::new(rows)),
    }
}

/// Run a two-column `SELECT natural_key, id` and collect it.
pub(crate) async fn load_id_map(conn: &mut SqliteConnection, sql: &str) -> anyhow::Result<IdMap> {
    let pairs = sqlx::query_as::<_, (String, String)>(sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(pairs.into_iter().collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, SqliteConnection};

    pub(crate) async fn migrated_conn() -> SqliteConnection {
        let mut conn = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()
            .expect("memory options")
            .foreign_keys(true)
            .connect()
            .await
            .expect("connect sqlite memory");
        apply_schema(&mut conn).await;
        conn
    }

    async fn apply_schema(conn: &mut SqliteConnection) {
        for sql in [
            include_str!("../../../migrations/202610010900_content_tables.sql"),
            include_str!("../../../migrations/202610010930_posts.sql"),
            include_str!("../../../migrations/202610011000_settings.sql"),
        ] {
            sqlx::raw_sql(sql)
                .execute(&mut *conn)
                .await
                .expect("apply schema");
        }
    }
}
