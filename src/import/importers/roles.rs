use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::load_id_map;
use crate::id::new_id;
use crate::import::importer::{EntityImporter, ImporterState, RowOutcome};
use crate::import::rows;
use crate::import::table_order::EntityType;
use crate::import::ImportOptions;
use crate::time::now_ms;

const WINNER_SQL: &str = "SELECT id FROM roles WHERE name = ?1";

pub struct RolesImporter {
    state: ImporterState,
}

impl RolesImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Roles, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for RolesImporter {
    fn state(&self) -> &ImporterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ImporterState {
        &mut self.state
    }

    async fn fetch_existing(
        &mut self,
        conn: &mut SqliteConnection,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        self.state.existing_data = load_id_map(conn, "SELECT name, id FROM roles").await?;
        Ok(())
    }

    async fn do_import(
        &mut self,
        conn: &mut SqliteConnection,
        options: &ImportOptions,
    ) -> anyhow::Result<Vec<RowOutcome>> {
        let rows = std::mem::take(&mut self.state.rows);
        let mut outcomes = Vec::with_capacity(rows.len());

        for row in &rows {
            let Some(name) = rows::str_field(row, "name") else {
                outcomes.push(self.state.fail(
                    rows::describe(row, &["name"]),
                    "missing required field name",
                    row,
                ));
                continue;
            };
            let legacy = rows::legacy_id(row);
            if let Some(existing) = self.state.existing_data.get(name).cloned() {
                outcomes.push(self.state.skip_existing(name, legacy, &existing, row));
                continue;
            }

            let id = new_id();
            let now = now_ms();
            let res = sqlx::query(
                "INSERT INTO roles (id, name, description, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )
            .bind(&id)
            .bind(name)
            .bind(rows::str_field(row, "description"))
            .bind(options.persist_user())
            .bind(now)
            .execute(&mut *conn)
            .await;

            let outcome = match res {
                Ok(_) => self.state.accept(name, legacy, id.clone(), rows::with_id(row, &id)),
                Err(err) => {
                    self.state
                        .insert_failed(&mut *conn, WINNER_SQL, name, legacy, err, row)
                        .await?
                }
            };
            outcomes.push(outcome);
        }

        self.state.rows = rows;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::importers::test_support::migrated_conn;
    use serde_json::json;

    #[tokio::test]
    async fn existing_role_is_reused_not_duplicated() {
        let mut conn = migrated_conn().await;
        sqlx::query("INSERT INTO roles (id, name, created_at, updated_at) VALUES ('r-old', 'Author', 0, 0)")
            .execute(&mut conn)
            .await
            .unwrap();

        let options = ImportOptions::default();
        let mut importer = RolesImporter::new(vec![
            json!({"id": "5", "name": "Author"}),
            json!({"name": "Editor"}),
            json!({"description": "nameless"}),
        ]);
        importer.fetch_existing(&mut conn, &options).await.unwrap();
        importer.before_import(&options).await.unwrap();
        let outcomes = importer.do_import(&mut conn, &options).await.unwrap();

        assert!(matches!(outcomes[0], RowOutcome::Skipped { .. }));
        assert!(matches!(outcomes[1], RowOutcome::Imported { .. }));
        assert!(outcomes[2].error().is_some());
        assert_eq!(importer.existing_data().get("5").map(String::as_str), Some("r-old"));
        assert!(importer.imported_data().contains_key("Editor"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
