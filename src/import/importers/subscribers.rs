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

const WINNER_SQL: &str = "SELECT id FROM subscribers WHERE email = ?1";

pub struct SubscribersImporter {
    state: ImporterState,
}

impl SubscribersImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Subscribers, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for SubscribersImporter {
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
        self.state.existing_data = load_id_map(conn, "SELECT email, id FROM subscribers").await?;
        Ok(())
    }

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state.ensure_object_rows()?;
        for row in self.state.rows.iter_mut() {
            let Some(obj) = rows::object_mut(row) else {
                continue;
            };
            if let Some(email) = obj.get("email").and_then(Value::as_str) {
                let email = rows::normalize_email(email);
                obj.insert("email".into(), Value::String(email));
            }
            obj.entry("status")
                .or_insert_with(|| Value::String("subscribed".into()));
        }
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
            let Some(email) = rows::str_field(row, "email") else {
                outcomes.push(self.state.fail(
                    rows::describe(row, &["name"]),
                    "missing required field email",
                    row,
                ));
                continue;
            };
            let legacy = rows::legacy_id(row);
            if let Some(existing) = self.state.existing_data.get(email).cloned() {
                outcomes.push(self.state.skip_existing(email, legacy, &existing, row));
                continue;
            }

            let id = new_id();
            let now = rows::timestamp_ms(row, "created_at").unwrap_or_else(now_ms);
            let res = sqlx::query(
                "INSERT INTO subscribers (id, email, name, status, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )
            .bind(&id)
            .bind(email)
            .bind(rows::str_field(row, "name"))
            .bind(rows::str_field(row, "status").unwrap_or("subscribed"))
            .bind(options.persist_user())
            .bind(now)
            .execute(&mut *conn)
            .await;

            let outcome = match res {
                Ok(_) => self.state.accept(email, legacy, id.clone(), rows::with_id(row, &id)),
                Err(err) => {
                    self.state
                        .insert_failed(&mut *conn, WINNER_SQL, email, legacy, err, row)
                        .await?
                }
            };
            outcomes.push(outcome);
        }

        self.state.rows = rows;
        Ok(outcomes)
    }
}
