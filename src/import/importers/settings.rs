use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::load_id_map;
use crate::import::importer::{EntityImporter, ImporterState, RowOutcome};
use crate::import::rows;
use crate::import::table_order::EntityType;
use crate::import::ImportOptions;
use crate::time::now_ms;

/// Keys that describe the running installation rather than its content.
const PROTECTED_KEYS: &[&str] = &[
    "db_hash",
    "next_update_check",
    "notifications",
    "session_secret",
    "theme_session_secret",
];

const WINNER_SQL: &str = "SELECT key FROM settings WHERE key = ?1";

pub struct SettingsImporter {
    state: ImporterState,
}

impl SettingsImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Settings, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for SettingsImporter {
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
        self.state.existing_data = load_id_map(conn, "SELECT key, key FROM settings").await?;
        Ok(())
    }

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state.ensure_object_rows()?;
        let rows = std::mem::take(&mut self.state.rows);
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let protected = rows::str_field(&row, "key")
                .filter(|key| PROTECTED_KEYS.contains(key))
                .map(str::to_string);
            match protected {
                Some(key) => {
                    let message = format!(
                        "Setting `{key}` is managed by the installation and was not imported."
                    );
                    self.state.warn(message, &row);
                }
                None => kept.push(row),
            }
        }
        self.state.rows = kept;
        Ok(())
    }

    async fn do_import(
        &mut self,
        conn: &mut SqliteConnection,
        _options: &ImportOptions,
    ) -> anyhow::Result<Vec<RowOutcome>> {
        let rows = std::mem::take(&mut self.state.rows);
        let mut outcomes = Vec::with_capacity(rows.len());

        for row in &rows {
            let Some(key) = rows::str_field(row, "key") else {
                outcomes.push(self.state.fail(
                    rows::describe(row, &[]),
                    "missing required field key",
                    row,
                ));
                continue;
            };
            let value = rows::value_text(row.get("value"));
            let kind = rows::str_field(row, "type").unwrap_or("blog");
            let now = now_ms();

            // Settings are configuration: a matching key is updated in place.
            let res = if self.state.existing_data.contains_key(key) {
                sqlx::query("UPDATE settings SET value = ?1, type = ?2, updated_at = ?3 WHERE key = ?4")
                    .bind(value.as_deref())
                    .bind(kind)
                    .bind(now)
                    .bind(key)
                    .execute(&mut *conn)
                    .await
            } else {
                sqlx::query("INSERT INTO settings (key, value, type, updated_at) VALUES (?1, ?2, ?3, ?4)")
                    .bind(key)
                    .bind(value.as_deref())
                    .bind(kind)
                    .bind(now)
                    .execute(&mut *conn)
                    .await
            };

            let outcome = match res {
                Ok(_) => self.state.accept(key, None, key.to_string(), row.clone()),
                Err(err) => {
                    self.state
                        .insert_failed(&mut *conn, WINNER_SQL, key, None, err, row)
                        .await?
                }
            };
            outcomes.push(outcome);
        }

        self.state.rows = rows;
        Ok(outcomes)
    }
}
