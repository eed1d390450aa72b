use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::load_id_map;
use crate::id::new_id;
use crate::import::importer::{
    Dependencies, DependencyView, EntityImporter, ImporterState, RowOutcome,
};
use crate::import::rows;
use crate::import::table_order::EntityType;
use crate::import::ImportOptions;
use crate::time::now_ms;

const ROLE_SOURCES: &[EntityType] = &[EntityType::Roles];

const WINNER_SQL: &str = "SELECT id FROM users WHERE email = ?1";

pub struct UsersImporter {
    state: ImporterState,
}

impl UsersImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Users, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for UsersImporter {
    fn state(&self) -> &ImporterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ImporterState {
        &mut self.state
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies {
            imported: ROLE_SOURCES,
            existing: ROLE_SOURCES,
        }
    }

    async fn fetch_existing(
        &mut self,
        conn: &mut SqliteConnection,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        self.state.existing_data = load_id_map(conn, "SELECT email, id FROM users").await?;
        Ok(())
    }

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state.ensure_object_rows()?;
        let mut rows = std::mem::take(&mut self.state.rows);
        for row in rows.iter_mut() {
            let Some(obj) = rows::object_mut(row) else {
                continue;
            };
            if let Some(email) = obj.get("email").and_then(Value::as_str) {
                let email = rows::normalize_email(email);
                obj.insert("email".into(), Value::String(email));
            }
            // Credentials never travel with an export; imported accounts stay
            // locked until their owner resets the password.
            let had_password = obj.remove("password").is_some();
            let inactive = obj.get("status").and_then(Value::as_str) == Some("inactive");
            if !inactive {
                obj.insert("status".into(), Value::String("locked".into()));
            }
            if had_password {
                let context = Value::Object(obj.clone());
                self.state.warn(
                    "Password was not imported. The user has to reset it before signing in.",
                    &context,
                );
            }
        }
        self.state.rows = rows;
        Ok(())
    }

    async fn replace_identifiers(
        &mut self,
        deps: &DependencyView<'_>,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        let mut rows = std::mem::take(&mut self.state.rows);
        for row in rows.iter_mut() {
            let references = rows::reference_list(row, "roles", &["name", "id"]);
            let mut role_ids = Vec::with_capacity(references.len());
            for reference in &references {
                match deps.resolve(EntityType::Roles, reference) {
                    Some(id) => role_ids.push(Value::String(id.to_string())),
                    None => self
                        .state
                        .warn(format!("Role `{reference}` could not be resolved and was dropped."), row),
                }
            }
            if let Some(obj) = rows::object_mut(row) {
                obj.insert("roles".into(), Value::Array(role_ids));
            }
        }
        self.state.rows = rows;
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
                "INSERT INTO users (id, name, email, bio, status, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            )
            .bind(&id)
            .bind(rows::str_field(row, "name"))
            .bind(email)
            .bind(rows::str_field(row, "bio"))
            .bind(rows::str_field(row, "status").unwrap_or("locked"))
            .bind(options.persist_user())
            .bind(now)
            .execute(&mut *conn)
            .await;
            if let Err(err) = res {
                let outcome = self
                    .state
                    .insert_failed(&mut *conn, WINNER_SQL, email, legacy, err, row)
                    .await?;
                outcomes.push(outcome);
                continue;
            }

            let mut link_failure = None;
            for role_id in rows::reference_list(row, "roles", &[]) {
                let linked = sqlx::query(
                    "INSERT OR IGNORE INTO roles_users (role_id, user_id) VALUES (?1, ?2)",
                )
                .bind(&role_id)
                .bind(&id)
                .execute(&mut *conn)
                .await;
                if let Err(err) = linked {
                    link_failure = Some(err);
                    break;
                }
            }

            let outcome = match link_failure {
                None => self.state.accept(email, legacy, id.clone(), rows::with_id(row, &id)),
                Some(err) => {
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
