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

const USER_SOURCES: &[EntityType] = &[EntityType::Users];

const WINNER_SQL: &str = "SELECT id FROM tags WHERE slug = ?1";

pub struct TagsImporter {
    state: ImporterState,
}

impl TagsImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Tags, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for TagsImporter {
    fn state(&self) -> &ImporterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ImporterState {
        &mut self.state
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies {
            imported: USER_SOURCES,
            existing: USER_SOURCES,
        }
    }

    async fn fetch_existing(
        &mut self,
        conn: &mut SqliteConnection,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        self.state.existing_data = load_id_map(conn, "SELECT slug, id FROM tags").await?;
        Ok(())
    }

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state.ensure_object_rows()?;
        for row in self.state.rows.iter_mut() {
            let slug = rows::str_field(row, "slug")
                .or_else(|| rows::str_field(row, "name"))
                .map(rows::slugify)
                .filter(|slug| !slug.is_empty());
            if let (Some(slug), Some(obj)) = (slug, rows::object_mut(row)) {
                obj.insert("slug".into(), Value::String(slug));
            }
        }
        Ok(())
    }

    async fn replace_identifiers(
        &mut self,
        deps: &DependencyView<'_>,
        options: &ImportOptions,
    ) -> anyhow::Result<()> {
        for row in self.state.rows.iter_mut() {
            let creator = rows::reference_field(row, "created_by")
                .and_then(|reference| deps.resolve(EntityType::Users, &reference))
                .or_else(|| options.persist_user());
            if let Some(obj) = rows::object_mut(row) {
                match creator {
                    Some(id) => obj.insert("created_by".into(), Value::String(id.to_string())),
                    None => obj.remove("created_by"),
                };
            }
        }
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
            let reference = rows::describe(row, &["slug", "name"]);
            let Some(name) = rows::str_field(row, "name") else {
                outcomes.push(self.state.fail(reference, "missing required field name", row));
                continue;
            };
            let Some(slug) = rows::str_field(row, "slug") else {
                outcomes.push(self.state.fail(reference, "tag slug could not be derived", row));
                continue;
            };
            let legacy = rows::legacy_id(row);
            if let Some(existing) = self.state.existing_data.get(slug).cloned() {
                outcomes.push(self.state.skip_existing(slug, legacy, &existing, row));
                continue;
            }

            let id = new_id();
            let now = now_ms();
            let res = sqlx::query(
                "INSERT INTO tags (id, name, slug, description, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )
            .bind(&id)
            .bind(name)
            .bind(slug)
            .bind(rows::str_field(row, "description"))
            .bind(rows::str_field(row, "created_by"))
            .bind(now)
            .execute(&mut *conn)
            .await;

            let outcome = match res {
                Ok(_) => self.state.accept(slug, legacy, id.clone(), rows::with_id(row, &id)),
                Err(err) => {
                    self.state
                        .insert_failed(&mut *conn, WINNER_SQL, slug, legacy, err, row)
                        .await?
                }
            };
            outcomes.push(outcome);
        }

        self.state.rows = rows;
        Ok(outcomes)
    }
}
