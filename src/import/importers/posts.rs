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

const SOURCES: &[EntityType] = &[EntityType::Users, EntityType::Tags];

const WINNER_SQL: &str = "SELECT id FROM posts WHERE slug = ?1";

pub struct PostsImporter {
    state: ImporterState,
}

impl PostsImporter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            state: ImporterState::new(EntityType::Posts, rows),
        }
    }
}

#[async_trait]
impl EntityImporter for PostsImporter {
    fn state(&self) -> &ImporterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ImporterState {
        &mut self.state
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies {
            imported: SOURCES,
            existing: SOURCES,
        }
    }

    async fn fetch_existing(
        &mut self,
        conn: &mut SqliteConnection,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        self.state.existing_data = load_id_map(conn, "SELECT slug, id FROM posts").await?;
        Ok(())
    }

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state.ensure_object_rows()?;
        for row in self.state.rows.iter_mut() {
            let slug = rows::str_field(row, "slug")
                .or_else(|| rows::str_field(row, "title"))
                .map(rows::slugify)
                .filter(|slug| !slug.is_empty());
            let Some(obj) = rows::object_mut(row) else {
                continue;
            };
            if let Some(slug) = slug {
                obj.insert("slug".into(), Value::String(slug));
            }
            obj.entry("status")
                .or_insert_with(|| Value::String("draft".into()));
        }
        Ok(())
    }

    async fn replace_identifiers(
        &mut self,
        deps: &DependencyView<'_>,
        options: &ImportOptions,
    ) -> anyhow::Result<()> {
        let mut rows = std::mem::take(&mut self.state.rows);
        for row in rows.iter_mut() {
            let author_ref = rows::reference_field(row, "author")
                .or_else(|| rows::reference_field(row, "author_id"));
            let resolved = author_ref
                .as_deref()
                .and_then(|reference| deps.resolve(EntityType::Users, reference));
            let author_id = match (resolved, options.persist_user()) {
                (Some(id), _) => Some(id.to_string()),
                (None, Some(fallback)) => {
                    self.state.warn(
                        format!(
                            "Author `{}` could not be resolved. Post attributed to the importing user.",
                            author_ref.as_deref().unwrap_or("<none>")
                        ),
                        row,
                    );
                    Some(fallback.to_string())
                }
                (None, None) => None,
            };

            let references = rows::reference_list(row, "tags", &["slug", "name", "id"]);
            let mut tag_ids = Vec::with_capacity(references.len());
            for reference in &references {
                let resolved = deps
                    .resolve(EntityType::Tags, reference)
                    .or_else(|| deps.resolve(EntityType::Tags, &rows::slugify(reference)));
                match resolved {
                    Some(id) => tag_ids.push(Value::String(id.to_string())),
                    None => self
                        .state
                        .warn(format!("Tag `{reference}` could not be resolved and was dropped."), row),
                }
            }

            let Some(obj) = rows::object_mut(row) else {
                continue;
            };
            match author_id {
                Some(id) => {
                    obj.insert("author_id".into(), Value::String(id));
                }
                None => {
                    obj.remove("author_id");
                }
            }
            if let Some(reference) = author_ref {
                obj.insert("author".into(), Value::String(reference));
            }
            obj.insert("tags".into(), Value::Array(tag_ids));
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
            let reference = rows::describe(row, &["slug", "title"]);
            let Some(title) = rows::str_field(row, "title") else {
                outcomes.push(self.state.fail(reference, "missing required field title", row));
                continue;
            };
            let Some(slug) = rows::str_field(row, "slug") else {
                outcomes.push(self.state.fail(reference, "post slug could not be derived", row));
                continue;
            };
            let legacy = rows::legacy_id(row);
            if let Some(existing) = self.state.existing_data.get(slug).cloned() {
                outcomes.push(self.state.skip_existing(slug, legacy, &existing, row));
                continue;
            }
            let Some(author_id) = rows::str_field(row, "author_id") else {
                let author = rows::str_field(row, "author").unwrap_or("<none>");
                outcomes.push(self.state.fail(
                    slug,
                    format!("author `{author}` could not be resolved"),
                    row,
                ));
                continue;
            };

            let id = new_id();
            let now = rows::timestamp_ms(row, "created_at").unwrap_or_else(now_ms);
            let res = sqlx::query(
                "INSERT INTO posts (id, title, slug, html, status, author_id, published_at, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            )
            .bind(&id)
            .bind(title)
            .bind(slug)
            .bind(rows::str_field(row, "html"))
            .bind(rows::str_field(row, "status").unwrap_or("draft"))
            .bind(author_id)
            .bind(rows::timestamp_ms(row, "published_at"))
            .bind(options.persist_user())
            .bind(now)
            .execute(&mut *conn)
            .await;
            if let Err(err) = res {
                let outcome = self
                    .state
                    .insert_failed(&mut *conn, WINNER_SQL, slug, legacy, err, row)
                    .await?;
                outcomes.push(outcome);
                continue;
            }

            let mut link_failure = None;
            for (sort_order, tag_id) in rows::reference_list(row, "tags", &[]).iter().enumerate() {
                let linked = sqlx::query(
                    "INSERT OR IGNORE INTO posts_tags (post_id, tag_id, sort_order) VALUES (?1, ?2, ?3)",
                )
                .bind(&id)
                .bind(tag_id)
                .bind(sort_order as i64)
                .execute(&mut *conn)
                .await;
                if let Err(err) = linked {
                    link_failure = Some(err);
                    break;
                }
            }

            let outcome = match link_failure {
                None => self.state.accept(slug, legacy, id.clone(), rows::with_id(row, &id)),
                Some(err) => {
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
