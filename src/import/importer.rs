use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::table_order::EntityType;
use super::ImportOptions;

/// Reference key (natural key or legacy id) to persisted record id.
pub type IdMap = BTreeMap<String, String>;

pub(crate) const DUPLICATE_ENTRY: &str =
    "Entry was not imported and ignored. Detected duplicated entry.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemLevel {
    Warning,
    Error,
}

/// Something an importer noticed about a row. Warnings never block a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub entity: EntityType,
    pub level: ProblemLevel,
    pub message: String,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{entity} row {reference} failed: {message}")]
pub struct RowError {
    pub entity: EntityType,
    pub reference: String,
    pub message: String,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Imported { reference: String, id: String },
    Skipped { reference: String },
    Failed(RowError),
}

impl RowOutcome {
    pub fn error(&self) -> Option<&RowError> {
        match self {
            RowOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Entity types whose resolved identifiers an importer reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub imported: &'static [EntityType],
    pub existing: &'static [EntityType],
}

impl Dependencies {
    pub fn all(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.imported.iter().chain(self.existing.iter()).copied()
    }
}

/// Read-only views onto the id maps of importers that already finished.
#[derive(Debug, Default)]
pub struct DependencyView<'a> {
    imported: BTreeMap<EntityType, &'a IdMap>,
    existing: BTreeMap<EntityType, &'a IdMap>,
}

impl<'a> DependencyView<'a> {
    pub(crate) fn bind_imported(&mut self, entity: EntityType, data: &'a IdMap) {
        self.imported.insert(entity, data);
    }

    pub(crate) fn bind_existing(&mut self, entity: EntityType, data: &'a IdMap) {
        self.existing.insert(entity, data);
    }

    pub fn imported(&self, entity: EntityType) -> Option<&'a IdMap> {
        self.imported.get(&entity).copied()
    }

    pub fn existing(&self, entity: EntityType) -> Option<&'a IdMap> {
        self.existing.get(&entity).copied()
    }

    /// Rows created by this import win over rows that were already stored.
    pub fn resolve(&self, entity: EntityType, reference: &str) -> Option<&'a str> {
        self.imported(entity)
            .and_then(|data| data.get(reference))
            .or_else(|| self.existing(entity).and_then(|data| data.get(reference)))
            .map(String::as_str)
    }
}

/// State every importer carries through its lifecycle.
#[derive(Debug)]
pub struct ImporterState {
    entity: EntityType,
    pub rows: Vec<Value>,
    pub existing_data: IdMap,
    pub imported_data: IdMap,
    pub problems: Vec<Problem>,
    pub imported_rows: Vec<Value>,
}

impl ImporterState {
    pub fn new(entity: EntityType, rows: Vec<Value>) -> Self {
        Self {
            entity,
            rows,
            existing_data: IdMap::new(),
            imported_data: IdMap::new(),
            problems: Vec::new(),
            imported_rows: Vec::new(),
        }
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn ensure_object_rows(&self) -> anyhow::Result<()> {
        if let Some(index) = self.rows.iter().position(|row| !row.is_object()) {
            anyhow::bail!("row {index} in {} is not an object", self.entity);
        }
        Ok(())
    }

    pub fn warn(&mut self, message: impl Into<String>, context: &Value) {
        self.problems.push(Problem {
            entity: self.entity,
            level: ProblemLevel::Warning,
            message: message.into(),
            context: context.clone(),
        });
    }

    pub fn fail(
        &mut self,
        reference: impl Into<String>,
        message: impl Into<String>,
        context: &Value,
    ) -> RowOutcome {
        let error = RowError {
            entity: self.entity,
            reference: reference.into(),
            message: message.into(),
            context: context.clone(),
        };
        tracing::warn!(
            target: "publish_import",
            event = "import_row_failed",
            entity = %self.entity,
            reference = %error.reference,
            error = %error.message
        );
        self.problems.push(Problem {
            entity: self.entity,
            level: ProblemLevel::Error,
            message: error.message.clone(),
            context: context.clone(),
        });
        RowOutcome::Failed(error)
    }

    /// Row matched a stored record by natural key; nothing is created.
    pub fn skip_existing(
        &mut self,
        reference: &str,
        legacy_id: Option<String>,
        existing_id: &str,
        context: &Value,
    ) -> RowOutcome {
        if let Some(legacy) = legacy_id {
            self.existing_data
                .entry(legacy)
                .or_insert_with(|| existing_id.to_string());
        }
        self.warn(DUPLICATE_ENTRY, context);
        RowOutcome::Skipped {
            reference: reference.to_string(),
        }
    }

    pub fn accept(
        &mut self,
        reference: &str,
        legacy_id: Option<String>,
        id: String,
        imported: Value,
    ) -> RowOutcome {
        if let Some(legacy) = legacy_id.filter(|legacy| legacy != reference) {
            self.imported_data.insert(legacy, id.clone());
        }
        self.imported_data.insert(reference.to_string(), id.clone());
        self.imported_rows.push(imported);
        RowOutcome::Imported {
            reference: reference.to_string(),
            id,
        }
    }

    /// Classify a failed write. Constraint failures belong to the row. Any
    /// other error may have ended the transaction inside SQLite, so it aborts
    /// the run.
    ///
    /// `winner_sql` selects the id of the stored record holding `reference`
    /// as its natural key; the collided row's legacy id is aliased to it.
    pub async fn insert_failed(
        &mut self,
        conn: &mut SqliteConnection,
        winner_sql: &str,
        reference: &str,
        legacy_id: Option<String>,
        err: sqlx::Error,
        context: &Value,
    ) -> anyhow::Result<RowOutcome> {
        let db = match err {
            sqlx::Error::Database(db) => db,
            other => {
                return Err(anyhow::Error::new(other)
                    .context(format!("writing {} row {reference}", self.entity)))
            }
        };
        match db.kind() {
            ErrorKind::UniqueViolation => {
                let winner: Option<String> = sqlx::query_scalar(winner_sql)
                    .bind(reference)
                    .fetch_optional(&mut *conn)
                    .await
                    .with_context(|| format!("resolving duplicate {} row {reference}", self.entity))?;
                if let Some(winner) = winner {
                    if let Some(legacy) = legacy_id {
                        self.imported_data.entry(legacy).or_insert_with(|| winner.clone());
                    }
                    self.imported_data.entry(reference.to_string()).or_insert(winner);
                }
                self.warn(DUPLICATE_ENTRY, context);
                Ok(RowOutcome::Skipped {
                    reference: reference.to_string(),
                })
            }
            ErrorKind::ForeignKeyViolation | ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                Ok(self.fail(reference, db.message().to_string(), context))
            }
            _ => Err(anyhow::Error::new(sqlx::Error::Database(db))
                .context(format!("writing {} row {reference}", self.entity))),
        }
    }
}

/// Capability set every entity importer provides. The pipeline only ever talks
/// to importers through this trait.
#[async_trait]
pub trait EntityImporter: Send {
    fn state(&self) -> &ImporterState;

    fn state_mut(&mut self) -> &mut ImporterState;

    fn dependencies(&self) -> Dependencies {
        Dependencies::default()
    }

    fn data_key_to_import(&self) -> EntityType {
        self.state().entity()
    }

    fn existing_data(&self) -> &IdMap {
        &self.state().existing_data
    }

    fn imported_data(&self) -> &IdMap {
        &self.state().imported_data
    }

    fn problems(&self) -> &[Problem] {
        &self.state().problems
    }

    fn imported_data_to_return(&self) -> &[Value] {
        &self.state().imported_rows
    }

    /// Look up stored rows that share a natural key with the bundle.
    async fn fetch_existing(
        &mut self,
        conn: &mut SqliteConnection,
        options: &ImportOptions,
    ) -> anyhow::Result<()>;

    async fn before_import(&mut self, _options: &ImportOptions) -> anyhow::Result<()> {
        self.state().ensure_object_rows()
    }

    async fn replace_identifiers(
        &mut self,
        _deps: &DependencyView<'_>,
        _options: &ImportOptions,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Persist rows. Row failures are returned as outcomes, never as `Err`.
    async fn do_import(
        &mut self,
        conn: &mut SqliteConnection,
        options: &ImportOptions,
    ) -> anyhow::Result<Vec<RowOutcome>>;
}
