use std::fmt;
use std::time::Instant;

use serde::Serialize;
use sqlx::SqliteConnection;

use super::importer::{DependencyView, EntityImporter, RowOutcome};
use super::registry::Registry;
use super::table_order::EntityType;
use super::{ImportError, ImportOptions};

/// Lifecycle stage of a single importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    FetchExisting,
    BeforeImport,
    ReplaceIdentifiers,
    DoImport,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::FetchExisting => "fetchExisting",
            Stage::BeforeImport => "beforeImport",
            Stage::ReplaceIdentifiers => "replaceIdentifiers",
            Stage::DoImport => "doImport",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive every importer through its lifecycle, one importer at a time, on the
/// caller's connection. Row outcomes from all importers are returned in
/// registry order; the first structural failure stops the run.
pub async fn run_pipeline(
    registry: &mut Registry,
    conn: &mut SqliteConnection,
    options: &ImportOptions,
) -> Result<Vec<RowOutcome>, ImportError> {
    let mut outcomes = Vec::new();
    let importers = registry.importers_mut();

    for index in 0..importers.len() {
        let (finished, rest) = importers.split_at_mut(index);
        let current = rest[0].as_mut();
        let entity = current.data_key_to_import();
        let started = Instant::now();

        let fetched = current.fetch_existing(&mut *conn, options).await;
        settle(entity, Stage::FetchExisting, fetched)?;
        let prepared = current.before_import(options).await;
        settle(entity, Stage::BeforeImport, prepared)?;

        let deps = wire_dependencies(current, finished);
        let replaced = current.replace_identifiers(&deps, options).await;
        settle(entity, Stage::ReplaceIdentifiers, replaced)?;

        let imported = current.do_import(&mut *conn, options).await;
        let rows = settle(entity, Stage::DoImport, imported)?;
        let failed = rows.iter().filter(|outcome| outcome.error().is_some()).count();
        tracing::info!(
            target: "publish_import",
            event = "importer_done",
            entity = %entity,
            rows = rows.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64
        );
        outcomes.extend(rows);
    }

    Ok(outcomes)
}

/// Borrow the id maps the importer declared from importers that already
/// completed. The registry order guarantees each of them is final.
fn wire_dependencies<'a>(
    current: &dyn EntityImporter,
    finished: &'a [Box<dyn EntityImporter>],
) -> DependencyView<'a> {
    let declared = current.dependencies();
    let mut view = DependencyView::default();
    for producer in finished {
        let entity = producer.data_key_to_import();
        if declared.imported.contains(&entity) {
            view.bind_imported(entity, producer.imported_data());
        }
        if declared.existing.contains(&entity) {
            view.bind_existing(entity, producer.existing_data());
        }
    }
    view
}

fn settle<T>(entity: EntityType, stage: Stage, result: anyhow::Result<T>) -> Result<T, ImportError> {
    match result {
        Ok(value) => {
            tracing::debug!(
                target: "publish_import",
                event = "importer_stage",
                entity = %entity,
                stage = %stage
            );
            Ok(value)
        }
        Err(source) => {
            tracing::error!(
                target: "publish_import",
                event = "importer_stage_failed",
                entity = %entity,
                stage = %stage,
                error = %source
            );
            Err(ImportError::Stage {
                entity,
                stage,
                source,
            })
        }
    }
}
