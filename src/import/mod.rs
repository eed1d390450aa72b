use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

pub mod bundle;
pub mod importer;
pub mod importers;
pub mod pipeline;
pub mod registry;
pub mod report;
mod rows;
pub mod table_order;
pub mod transaction;
pub mod validator;

pub use bundle::{ImportBundle, ImportBundleError};
pub use importer::{
    Dependencies, DependencyView, EntityImporter, IdMap, ImporterState, Problem, ProblemLevel,
    RowError, RowOutcome,
};
pub use pipeline::{run_pipeline, Stage};
pub use registry::Registry;
pub use report::{build_report, write_import_report, ImportReport};
pub use rows::slugify;
pub use table_order::{EntityType, UnknownEntityType, IMPORT_ORDER};
pub use transaction::{decide, run_atomic, Decision};
pub use validator::{validate_envelope, EnvelopeError, VersionPolicy};

/// Exports older than this belong to the legacy epoch and are refused.
pub const MIN_SUPPORTED_EXPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub return_imported_data: bool,
    /// Actor recorded as `created_by` on created rows.
    pub import_persist_user: Option<String>,
}

impl ImportOptions {
    pub fn persist_user(&self) -> Option<&str> {
        self.import_persist_user.as_deref()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportContext<'a> {
    pub pool: &'a SqlitePool,
    pub version_policy: &'a VersionPolicy,
}

impl<'a> ImportContext<'a> {
    pub fn new(pool: &'a SqlitePool, version_policy: &'a VersionPolicy) -> Self {
        Self {
            pool,
            version_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Validating,
    Initializing,
    Importing,
    Deciding,
    Reporting,
    Done,
    Aborted,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportPhase::Validating => "validating",
            ImportPhase::Initializing => "initializing",
            ImportPhase::Importing => "importing",
            ImportPhase::Deciding => "deciding",
            ImportPhase::Reporting => "reporting",
            ImportPhase::Done => "done",
            ImportPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

pub(crate) fn log_phase(phase: ImportPhase) {
    tracing::info!(target: "publish_import", event = "import_phase", phase = %phase);
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Bundle(#[from] ImportBundleError),
    #[error("{entity} depends on {dependency}, which is not imported before it")]
    DependencyOrder {
        entity: EntityType,
        dependency: EntityType,
    },
    #[error("more than one importer registered for {0}")]
    DuplicateImporter(EntityType),
    #[error("{entity} importer failed during {stage}")]
    Stage {
        entity: EntityType,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The transaction was rolled back because at least one row failed.
    #[error("import aborted, {} row(s) failed", .errors.len())]
    Aborted {
        errors: Vec<RowError>,
        problems: Vec<Problem>,
    },
}

impl ImportError {
    /// Row failures of a rolled-back import; empty for every other error.
    pub fn row_errors(&self) -> &[RowError] {
        match self {
            ImportError::Aborted { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Import a whole bundle atomically. Either every entity type is committed and
/// a report is returned, or nothing is written and the error explains why.
pub async fn import_bundle(
    bundle: &ImportBundle,
    ctx: &ImportContext<'_>,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let started = Instant::now();
    let result = run_import(bundle, ctx, options).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(report) => {
            log_phase(ImportPhase::Done);
            tracing::info!(
                target: "publish_import",
                event = "import_done",
                problems = report.problems.len(),
                elapsed_ms
            );
        }
        Err(err) => {
            log_phase(ImportPhase::Aborted);
            tracing::warn!(
                target: "publish_import",
                event = "import_aborted",
                error = %err,
                row_errors = err.row_errors().len(),
                elapsed_ms
            );
        }
    }
    result
}

async fn run_import(
    bundle: &ImportBundle,
    ctx: &ImportContext<'_>,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    log_phase(ImportPhase::Validating);
    validate_envelope(bundle, ctx.version_policy)?;

    log_phase(ImportPhase::Initializing);
    let mut registry = Registry::instantiate(bundle)?;

    log_phase(ImportPhase::Importing);
    run_atomic(ctx.pool, &mut registry, options).await?;

    log_phase(ImportPhase::Reporting);
    Ok(build_report(&registry, bundle, options))
}
