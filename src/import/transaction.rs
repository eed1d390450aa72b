use sqlx::SqlitePool;
use tracing::{error, info, warn};

use super::importer::{ProblemLevel, RowError, RowOutcome};
use super::pipeline::run_pipeline;
use super::registry::Registry;
use super::{log_phase, ImportError, ImportOptions, ImportPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Commit,
    Rollback(Vec<RowError>),
}

/// Any failed row anywhere rolls back the whole bundle.
pub fn decide(outcomes: &[RowOutcome]) -> Decision {
    let errors: Vec<RowError> = outcomes
        .iter()
        .filter_map(RowOutcome::error)
        .cloned()
        .collect();
    if errors.is_empty() {
        Decision::Commit
    } else {
        Decision::Rollback(errors)
    }
}

/// Run the whole pipeline inside one transaction. Nothing is durable unless
/// every importer finished and no row failed. The transaction rolls back on
/// drop, so an early `?` releases it as well.
pub async fn run_atomic(
    pool: &SqlitePool,
    registry: &mut Registry,
    options: &ImportOptions,
) -> Result<(), ImportError> {
    let mut tx = pool.begin().await?;
    info!(target: "publish_import", event = "db_tx_begin", importers = registry.len());

    let outcomes = match run_pipeline(registry, &mut *tx, options).await {
        Ok(outcomes) => outcomes,
        Err(err) => {
            match tx.rollback().await {
                Ok(()) => warn!(target: "publish_import", event = "db_tx_rollback", reason = "structural"),
                Err(rb) => error!(target: "publish_import", event = "db_tx_rollback_failed", error = %rb),
            }
            return Err(err);
        }
    };

    log_phase(ImportPhase::Deciding);
    match decide(&outcomes) {
        Decision::Commit => {
            tx.commit().await?;
            info!(target: "publish_import", event = "db_tx_commit", rows = outcomes.len());
            Ok(())
        }
        Decision::Rollback(errors) => {
            match tx.rollback().await {
                Ok(()) => warn!(
                    target: "publish_import",
                    event = "db_tx_rollback",
                    reason = "row_errors",
                    errors = errors.len()
                ),
                Err(rb) => error!(target: "publish_import", event = "db_tx_rollback_failed", error = %rb),
            }
            let problems = registry
                .problems()
                .into_iter()
                .filter(|problem| problem.level == ProblemLevel::Warning)
                .collect();
            Err(ImportError::Aborted { errors, problems })
        }
    }
}
