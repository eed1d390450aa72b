use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use publish_import::import::write_import_report;
use publish_import::{
    apply_migrations, import_bundle, init_logging, open_sqlite_pool, ImportBundle, ImportContext,
    ImportError, ImportOptions, VersionPolicy,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "import_bundle", about = "Import a publishing export bundle atomically")]
struct Cli {
    /// SQLite database to import into (created and migrated when missing)
    #[arg(long, value_name = "PATH")]
    db: PathBuf,

    /// Export bundle (JSON)
    #[arg(value_name = "BUNDLE")]
    bundle: PathBuf,

    /// Include the created rows in the report
    #[arg(long)]
    return_imported_data: bool,

    /// Record this user id as the creator of imported rows
    #[arg(long, value_name = "ID")]
    persist_user: Option<String>,

    /// Oldest export version accepted
    #[arg(long, value_name = "SEMVER")]
    min_version: Option<semver::Version>,

    /// Also write the report as a timestamped file in this directory
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let pool = open_sqlite_pool(&cli.db).await?;
    apply_migrations(&pool).await.context("apply migrations")?;

    let bundle = ImportBundle::load(&cli.bundle)
        .with_context(|| format!("load bundle {}", cli.bundle.display()))?;
    let policy = match cli.min_version {
        Some(minimum) => VersionPolicy::with_minimum(minimum),
        None => VersionPolicy::default(),
    };
    let options = ImportOptions {
        return_imported_data: cli.return_imported_data,
        import_persist_user: cli.persist_user,
    };

    let result = import_bundle(&bundle, &ImportContext::new(&pool, &policy), &options).await;
    pool.close().await;

    match result {
        Ok(report) => {
            if let Some(dir) = &cli.report_dir {
                let path = write_import_report(dir, &cli.bundle, &report)?;
                eprintln!("report written to {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(ImportError::Aborted { errors, problems }) => {
            let payload = json!({
                "error": format!("import aborted, {} row(s) failed", errors.len()),
                "errors": errors,
                "problems": problems,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}
