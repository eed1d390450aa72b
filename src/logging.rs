use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter directives.
pub const LOG_ENV: &str = "PUBLISH_IMPORT_LOG";
const DEFAULT_FILTER: &str = "publish_import=info,sqlx=warn";

fn filter_from_env() -> EnvFilter {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the JSON tracing subscriber on stderr and bridge `log` records
/// (sqlx) into it. Stdout stays free for command output.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
