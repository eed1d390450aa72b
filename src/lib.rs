pub mod db;
pub mod id;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod time;

pub use db::open_sqlite_pool;
pub use import::{
    import_bundle, ImportBundle, ImportContext, ImportError, ImportOptions, ImportReport,
    VersionPolicy,
};
pub use logging::init_logging;
pub use migrate::apply_migrations;
