pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod migrate;
pub mod model;
pub mod records;
pub mod storage;
pub mod users;

pub use error::{AppError, AppResult};

pub const LOG_ENV: &str = "PDIREG_LOG";
pub const DEFAULT_LOG_FILTER: &str = "pdireg=info,sqlx=warn";

/// Install the tracing subscriber: JSON lines to stdout, filtered by
/// `PDIREG_LOG`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
