//! PostgreSQL/Greenplum backend for gpdf
//!
//! Provides the [`PgDatabase`] collaborator, configuration loading and the
//! tracing subscriber set-up.

pub mod config;
pub mod database;
pub mod logging;

pub use config::{Config, ConfigError, ConnectionConfig, LoggingConfig};
pub use database::PgDatabase;
pub use logging::LoggingError;

use gpdf_core::{DbError, Session};

/// Open a session using the connection parameters and settings in `config`.
pub fn connect(config: &Config) -> Result<Session, DbError> {
    let db = PgDatabase::connect_with(&config.connection)?;
    Ok(Session::new(db, config.settings.clone()))
}
