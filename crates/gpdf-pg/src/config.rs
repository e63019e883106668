//! Configuration for connecting gpdf to a server
//!
//! Loads configuration from:
//! 1. config.yaml - connection, session settings and logging
//! 2. .env file - credentials
//!
//! Environment variables always override config.yaml values.

use gpdf_core::Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

/// Server connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// Usually supplied through `GPDF_PASSWORD` rather than the YAML file
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "gpadmin".to_string(),
            password: None,
        }
    }
}

impl ConnectionConfig {
    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user);
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub settings: Settings,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment, after reading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("GPDF_HOST") {
            self.connection.host = host;
        }
        if let Ok(port) = std::env::var("GPDF_PORT") {
            self.connection.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar {
                    name: "GPDF_PORT".to_string(),
                    value: port.clone(),
                })?;
        }
        if let Ok(dbname) = std::env::var("GPDF_DBNAME") {
            self.connection.dbname = dbname;
        }
        if let Ok(user) = std::env::var("GPDF_USER") {
            self.connection.user = user;
        }
        if let Ok(password) = std::env::var("GPDF_PASSWORD") {
            self.connection.password = Some(password);
        }
        if let Ok(print_sql) = std::env::var("GPDF_PRINT_SQL") {
            self.settings.print_sql = match print_sql.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        name: "GPDF_PRINT_SQL".to_string(),
                        value: print_sql,
                    })
                }
            };
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 5432);
        assert_eq!(config.connection.password, None);
        assert_eq!(config.settings.language_handler, "plpython3u");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
connection:
  host: "gp-master"
settings:
  print_sql: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.connection.host, "gp-master");
        assert_eq!(config.connection.port, 5432);
        assert!(config.settings.print_sql);
        assert_eq!(config.settings.temp_schema, "pg_temp");
        assert_eq!(config.logging, LoggingConfig::default());
    }

    // Keep this the only test that sets GPDF_* variables.
    #[test]
    fn test_env_var_override() {
        std::env::set_var("GPDF_PORT", "6543");
        std::env::set_var("GPDF_PRINT_SQL", "yes");

        let config_yaml = r#"
connection:
  host: "localhost"
  port: 5432
  dbname: "analytics"
  user: "gpadmin"
settings:
  print_sql: false
"#;
        let temp_file = std::env::temp_dir().join("gpdf_test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.connection.port, 6543);
        assert_eq!(config.connection.dbname, "analytics");
        assert!(config.settings.print_sql);

        std::env::set_var("GPDF_PORT", "not-a-port");
        let err = Config::load(&temp_file).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "GPDF_PORT"));

        std::env::remove_var("GPDF_PORT");
        std::env::remove_var("GPDF_PRINT_SQL");
        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/gpdf.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
