//! Session settings
//!
//! Passed explicitly to [`Session::new`](crate::Session::new) and to the
//! function registrar instead of living in process-wide globals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log every statement sent to the database at `info` level.
    pub print_sql: bool,

    /// Language handler used for generated server-side functions.
    pub language_handler: String,

    /// Schema that holds session-temporary functions and types.
    pub temp_schema: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            print_sql: false,
            language_handler: "plpython3u".to_string(),
            temp_schema: "pg_temp".to_string(),
        }
    }
}
