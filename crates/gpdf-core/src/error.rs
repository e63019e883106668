//! Error types shared by the query-building core

use thiserror::Error;

/// Error reported by the [`Database`](crate::Database) collaborator.
///
/// Server diagnostics are carried verbatim; the core never rewrites them.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("{message}")]
    Server {
        /// SQLSTATE code, when the server reported one.
        code: Option<String>,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported statement parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Connection is closed")]
    Closed,
}

impl DbError {
    pub fn server(code: Option<&str>, message: impl Into<String>) -> Self {
        DbError::Server {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("No matching database available")]
    NoDatabase,

    #[error("Cannot specify \"cond\" and \"on\" together")]
    JoinCondAndOn,

    #[error("Unsupported join type: {0}")]
    UnsupportedJoinType(String),

    #[error("Column \"{0}\" is produced by both sides of the join")]
    DuplicateJoinColumn(String),

    #[error("Could not use 'ascending' and 'operator' together to order by column \"{0}\"")]
    AscendingWithOperator(String),

    #[error("Slice step {0} is not supported")]
    UnsupportedSliceStep(i64),

    #[error("Unsupported unary operator: {0}")]
    UnsupportedUnaryOperator(String),

    #[error("Expression must be based on dataframe \"{expected}\" but references \"{found}\"")]
    UnrelatedDataFrames { expected: String, found: String },

    #[error("Cannot pass arguments from more than one dataframe: \"{0}\" and \"{1}\"")]
    ArgumentsFromManyDataFrames(String, String),

    #[error("Expression should not depend on any dataframe, found \"{0}\"")]
    UnexpectedDataFrame(String),

    #[error("Function {name} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Grouping sets are based on different dataframes: \"{0}\" and \"{1}\"")]
    GroupingBaseMismatch(String, String),

    #[error("Column names of the new table are unknown")]
    MissingColumnNames,

    #[error("Cannot build a dataframe from zero rows")]
    EmptyRows,

    #[error("Row {row} has {actual} value(s), expected {expected}")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column name(s) found: {}", .0.join(", "))]
    DuplicateColumns(Vec<String>),

    #[error("Failed to fetch the entire row of dataframe: {0}")]
    MalformedRow(String),

    #[error("Failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Lineage of dataframe \"{0}\" contains a cycle")]
    CyclicLineage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
