//! gpdf core: lazy dataframes over Greenplum/PostgreSQL
//!
//! Dataframe operations build a graph of SQL queries without talking to the
//! server. When rows are needed the graph is flattened into one statement of
//! common table expressions and handed to a [`Database`] collaborator.

pub mod builtin;
pub mod config;
pub mod dataframe;
pub mod error;
pub mod expr;
pub mod func;
pub mod group;
pub mod lineage;
pub mod mock;
pub mod order;
pub mod row;
pub mod session;
pub mod sql;
pub mod types;
pub mod value;

pub use config::Settings;
pub use dataframe::{ColumnSelection, DataFrame, JoinSpec, JoinType, SaveOptions, Selection, Selector};
pub use error::{DbError, Error, Result};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use func::{CallStyle, FunctionCall, FunctionDef, FunctionHandle, ServerFunction};
pub use group::GroupingSets;
pub use order::{OrderKey, Ordering};
pub use row::{Row, Rows};
pub use session::{Database, Session, WireRow};
pub use types::{to_sql_literal, to_sql_type, CompositeType, DataType, TypeAnnotation};
pub use value::Value;
