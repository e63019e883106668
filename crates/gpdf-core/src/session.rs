//! The database collaborator contract and the session handle built on it

use std::fmt;
use std::rc::Rc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::dataframe::DataFrame;
use crate::error::{DbError, Error, Result};
use crate::expr::Expr;
use crate::func::FunctionCall;
use crate::sql::{fingerprint, quote_ident};
use crate::value::Value;

/// One row as returned by the driver, every column rendered as text.
pub type WireRow = Vec<Option<String>>;

/// External collaborator that owns the physical connection.
///
/// Implementations execute exactly the statement they are given. They do not
/// retry, and report server failures verbatim through [`DbError`].
pub trait Database {
    /// Execute `sql`. Returns the rows when `has_results` is true, `None` otherwise.
    fn execute(
        &self,
        sql: &str,
        args: &[Value],
        has_results: bool,
    ) -> std::result::Result<Option<Vec<WireRow>>, DbError>;

    /// Release the underlying connection.
    fn close(&self) -> std::result::Result<(), DbError>;
}

struct SessionInner {
    id: Uuid,
    db: Box<dyn Database>,
    settings: Settings,
}

/// Shared handle to a [`Database`] plus the settings that apply to it.
///
/// Every dataframe built from a session keeps a clone of the handle.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    pub fn new(db: impl Database + 'static, settings: Settings) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                id: Uuid::new_v4(),
                db: Box::new(db),
                settings,
            }),
        }
    }

    /// Identity used to remember which sessions already hold a server object.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn same_as(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run a statement that produces rows.
    pub fn query(&self, sql: &str) -> Result<Vec<WireRow>> {
        Ok(self.execute(sql, &[], true)?.unwrap_or_default())
    }

    /// Run a statement that produces no rows (DDL/DML).
    pub fn run(&self, sql: &str) -> Result<()> {
        self.execute(sql, &[], false)?;
        Ok(())
    }

    pub fn execute(
        &self,
        sql: &str,
        args: &[Value],
        has_results: bool,
    ) -> Result<Option<Vec<WireRow>>> {
        if self.inner.settings.print_sql {
            info!(session = %self.inner.id, "{}", sql);
        }
        debug!(
            session = %self.inner.id,
            fingerprint = %fingerprint(sql),
            has_results,
            args = args.len(),
            "executing statement"
        );
        let rows = self.inner.db.execute(sql, args, has_results)?;
        if let Some(rows) = &rows {
            debug!(session = %self.inner.id, rows = rows.len(), "statement returned rows");
        }
        Ok(rows)
    }

    pub fn close(&self) -> Result<()> {
        self.inner.db.close().map_err(Error::from)
    }

    /// A dataframe bound to an existing table or view.
    pub fn table(&self, name: &str) -> DataFrame {
        DataFrame::from_table(name, self)
    }

    pub fn table_in_schema(&self, name: &str, schema: &str) -> DataFrame {
        DataFrame::from_table_in_schema(name, schema, self)
    }

    pub fn from_rows<C, S>(&self, rows: Vec<Vec<Value>>, column_names: C) -> Result<DataFrame>
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataFrame::from_rows(self, rows, column_names)
    }

    pub fn from_columns<I, S>(&self, columns: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        DataFrame::from_columns(self, columns)
    }

    /// A one-row dataframe of constant expressions, with no `FROM` clause.
    pub fn assign<I, K, E>(&self, columns: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = (K, E)>,
        K: Into<String>,
        E: Into<Expr>,
    {
        let mut targets = Vec::new();
        let mut functions = Vec::new();
        for (name, expr) in columns {
            let expr = match expr.into() {
                Expr::Function(call) => Expr::Function(call.bind_session(self)),
                other => other,
            };
            if let Some(df) = expr.dataframes().first() {
                return Err(Error::UnexpectedDataFrame(df.name().to_string()));
            }
            targets.push(format!("{} AS {}", expr.to_sql(), quote_ident(&name.into())));
            functions.extend(expr.functions());
        }
        let query = format!("SELECT {}", targets.join(", "));
        Ok(DataFrame::derived(query, Vec::new(), functions, Some(self.clone())))
    }

    /// Apply a call that reads no dataframe, e.g. `version()`.
    pub fn apply(&self, call: FunctionCall, expand: bool, as_name: Option<&str>) -> Result<DataFrame> {
        if let Some(df) = call.dataframe() {
            return Err(Error::UnexpectedDataFrame(df.name().to_string()));
        }
        call.bind_session(self).apply(expand, as_name)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.id).finish()
    }
}
