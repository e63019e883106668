//! Lazily evaluated dataframes
//!
//! A [`DataFrame`] is an immutable node holding one SQL query plus the
//! dataframes that query reads from. Query-building calls return new nodes
//! and never touch the server. Iteration flattens the lineage into a single
//! `WITH ... SELECT` statement, fetches every row as JSON text and caches
//! the decoded rows on the node until [`DataFrame::refresh`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::func::{FunctionCall, FunctionDef};
use crate::group::GroupingSets;
use crate::lineage;
use crate::order::{OrderKey, Ordering};
use crate::row::{Row, Rows};
use crate::session::Session;
use crate::sql::{generated_name, quote_ident};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    /// Backed directly by a catalog table or view; never expanded as a CTE.
    Table,
    Derived,
}

struct Node {
    name: String,
    schema: Option<String>,
    query: String,
    kind: NodeKind,
    parents: Vec<DataFrame>,
    functions: Vec<Rc<dyn FunctionDef>>,
    session: Option<Session>,
    contents: RefCell<Option<Rc<Vec<Row>>>>,
}

/// Handle to one node of the query graph. Cloning is cheap and shares the node.
#[derive(Clone)]
pub struct DataFrame {
    node: Rc<Node>,
}

/// Key accepted by [`DataFrame::get`].
pub enum Selector {
    /// A single column, returned as an expression.
    Column(String),
    /// A projection onto exactly these columns.
    Columns(Vec<String>),
    /// Rows for which the predicate holds.
    Predicate(Box<dyn Fn(&DataFrame) -> Expr>),
    /// Rows `start..stop`; any `step` is rejected.
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Column(name.to_string())
    }
}

impl From<Vec<&str>> for Selector {
    fn from(names: Vec<&str>) -> Self {
        Selector::Columns(names.into_iter().map(str::to_string).collect())
    }
}

/// Result of [`DataFrame::get`].
#[derive(Debug, Clone)]
pub enum Selection {
    Column(Expr),
    DataFrame(DataFrame),
}

impl Selection {
    pub fn into_column(self) -> Option<Expr> {
        match self {
            Selection::Column(expr) => Some(expr),
            Selection::DataFrame(_) => None,
        }
    }

    pub fn into_dataframe(self) -> Option<DataFrame> {
        match self {
            Selection::DataFrame(df) => Some(df),
            Selection::Column(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
        }
    }
}

impl FromStr for JoinType {
    type Err = Error;

    /// Case-insensitive; the empty string means an inner join.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "INNER" => Ok(JoinType::Inner),
            "LEFT" => Ok(JoinType::Left),
            "RIGHT" => Ok(JoinType::Right),
            "FULL" => Ok(JoinType::Full),
            "CROSS" => Ok(JoinType::Cross),
            _ => Err(Error::UnsupportedJoinType(s.to_string())),
        }
    }
}

/// Columns taken from one side of a join, each with an optional new name.
/// The column `*` selects every column of that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelection {
    columns: Vec<(String, Option<String>)>,
}

impl ColumnSelection {
    /// Every column (`"*"`).
    pub fn all() -> Self {
        Self {
            columns: vec![("*".to_string(), None)],
        }
    }

    /// Nothing from this side.
    pub fn none() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push((name.into(), None));
        self
    }

    pub fn renamed(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.columns.push((name.into(), Some(alias.into())));
        self
    }

    /// Output names of the explicitly listed columns.
    fn output_names(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|(name, alias)| name != "*" || alias.is_some())
            .map(|(name, alias)| alias.as_deref().unwrap_or(name))
    }

    fn targets(&self, side: &DataFrame) -> Vec<String> {
        self.columns
            .iter()
            .map(|(name, alias)| {
                let column = side.col(name).to_sql();
                match alias {
                    Some(alias) => format!("{} AS {}", column, quote_ident(alias)),
                    None => column,
                }
            })
            .collect()
    }
}

impl Default for ColumnSelection {
    fn default() -> Self {
        Self::all()
    }
}

/// Arguments of [`DataFrame::join`].
#[derive(Default)]
pub struct JoinSpec {
    pub how: JoinType,
    /// Join condition over `(self, other)`.
    pub cond: Option<Box<dyn Fn(&DataFrame, &DataFrame) -> Expr>>,
    /// Shared column names, rendered as `USING (...)`.
    pub on: Vec<String>,
    pub self_columns: ColumnSelection,
    pub other_columns: ColumnSelection,
}

impl JoinSpec {
    pub fn new(how: JoinType) -> Self {
        Self {
            how,
            ..Default::default()
        }
    }

    pub fn cond(mut self, cond: impl Fn(&DataFrame, &DataFrame) -> Expr + 'static) -> Self {
        self.cond = Some(Box::new(cond));
        self
    }

    pub fn on<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn self_columns(mut self, columns: ColumnSelection) -> Self {
        self.self_columns = columns;
        self
    }

    pub fn other_columns(mut self, columns: ColumnSelection) -> Self {
        self.other_columns = columns;
        self
    }
}

/// Options of [`DataFrame::save_as_with`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub temp: bool,
    pub schema: Option<String>,
    /// Rendered as `WITH (key=value, ...)`.
    pub storage_params: Vec<(String, String)>,
}

impl DataFrame {
    fn new_node(
        name: String,
        schema: Option<String>,
        query: String,
        kind: NodeKind,
        parents: Vec<DataFrame>,
        functions: Vec<Rc<dyn FunctionDef>>,
        session: Option<Session>,
    ) -> DataFrame {
        let session = session.or_else(|| parents.iter().find_map(DataFrame::session));
        DataFrame {
            node: Rc::new(Node {
                name,
                schema,
                query,
                kind,
                parents,
                functions,
                session,
                contents: RefCell::new(None),
            }),
        }
    }

    /// A node computed by `query` from `parents`, under a generated name.
    pub(crate) fn derived(
        query: String,
        parents: Vec<DataFrame>,
        functions: Vec<Rc<dyn FunctionDef>>,
        session: Option<Session>,
    ) -> DataFrame {
        DataFrame::new_node(
            generated_name("cte"),
            None,
            query,
            NodeKind::Derived,
            parents,
            functions,
            session,
        )
    }

    /// A lineage leaf bound to an existing table or view.
    pub fn from_table(name: impl Into<String>, session: &Session) -> DataFrame {
        let name = name.into();
        let query = format!("TABLE {}", quote_ident(&name));
        DataFrame::new_node(
            name,
            None,
            query,
            NodeKind::Table,
            Vec::new(),
            Vec::new(),
            Some(session.clone()),
        )
    }

    pub fn from_table_in_schema(
        name: impl Into<String>,
        schema: impl Into<String>,
        session: &Session,
    ) -> DataFrame {
        let name = name.into();
        let schema = schema.into();
        let query = format!("TABLE {}.{}", quote_ident(&schema), quote_ident(&name));
        DataFrame::new_node(
            name,
            Some(schema),
            query,
            NodeKind::Table,
            Vec::new(),
            Vec::new(),
            Some(session.clone()),
        )
    }

    /// A constant table built from `VALUES`.
    pub fn from_rows<C, S>(session: &Session, rows: Vec<Vec<Value>>, column_names: C) -> Result<DataFrame>
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column_names: Vec<String> = column_names.into_iter().map(Into::into).collect();
        if column_names.is_empty() {
            return Err(Error::MissingColumnNames);
        }
        if rows.is_empty() {
            return Err(Error::EmptyRows);
        }
        let mut values = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != column_names.len() {
                return Err(Error::RowWidthMismatch {
                    row: i,
                    expected: column_names.len(),
                    actual: row.len(),
                });
            }
            let row: Vec<String> = row.iter().map(Value::to_sql_literal).collect();
            values.push(format!("({})", row.join(", ")));
        }
        let columns: Vec<String> = column_names.iter().map(|c| quote_ident(c)).collect();
        let query = format!(
            "SELECT * FROM (VALUES {}) AS {} ({})",
            values.join(", "),
            quote_ident(&generated_name("cte")),
            columns.join(", ")
        );
        Ok(DataFrame::derived(query, Vec::new(), Vec::new(), Some(session.clone())))
    }

    /// A constant table built column by column with `unnest`.
    pub fn from_columns<I, S>(session: &Session, columns: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        let targets: Vec<String> = columns
            .into_iter()
            .map(|(name, values)| {
                format!(
                    "unnest({}) AS {}",
                    Value::Array(values).to_sql_literal(),
                    quote_ident(&name.into())
                )
            })
            .collect();
        if targets.is_empty() {
            return Err(Error::MissingColumnNames);
        }
        let query = format!("SELECT {}", targets.join(", "));
        Ok(DataFrame::derived(query, Vec::new(), Vec::new(), Some(session.clone())))
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.node.schema.as_deref()
    }

    /// This node's own query; it refers to parents by name only.
    pub fn query(&self) -> &str {
        &self.node.query
    }

    pub fn parents(&self) -> &[DataFrame] {
        &self.node.parents
    }

    pub fn session(&self) -> Option<Session> {
        self.node.session.clone()
    }

    /// Whether the node is a catalog table rather than a derived query.
    pub fn is_table(&self) -> bool {
        self.node.kind == NodeKind::Table
    }

    /// How other queries refer to this node in a `FROM` list.
    pub fn from_clause(&self) -> String {
        match &self.node.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.node.name)),
            None => quote_ident(&self.node.name),
        }
    }

    /// The statement computing this dataframe, with its lineage as CTEs.
    pub fn full_query(&self) -> Result<String> {
        lineage::full_query(self)
    }

    pub fn col(&self, name: &str) -> Expr {
        Expr::column(self, name)
    }

    pub fn get(&self, selector: impl Into<Selector>) -> Result<Selection> {
        match selector.into() {
            Selector::Column(name) => Ok(Selection::Column(self.col(&name))),
            Selector::Columns(names) => Ok(Selection::DataFrame(self.select(names))),
            Selector::Predicate(predicate) => {
                self.filter(|df| predicate(df)).map(Selection::DataFrame)
            }
            Selector::Slice { start, stop, step } => {
                self.slice(start, stop, step).map(Selection::DataFrame)
            }
        }
    }

    /// Project onto exactly `columns`.
    pub fn select<I, S>(&self, columns: I) -> DataFrame
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets: Vec<String> = columns
            .into_iter()
            .map(|c| self.col(c.as_ref()).to_sql())
            .collect();
        let query = format!("SELECT {} FROM {}", targets.join(", "), self.from_clause());
        DataFrame::derived(query, vec![self.clone()], Vec::new(), None)
    }

    /// Rows satisfying `predicate`, which must be built on this dataframe.
    ///
    /// Dataframes read by `IN` sub-queries of the predicate become extra parents.
    pub fn filter<F>(&self, predicate: F) -> Result<DataFrame>
    where
        F: FnOnce(&DataFrame) -> Expr,
    {
        let predicate = predicate(self);
        predicate.check_based_on(self)?;
        let parents = self.with_extra_parents(&[&predicate]);
        let query = format!(
            "SELECT * FROM {} WHERE {}",
            self.from_clause(),
            predicate.to_sql()
        );
        Ok(DataFrame::derived(query, parents, predicate.functions(), None))
    }

    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<DataFrame> {
        if let Some(step) = step {
            return Err(Error::UnsupportedSliceStep(step));
        }
        let mut query = format!("SELECT * FROM {}", self.from_clause());
        if let Some(stop) = stop {
            let limit = (stop - start.unwrap_or(0)).max(0);
            query.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(start) = start {
            query.push_str(&format!(" OFFSET {}", start));
        }
        Ok(DataFrame::derived(query, vec![self.clone()], Vec::new(), None))
    }

    /// The first `n` rows in server order.
    pub fn limit(&self, n: i64) -> DataFrame {
        let query = format!("SELECT * FROM {} LIMIT {}", self.from_clause(), n);
        DataFrame::derived(query, vec![self.clone()], Vec::new(), None)
    }

    /// Add computed columns. With no columns the receiver is returned as is.
    ///
    /// Reusing an existing column name is not detected here; the duplicate
    /// surfaces when the rows are decoded.
    pub fn assign<I, K, E>(&self, columns: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = (K, E)>,
        K: Into<String>,
        E: Into<Expr>,
    {
        let columns: Vec<(String, Expr)> = columns
            .into_iter()
            .map(|(k, e)| (k.into(), e.into()))
            .collect();
        if columns.is_empty() {
            return Ok(self.clone());
        }

        let mut targets = vec!["*".to_string()];
        let mut functions = Vec::new();
        for (name, expr) in &columns {
            expr.check_based_on(self)?;
            targets.push(format!("{} AS {}", expr.to_sql(), quote_ident(name)));
            functions.extend(expr.functions());
        }
        let exprs: Vec<&Expr> = columns.iter().map(|(_, e)| e).collect();
        let parents = self.with_extra_parents(&exprs);
        let query = format!("SELECT {} FROM {}", targets.join(", "), self.from_clause());
        Ok(DataFrame::derived(query, parents, functions, None))
    }

    /// Receiver first, then every dataframe read through `IN` sub-queries.
    fn with_extra_parents(&self, exprs: &[&Expr]) -> Vec<DataFrame> {
        let mut parents = vec![self.clone()];
        for df in exprs.iter().flat_map(|e| e.other_dataframes()) {
            if !parents.iter().any(|p| p.name() == df.name()) {
                parents.push(df);
            }
        }
        parents
    }

    pub fn join(&self, other: &DataFrame, spec: JoinSpec) -> Result<DataFrame> {
        if spec.cond.is_some() && !spec.on.is_empty() {
            return Err(Error::JoinCondAndOn);
        }

        let self_join = self.name() == other.name();
        let other_side = if self_join {
            self.aliased(generated_name("cte"))
        } else {
            other.clone()
        };
        let other_clause = if self_join {
            format!("{} AS {}", other.from_clause(), quote_ident(other_side.name()))
        } else {
            other.from_clause()
        };

        let mut seen: Vec<&str> = Vec::new();
        for name in spec
            .self_columns
            .output_names()
            .chain(spec.other_columns.output_names())
        {
            if seen.contains(&name) {
                return Err(Error::DuplicateJoinColumn(name.to_string()));
            }
            seen.push(name);
        }

        let mut targets = spec.self_columns.targets(self);
        targets.extend(spec.other_columns.targets(&other_side));

        let mut query = format!(
            "SELECT {} FROM {} {} JOIN {}",
            targets.join(", "),
            self.from_clause(),
            spec.how.as_str(),
            other_clause
        );

        let mut parents = vec![self.clone()];
        if !self_join {
            parents.push(other.clone());
        }
        let mut functions = Vec::new();
        if let Some(cond) = &spec.cond {
            let cond = cond(self, &other_side);
            if let Some(found) = cond
                .dataframes()
                .into_iter()
                .find(|df| df.name() != self.name() && df.name() != other_side.name())
            {
                return Err(Error::UnrelatedDataFrames {
                    expected: format!("{}\" or \"{}", self.name(), other_side.name()),
                    found: found.name().to_string(),
                });
            }
            query.push_str(&format!(" ON {}", cond.to_sql()));
            for df in cond.other_dataframes() {
                if !parents.iter().any(|p| p.name() == df.name()) {
                    parents.push(df);
                }
            }
            functions = cond.functions();
        }
        if !spec.on.is_empty() {
            let columns: Vec<String> = spec.on.iter().map(|c| quote_ident(c)).collect();
            query.push_str(&format!(" USING ({})", columns.join(", ")));
        }

        Ok(DataFrame::derived(query, parents, functions, None))
    }

    pub fn inner_join(&self, other: &DataFrame, spec: JoinSpec) -> Result<DataFrame> {
        self.join(other, JoinSpec { how: JoinType::Inner, ..spec })
    }

    pub fn left_join(&self, other: &DataFrame, spec: JoinSpec) -> Result<DataFrame> {
        self.join(other, JoinSpec { how: JoinType::Left, ..spec })
    }

    pub fn right_join(&self, other: &DataFrame, spec: JoinSpec) -> Result<DataFrame> {
        self.join(other, JoinSpec { how: JoinType::Right, ..spec })
    }

    pub fn full_join(&self, other: &DataFrame, spec: JoinSpec) -> Result<DataFrame> {
        self.join(other, JoinSpec { how: JoinType::Full, ..spec })
    }

    /// Cartesian product with every column of both sides.
    pub fn cross_join(&self, other: &DataFrame) -> Result<DataFrame> {
        self.join(other, JoinSpec::new(JoinType::Cross))
    }

    /// Same node contents under another name, used for the right side of a
    /// self-join. Only ever referenced from expressions.
    fn aliased(&self, alias: String) -> DataFrame {
        DataFrame::new_node(
            alias,
            None,
            self.node.query.clone(),
            self.node.kind,
            self.node.parents.clone(),
            Vec::new(),
            self.session(),
        )
    }

    pub fn group_by<I, S>(&self, columns: I) -> GroupingSets
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupingSets::new(self, columns)
    }

    pub fn order_by(&self, key: impl Into<OrderKey>) -> Result<Ordering> {
        Ordering::new(self).order_by(key)
    }

    pub fn distinct_on<I, S>(&self, columns: I) -> DataFrame
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns: Vec<String> = columns
            .into_iter()
            .map(|c| self.col(c.as_ref()).to_sql())
            .collect();
        let query = format!(
            "SELECT DISTINCT ON ({}) * FROM {}",
            columns.join(", "),
            self.from_clause()
        );
        DataFrame::derived(query, vec![self.clone()], Vec::new(), None)
    }

    /// Apply the call produced by `f` to this dataframe.
    ///
    /// The call is bound to the receiver so calls without column arguments,
    /// such as `count(*)`, still read from it.
    pub fn apply<F>(&self, f: F, expand: bool, as_name: Option<&str>) -> Result<DataFrame>
    where
        F: FnOnce(&DataFrame) -> Result<FunctionCall>,
    {
        f(self)?.bind_dataframe(self)?.apply(expand, as_name)
    }

    pub fn save_as<I, S>(&self, table_name: &str, column_names: I, temp: bool) -> Result<DataFrame>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.save_as_with(
            table_name,
            column_names,
            SaveOptions {
                temp,
                ..Default::default()
            },
        )
    }

    /// Materialize the whole lineage into a new table and return a leaf
    /// dataframe bound to it. The new leaf does not keep this lineage.
    pub fn save_as_with<I, S>(
        &self,
        table_name: &str,
        column_names: I,
        options: SaveOptions,
    ) -> Result<DataFrame>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column_names: Vec<String> = column_names.into_iter().map(Into::into).collect();
        if column_names.is_empty() {
            return Err(Error::MissingColumnNames);
        }
        let session = self.session().ok_or(Error::NoDatabase)?;

        let target = match &options.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table_name)),
            None => quote_ident(table_name),
        };
        let columns: Vec<String> = column_names.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "CREATE {}TABLE {} ({})",
            if options.temp { "TEMP " } else { "" },
            target,
            columns.join(", ")
        );
        if !options.storage_params.is_empty() {
            let params: Vec<String> = options
                .storage_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            sql.push_str(&format!(" WITH ({})", params.join(", ")));
        }
        sql.push_str(&format!(" AS {}", self.full_query()?));

        self.realize_functions(&session)?;
        session.run(&sql)?;
        debug!(table = %target, "saved dataframe");

        Ok(match options.schema {
            Some(schema) => DataFrame::from_table_in_schema(table_name, schema, &session),
            None => DataFrame::from_table(table_name, &session),
        })
    }

    /// Iterate over the rows, fetching them on first use.
    pub fn iter(&self) -> Result<Rows> {
        if let Some(rows) = self.node.contents.borrow().as_ref() {
            return Ok(Rows::new(rows.clone()));
        }
        let rows = Rc::new(self.fetch()?);
        *self.node.contents.borrow_mut() = Some(rows.clone());
        Ok(Rows::new(rows))
    }

    /// Drop the cached rows and fetch them again.
    pub fn refresh(&self) -> Result<&DataFrame> {
        self.node.contents.borrow_mut().take();
        self.iter()?;
        Ok(self)
    }

    pub fn is_cached(&self) -> bool {
        self.node.contents.borrow().is_some()
    }

    /// The statement used to fetch every row as one JSON text column.
    pub fn fetch_query(&self) -> Result<String> {
        let output = quote_ident(&generated_name("cte"));
        let query = format!(
            "SELECT to_json({})::TEXT FROM {} AS {}",
            output,
            self.from_clause(),
            output
        );
        DataFrame::derived(query, vec![self.clone()], Vec::new(), self.session()).full_query()
    }

    fn fetch(&self) -> Result<Vec<Row>> {
        let session = self.session().ok_or(Error::NoDatabase)?;
        let sql = self.fetch_query()?;
        self.realize_functions(&session)?;
        let wire_rows = session.query(&sql)?;
        debug!(dataframe = %self.name(), rows = wire_rows.len(), "fetched dataframe");
        wire_rows
            .into_iter()
            .map(|row| match row.into_iter().next().flatten() {
                Some(text) => Row::from_json(&text),
                None => Err(Error::MalformedRow("empty row".to_string())),
            })
            .collect()
    }

    /// Create every server function the lineage calls.
    fn realize_functions(&self, session: &Session) -> Result<()> {
        let mut nodes = lineage::lineage(self)?;
        nodes.push(self.clone());
        for node in &nodes {
            for function in &node.node.functions {
                function.create_in(session)?;
            }
        }
        Ok(())
    }

    /// The server's plan for this dataframe, one line per row.
    pub fn explain(&self, format: &str) -> Result<Vec<String>> {
        let session = self.session().ok_or(Error::NoDatabase)?;
        let sql = format!("EXPLAIN (FORMAT {}) {}", format, self.full_query()?);
        self.realize_functions(&session)?;
        Ok(session
            .query(&sql)?
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }
}

impl fmt::Debug for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFrame")
            .field("name", &self.node.name)
            .field("query", &self.node.query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::func::{FunctionHandle, ServerFunction};
    use crate::mock::MockDatabase;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> (MockDatabase, Session) {
        let mock = MockDatabase::new();
        let session = Session::new(mock.clone(), Settings::default());
        (mock, session)
    }

    #[test]
    fn test_from_rows_query() {
        let (_, session) = setup();
        let df = session
            .from_rows(
                vec![
                    vec![Value::from(1), Value::from("a")],
                    vec![Value::from(2), Value::Null],
                ],
                ["id", "label"],
            )
            .unwrap();
        assert!(df.query().starts_with("SELECT * FROM (VALUES (1, 'a'), (2, NULL)) AS \"cte_"));
        assert!(df.query().ends_with(" (\"id\", \"label\")"));
        assert!(df.name().starts_with("cte_"));
        assert!(!df.is_table());
    }

    #[test]
    fn test_from_rows_validation() {
        let (_, session) = setup();
        assert!(matches!(
            session.from_rows(Vec::new(), ["id"]),
            Err(Error::EmptyRows)
        ));
        assert!(matches!(
            session.from_rows(vec![vec![Value::from(1)]], Vec::<String>::new()),
            Err(Error::MissingColumnNames)
        ));
        let err = session
            .from_rows(vec![vec![Value::from(1)], vec![Value::from(1), Value::from(2)]], ["id"])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RowWidthMismatch { row: 1, expected: 1, actual: 2 }
        ));
    }

    #[test]
    fn test_from_columns_query() {
        let (_, session) = setup();
        let df = session
            .from_columns(vec![
                ("a", vec![Value::from(1), Value::from(2)]),
                ("b", vec![Value::from("x"), Value::from("y")]),
            ])
            .unwrap();
        assert_eq!(
            df.query(),
            "SELECT unnest(ARRAY[1,2]) AS \"a\", unnest(ARRAY['x','y']) AS \"b\""
        );
    }

    #[test]
    fn test_from_table_is_leaf() {
        let (_, session) = setup();
        let t = session.table_in_schema("pg_class", "pg_catalog");
        assert!(t.is_table());
        assert_eq!(t.name(), "pg_class");
        assert_eq!(t.query(), "TABLE \"pg_catalog\".\"pg_class\"");
        assert_eq!(t.from_clause(), "\"pg_catalog\".\"pg_class\"");
    }

    #[test]
    fn test_get_dispatch() {
        let (_, session) = setup();
        let t = session.table("t");

        let column = t.get("id").unwrap().into_column().unwrap();
        assert_eq!(column.to_sql(), "\"t\".\"id\"");

        let projected = t.get(vec!["id", "val"]).unwrap().into_dataframe().unwrap();
        assert_eq!(projected.query(), "SELECT \"t\".\"id\", \"t\".\"val\" FROM \"t\"");
        assert_eq!(projected.parents()[0].name(), "t");

        let filtered = t
            .get(Selector::Predicate(Box::new(|t| t.col("id").gt(0))))
            .unwrap()
            .into_dataframe()
            .unwrap();
        assert_eq!(filtered.query(), "SELECT * FROM \"t\" WHERE (\"t\".\"id\" > 0)");

        let sliced = t
            .get(Selector::Slice { start: Some(2), stop: Some(5), step: None })
            .unwrap()
            .into_dataframe()
            .unwrap();
        assert_eq!(sliced.query(), "SELECT * FROM \"t\" LIMIT 3 OFFSET 2");

        let err = t
            .get(Selector::Slice { start: None, stop: Some(5), step: Some(2) })
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSliceStep(2)));
    }

    #[test]
    fn test_filter_rejects_other_dataframe() {
        let (_, session) = setup();
        let t = session.table("t");
        let u = session.table("u");
        let err = t.filter(|t| t.col("id").eq(u.col("id"))).unwrap_err();
        assert!(matches!(err, Error::UnrelatedDataFrames { .. }));
    }

    #[test]
    fn test_filter_in_sub_query_adds_parent() {
        let (_, session) = setup();
        let t = session.from_rows(vec![vec![Value::from(1)]], ["id"]).unwrap();
        let u = session.from_rows(vec![vec![Value::from(1)]], ["id"]).unwrap();
        let filtered = t.filter(|t| t.col("id").is_in(u.col("id"))).unwrap();
        let parents: Vec<&str> = filtered.parents().iter().map(|p| p.name()).collect();
        assert_eq!(parents, vec![t.name(), u.name()]);
        assert_eq!(lineage::lineage(&filtered).unwrap().len(), 2);
    }

    #[test]
    fn test_assign() {
        let (_, session) = setup();
        let t = session.table("t");

        let same = t.assign(Vec::<(String, Expr)>::new()).unwrap();
        assert_eq!(same.name(), t.name());
        assert!(Rc::ptr_eq(&same.node, &t.node));

        let abs = FunctionHandle::new(Rc::new(ServerFunction::new("abs", None, false)));
        let assigned = t
            .assign([
                ("doubled", t.col("id") * 2),
                ("magnitude", abs.call([t.col("id")]).unwrap().into()),
            ])
            .unwrap();
        assert_eq!(
            assigned.query(),
            "SELECT *, (\"t\".\"id\" * 2) AS \"doubled\", abs(\"t\".\"id\") AS \"magnitude\" FROM \"t\""
        );

        let u = session.table("u");
        assert!(t.assign([("x", u.col("id"))]).is_err());
    }

    #[test]
    fn test_assign_existing_name_fails_at_fetch() {
        let (mock, session) = setup();
        let t = session.table("t");
        let assigned = t.assign([("id", t.col("id") + 1)]).unwrap();
        mock.push_json_rows(&[r#"{"id": 1, "id": 2}"#]);
        let err = assigned.iter().unwrap_err();
        assert!(matches!(err, Error::DuplicateColumns(ref names) if names == &["id".to_string()]));
        assert!(!assigned.is_cached());
    }

    #[test]
    fn test_join_using_and_renames() {
        let (_, session) = setup();
        let t = session.table("t");
        let u = session.table("u");
        let joined = t
            .join(
                &u,
                JoinSpec::new("left".parse().unwrap())
                    .on(["id"])
                    .self_columns(ColumnSelection::all())
                    .other_columns(ColumnSelection::none().renamed("val", "u_val")),
            )
            .unwrap();
        assert_eq!(
            joined.query(),
            "SELECT \"t\".*, \"u\".\"val\" AS \"u_val\" FROM \"t\" LEFT JOIN \"u\" USING (\"id\")"
        );
        let parents: Vec<&str> = joined.parents().iter().map(|p| p.name()).collect();
        assert_eq!(parents, vec!["t", "u"]);
    }

    #[test]
    fn test_join_cond() {
        let (_, session) = setup();
        let t = session.table("t");
        let u = session.table("u");
        let joined = t
            .inner_join(&u, JoinSpec::default().cond(|a, b| a.col("id").eq(b.col("tid"))))
            .unwrap();
        assert_eq!(
            joined.query(),
            "SELECT \"t\".*, \"u\".* FROM \"t\" INNER JOIN \"u\" ON (\"t\".\"id\" = \"u\".\"tid\")"
        );
    }

    #[test]
    fn test_join_argument_errors() {
        let (_, session) = setup();
        let t = session.table("t");
        let u = session.table("u");

        let err = t
            .join(&u, JoinSpec::default().on(["id"]).cond(|a, b| a.col("id").eq(b.col("id"))))
            .unwrap_err();
        assert!(matches!(err, Error::JoinCondAndOn));

        assert!(matches!(
            "sideways".parse::<JoinType>(),
            Err(Error::UnsupportedJoinType(_))
        ));
        assert_eq!("".parse::<JoinType>().unwrap(), JoinType::Inner);

        let err = t
            .join(
                &u,
                JoinSpec::default()
                    .on(["id"])
                    .self_columns(ColumnSelection::none().column("val"))
                    .other_columns(ColumnSelection::none().column("val")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJoinColumn(ref c) if c == "val"));
    }

    #[test]
    fn test_self_join_aliases_right_side() {
        let (_, session) = setup();
        let t = session.from_rows(vec![vec![Value::from(1)]], ["id"]).unwrap();
        let joined = t
            .join(
                &t,
                JoinSpec::new(JoinType::Cross)
                    .self_columns(ColumnSelection::none().renamed("id", "a"))
                    .other_columns(ColumnSelection::none().renamed("id", "b")),
            )
            .unwrap();
        let query = joined.query();
        let quoted = format!("\"{}\"", t.name());
        assert!(query.starts_with(&format!("SELECT {}.\"id\" AS \"a\", \"cte_", quoted)));
        assert!(query.contains(&format!(" FROM {} CROSS JOIN {} AS \"cte_", quoted, quoted)));
        assert_eq!(joined.parents().len(), 1);

        let sql = joined.full_query().unwrap();
        assert_eq!(sql.matches(&format!("{} AS (", quoted)).count(), 1);
    }

    #[test]
    fn test_distinct_on() {
        let (_, session) = setup();
        let t = session.table("t");
        assert_eq!(
            t.distinct_on(["a", "b"]).query(),
            "SELECT DISTINCT ON (\"t\".\"a\", \"t\".\"b\") * FROM \"t\""
        );
    }

    #[test]
    fn test_iteration_caches_until_refresh() {
        let (mock, session) = setup();
        let t = session.table("t");
        mock.push_json_rows(&[r#"{"id": 1}"#, r#"{"id": 2}"#]);

        let first: Vec<Row> = t.iter().unwrap().collect();
        let second: Vec<Row> = t.iter().unwrap().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(mock.statements().len(), 1);
        let fetch = mock.last_statement().unwrap();
        assert!(fetch.starts_with("SELECT to_json(\"cte_"));
        assert!(fetch.contains(")::TEXT FROM \"t\" AS \"cte_"));

        let derived = t.limit(2);
        mock.push_json_rows(&[r#"{"id": 1}"#]);
        derived.iter().unwrap();
        let fetch = mock.last_statement().unwrap();
        assert!(fetch.starts_with(&format!("WITH \"{}\" AS (SELECT * FROM \"t\" LIMIT 2) SELECT to_json(", derived.name())));

        mock.push_json_rows(&[r#"{"id": 3}"#]);
        t.refresh().unwrap();
        let refreshed: Vec<Row> = t.iter().unwrap().collect();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].get("id"), Some(&json!(3)));
        assert_eq!(mock.statements().len(), 3);
    }

    #[test]
    fn test_failed_fetch_leaves_dataframe_usable() {
        let (mock, session) = setup();
        let t = session.table("t");
        mock.fail_next(crate::error::DbError::server(Some("42P01"), "relation \"t\" does not exist"));
        assert!(matches!(t.iter(), Err(Error::Database(_))));
        assert!(!t.is_cached());

        mock.push_json_rows(&[r#"{"id": 1}"#]);
        assert_eq!(t.iter().unwrap().count(), 1);
    }

    #[test]
    fn test_save_as() {
        let (mock, session) = setup();
        let df = session
            .from_rows(vec![vec![Value::from(1)], vec![Value::from(2)]], ["id"])
            .unwrap();
        let saved = df
            .save_as_with(
                "t1",
                ["id"],
                SaveOptions {
                    temp: true,
                    schema: None,
                    storage_params: vec![("appendoptimized".to_string(), "true".to_string())],
                },
            )
            .unwrap();
        assert_eq!(
            mock.last_statement().unwrap(),
            format!(
                "CREATE TEMP TABLE \"t1\" (\"id\") WITH (appendoptimized=true) AS {}",
                df.query()
            )
        );
        assert!(saved.is_table());
        assert!(saved.parents().is_empty());
        assert_eq!(saved.query(), "TABLE \"t1\"");

        assert!(matches!(
            df.save_as("t2", Vec::<String>::new(), false),
            Err(Error::MissingColumnNames)
        ));
    }

    #[test]
    fn test_explain() {
        let (mock, session) = setup();
        let t = session.table("t");
        mock.push_rows(vec![vec![Some("Seq Scan on t".to_string())]]);
        let plan = t.explain("TEXT").unwrap();
        assert_eq!(plan, vec!["Seq Scan on t"]);
        assert_eq!(mock.last_statement().unwrap(), "EXPLAIN (FORMAT TEXT) TABLE \"t\"");
    }

    #[test]
    fn test_apply_reads_only_the_receiver() {
        let (_, session) = setup();
        let t = session.table("t");
        let u = session.table("u");
        let abs = FunctionHandle::new(Rc::new(ServerFunction::new("abs", None, false)));

        let applied = t.apply(|t| abs.call([t.col("b")]), false, Some("x")).unwrap();
        assert_eq!(applied.query(), "SELECT abs(\"t\".\"b\") AS \"x\" FROM \"t\"");

        let err = t
            .apply(|_| abs.call([u.col("b")]), false, Some("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnrelatedDataFrames { ref expected, ref found } if expected == "t" && found == "u"
        ));
    }
}
