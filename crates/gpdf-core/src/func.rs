//! Function handles and call expressions
//!
//! A [`FunctionDef`] describes a function that exists (or will exist) on the
//! server. A [`FunctionHandle`] wraps one and produces [`FunctionCall`]
//! expression nodes; a call can also be applied directly to produce a
//! dataframe of its results.

use std::fmt;
use std::rc::Rc;

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::group::GroupingSets;
use crate::session::Session;
use crate::sql::{generated_name, quote_ident};

/// How a call to the function is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `name(args)`, evaluated row by row.
    Scalar,
    /// `name(args)`, evaluated once per group.
    Aggregate,
    /// `name(array_agg(arg), ...)`: all input rows collapsed into arrays.
    Array,
}

/// A server-side function as seen by the query builder.
pub trait FunctionDef: fmt::Debug {
    /// Name used at call sites, already quoted where necessary.
    fn qualified_name(&self) -> String;

    fn call_style(&self) -> CallStyle {
        CallStyle::Scalar
    }

    /// Number of arguments a call takes, when known.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Issue whatever DDL the function needs in `session`. Must be idempotent.
    fn create_in(&self, _session: &Session) -> Result<()> {
        Ok(())
    }
}

/// A function or aggregate that already exists on the server.
#[derive(Debug, Clone)]
pub struct ServerFunction {
    name: String,
    schema: Option<String>,
    aggregate: bool,
}

impl ServerFunction {
    pub fn new(name: impl Into<String>, schema: Option<&str>, aggregate: bool) -> Self {
        Self {
            name: name.into(),
            schema: schema.map(str::to_string),
            aggregate,
        }
    }
}

impl FunctionDef for ServerFunction {
    fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    fn call_style(&self) -> CallStyle {
        if self.aggregate {
            CallStyle::Aggregate
        } else {
            CallStyle::Scalar
        }
    }
}

/// Callable handle producing [`FunctionCall`] expressions.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    def: Rc<dyn FunctionDef>,
    session: Option<Session>,
}

impl FunctionHandle {
    pub fn new(def: Rc<dyn FunctionDef>) -> Self {
        Self { def, session: None }
    }

    /// Remember a session to fall back on when a call is applied without one.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn definition(&self) -> Rc<dyn FunctionDef> {
        self.def.clone()
    }

    pub fn qualified_name(&self) -> String {
        self.def.qualified_name()
    }

    pub fn call<I, E>(&self, args: I) -> Result<FunctionCall>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.build(args.into_iter().map(Into::into).collect(), false)
    }

    /// Call with `DISTINCT` applied to the arguments.
    pub fn distinct<I, E>(&self, args: I) -> Result<FunctionCall>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.build(args.into_iter().map(Into::into).collect(), true)
    }

    fn build(&self, args: Vec<Expr>, distinct: bool) -> Result<FunctionCall> {
        if let Some(expected) = self.def.arity() {
            if expected != args.len() {
                return Err(Error::ArityMismatch {
                    name: self.def.qualified_name(),
                    expected,
                    actual: args.len(),
                });
            }
        }

        let mut source: Option<DataFrame> = None;
        for df in args.iter().flat_map(Expr::dataframes) {
            match &source {
                None => source = Some(df),
                Some(seen) if seen.name() != df.name() => {
                    return Err(Error::ArgumentsFromManyDataFrames(
                        seen.name().to_string(),
                        df.name().to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(FunctionCall {
            def: self.def.clone(),
            args,
            distinct,
            group_by: None,
            dataframe: source,
            session: self.session.clone(),
        })
    }
}

/// A call of a server function, usable as an expression or applied on its own.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    def: Rc<dyn FunctionDef>,
    args: Vec<Expr>,
    distinct: bool,
    group_by: Option<GroupingSets>,
    dataframe: Option<DataFrame>,
    session: Option<Session>,
}

impl FunctionCall {
    pub fn definition(&self) -> Rc<dyn FunctionDef> {
        self.def.clone()
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    pub fn group_by(&self) -> Option<&GroupingSets> {
        self.group_by.as_ref()
    }

    /// The dataframe the call runs against, if any.
    pub fn dataframe(&self) -> Option<DataFrame> {
        self.dataframe.clone()
    }

    pub(crate) fn bound_dataframe(&self) -> Option<&DataFrame> {
        self.dataframe.as_ref()
    }

    /// Run the call against `dataframe`, needed when no argument names one.
    ///
    /// Fails when an argument, or an earlier binding, reads another frame.
    pub fn bind_dataframe(mut self, dataframe: &DataFrame) -> Result<Self> {
        Expr::Function(self.clone()).check_based_on(dataframe)?;
        self.dataframe = Some(dataframe.clone());
        Ok(self)
    }

    /// Evaluate the call once per group of `group`.
    pub fn bind_group(self, group: &GroupingSets) -> Result<Self> {
        let mut call = self.bind_dataframe(group.dataframe())?;
        call.group_by = Some(group.clone());
        Ok(call)
    }

    pub fn bind_session(mut self, session: &Session) -> Self {
        self.session = Some(session.clone());
        self
    }

    /// Resolve a session: explicit, then the bound dataframe's.
    pub fn session(&self) -> Result<Session> {
        self.session
            .clone()
            .or_else(|| self.dataframe.as_ref().and_then(|df| df.session()))
            .ok_or(Error::NoDatabase)
    }

    pub fn to_sql(&self) -> String {
        let grouping_columns = self
            .group_by
            .as_ref()
            .map(GroupingSets::flatten)
            .unwrap_or_default();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match (self.def.call_style(), arg) {
                (CallStyle::Array, Expr::Literal(_)) => arg.to_sql(),
                (CallStyle::Array, Expr::Column { name, .. })
                    if grouping_columns.iter().any(|g| g == name) =>
                {
                    arg.to_sql()
                }
                (CallStyle::Array, _) => format!("array_agg({})", arg.to_sql()),
                _ => arg.to_sql(),
            })
            .collect();
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        format!(
            "{}({}{})",
            self.def.qualified_name(),
            distinct,
            args.join(", ")
        )
    }

    /// Produce a dataframe holding the results of this call.
    ///
    /// With `expand`, a composite-typed result is spread into one column per
    /// field.
    pub fn apply(&self, expand: bool, as_name: Option<&str>) -> Result<DataFrame> {
        let session = self.session()?;
        let as_name = match (as_name, expand) {
            (Some(name), _) => Some(name.to_string()),
            (None, true) => Some(generated_name("func")),
            (None, false) => None,
        };

        let mut targets = vec![match &as_name {
            Some(name) => format!("{} AS {}", self.to_sql(), quote_ident(name)),
            None => self.to_sql(),
        }];
        let grouping_columns = self
            .group_by
            .as_ref()
            .map(GroupingSets::flatten)
            .unwrap_or_default();
        targets.extend(grouping_columns.iter().map(|c| quote_ident(c)));

        let mut query = format!("SELECT {}", targets.join(", "));
        if let Some(df) = &self.dataframe {
            query.push_str(&format!(" FROM {}", df.from_clause()));
        }
        if let Some(group) = &self.group_by {
            query.push(' ');
            query.push_str(&group.clause());
        }

        let parents: Vec<DataFrame> = self.dataframe.iter().cloned().collect();
        let functions = Expr::Function(self.clone()).functions();
        let result = DataFrame::derived(query, parents, functions, Some(session.clone()));
        if !expand {
            return Ok(result);
        }

        let mut targets: Vec<String> = grouping_columns.iter().map(|c| quote_ident(c)).collect();
        let expanded = as_name.as_deref().unwrap_or_default();
        targets.push(format!("({}).*", quote_ident(expanded)));
        let query = format!(
            "SELECT {} FROM {}",
            targets.join(", "),
            result.from_clause()
        );
        Ok(DataFrame::derived(query, vec![result], Vec::new(), Some(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::mock::MockDatabase;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Fixed(usize);

    impl FunctionDef for Fixed {
        fn qualified_name(&self) -> String {
            "pg_temp.fixed".to_string()
        }

        fn arity(&self) -> Option<usize> {
            Some(self.0)
        }
    }

    #[derive(Debug)]
    struct Collect;

    impl FunctionDef for Collect {
        fn qualified_name(&self) -> String {
            "pg_temp.collect".to_string()
        }

        fn call_style(&self) -> CallStyle {
            CallStyle::Array
        }
    }

    fn session() -> Session {
        Session::new(MockDatabase::new(), Settings::default())
    }

    #[test]
    fn test_call_serialization() {
        let t = DataFrame::from_table("t", &session());
        let abs = FunctionHandle::new(Rc::new(ServerFunction::new("abs", None, false)));
        let call = abs.call([t.col("a")]).unwrap();
        assert_eq!(call.to_sql(), "abs(\"t\".\"a\")");
        assert_eq!(call.dataframe().unwrap().name(), "t");

        let count = FunctionHandle::new(Rc::new(ServerFunction::new("count", None, true)));
        assert_eq!(
            count.distinct([t.col("a")]).unwrap().to_sql(),
            "count(DISTINCT \"t\".\"a\")"
        );
        assert_eq!(count.call([Expr::Wildcard]).unwrap().to_sql(), "count(*)");
    }

    #[test]
    fn test_arity_checked() {
        let f = FunctionHandle::new(Rc::new(Fixed(2)));
        let err = f.call([1]).unwrap_err();
        assert!(matches!(
            err,
            Error::ArityMismatch { expected: 2, actual: 1, .. }
        ));
        assert!(f.call([1, 2]).is_ok());
    }

    #[test]
    fn test_arguments_from_two_dataframes_rejected() {
        let s = session();
        let t = DataFrame::from_table("t", &s);
        let u = DataFrame::from_table("u", &s);
        let f = FunctionHandle::new(Rc::new(Fixed(2)));
        let err = f.call([t.col("a"), u.col("b")]).unwrap_err();
        assert!(matches!(err, Error::ArgumentsFromManyDataFrames(ref a, ref b) if a == "t" && b == "u"));
    }

    #[test]
    fn test_array_call_wraps_non_grouping_arguments() {
        let t = DataFrame::from_table("t", &session());
        let collect = FunctionHandle::new(Rc::new(Collect));
        let call = collect
            .call([t.col("label"), t.col("val"), Expr::lit(3)])
            .unwrap();
        assert_eq!(
            call.to_sql(),
            "pg_temp.collect(array_agg(\"t\".\"label\"), array_agg(\"t\".\"val\"), 3)"
        );

        let grouped = call.bind_group(&t.group_by(["label"])).unwrap();
        assert_eq!(
            grouped.to_sql(),
            "pg_temp.collect(\"t\".\"label\", array_agg(\"t\".\"val\"), 3)"
        );
    }

    #[test]
    fn test_bind_rejects_arguments_from_another_frame() {
        let t = DataFrame::from_table("t", &session());
        let u = DataFrame::from_table("u", &session());
        let collect = FunctionHandle::new(Rc::new(Collect));

        let err = collect.call([u.col("val")]).unwrap().bind_dataframe(&t).unwrap_err();
        assert!(matches!(
            err,
            Error::UnrelatedDataFrames { ref expected, ref found } if expected == "t" && found == "u"
        ));

        let bound = collect.call(Vec::<Expr>::new()).unwrap().bind_dataframe(&u).unwrap();
        assert!(bound.clone().bind_group(&t.group_by(["label"])).is_err());
        assert!(bound.bind_dataframe(&u).is_ok());
    }

    #[test]
    fn test_apply_without_session_fails() {
        let f = FunctionHandle::new(Rc::new(ServerFunction::new("version", None, false)));
        let err = f.call(Vec::<Expr>::new()).unwrap().apply(false, None).unwrap_err();
        assert!(matches!(err, Error::NoDatabase));
    }

    #[test]
    fn test_apply_with_expand() {
        let t = DataFrame::from_table("t", &session());
        let f = FunctionHandle::new(Rc::new(ServerFunction::new("make_pair", None, false)));
        let result = f
            .call([t.col("val")])
            .unwrap()
            .apply(true, Some("pair"))
            .unwrap();
        let parent = &result.parents()[0];
        assert_eq!(
            parent.query(),
            "SELECT make_pair(\"t\".\"val\") AS \"pair\" FROM \"t\""
        );
        assert_eq!(
            result.query(),
            format!("SELECT (\"pair\").* FROM \"{}\"", parent.name())
        );
    }
}
