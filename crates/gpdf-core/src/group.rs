//! Grouping-sets builder

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::func::{FunctionCall, FunctionHandle};
use crate::sql::quote_ident;

/// One or more groupings of a dataframe, rendered as
/// `GROUP BY GROUPING SETS (...)`.
#[derive(Debug, Clone)]
pub struct GroupingSets {
    dataframe: DataFrame,
    sets: Vec<Vec<String>>,
}

impl GroupingSets {
    pub fn new<I, S>(dataframe: &DataFrame, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dataframe: dataframe.clone(),
            sets: vec![columns.into_iter().map(Into::into).collect()],
        }
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.dataframe
    }

    pub fn sets(&self) -> &[Vec<String>] {
        &self.sets
    }

    /// Combine with another builder over the same dataframe, so aggregates
    /// are computed for each grouping separately.
    pub fn union(&self, other: &GroupingSets) -> Result<GroupingSets> {
        if self.dataframe.name() != other.dataframe.name() {
            return Err(Error::GroupingBaseMismatch(
                self.dataframe.name().to_string(),
                other.dataframe.name().to_string(),
            ));
        }
        let mut sets = self.sets.clone();
        sets.extend(other.sets.iter().cloned());
        Ok(GroupingSets {
            dataframe: self.dataframe.clone(),
            sets,
        })
    }

    /// Every grouping column once, in first-seen order.
    pub fn flatten(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for column in self.sets.iter().flatten() {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    pub fn clause(&self) -> String {
        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|set| {
                let columns: Vec<String> = set.iter().map(|c| quote_ident(c)).collect();
                format!("({})", columns.join(", "))
            })
            .collect();
        format!("GROUP BY GROUPING SETS ({})", sets.join(", "))
    }

    /// Call `handle` once per group.
    pub fn aggregate<I, E>(&self, handle: &FunctionHandle, args: I) -> Result<FunctionCall>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        handle.call(args)?.bind_group(self)
    }

    /// Apply the call produced by `f` once per group.
    pub fn apply<F>(&self, f: F, expand: bool, as_name: Option<&str>) -> Result<DataFrame>
    where
        F: FnOnce(&DataFrame) -> Result<FunctionCall>,
    {
        f(&self.dataframe)?.bind_group(self)?.apply(expand, as_name)
    }

    /// One row per group: the grouping columns plus the named expressions.
    ///
    /// Function calls at the top of an expression are evaluated per group.
    pub fn assign<I, K, E>(&self, columns: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = (K, E)>,
        K: Into<String>,
        E: Into<Expr>,
    {
        let mut targets: Vec<String> = self.flatten().iter().map(|c| quote_ident(c)).collect();
        let mut functions = Vec::new();
        let mut parents = vec![self.dataframe.clone()];
        for (name, expr) in columns {
            let expr = match expr.into() {
                Expr::Function(call) => Expr::Function(call.bind_group(self)?),
                other => other,
            };
            expr.check_based_on(&self.dataframe)?;
            targets.push(format!("{} AS {}", expr.to_sql(), quote_ident(&name.into())));
            functions.extend(expr.functions());
            for df in expr.other_dataframes() {
                if !parents.iter().any(|p| p.name() == df.name()) {
                    parents.push(df);
                }
            }
        }
        let query = format!(
            "SELECT {} FROM {} {}",
            targets.join(", "),
            self.dataframe.from_clause(),
            self.clause()
        );
        Ok(DataFrame::derived(query, parents, functions, None))
    }
}
