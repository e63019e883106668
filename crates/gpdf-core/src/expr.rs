//! Expression algebra
//!
//! Expressions are trees of columns, constants, operators and function calls.
//! Every node renders itself to a SQL fragment with [`Expr::to_sql`]; binary
//! expressions are always parenthesized so operator precedence never depends
//! on the surrounding text.

use std::fmt;
use std::ops;
use std::rc::Rc;

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};
use crate::func::{FunctionCall, FunctionDef};
use crate::sql::quote_ident;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Abs,
    Plus,
    Minus,
}

impl UnaryOp {
    /// Parse an operator symbol; only `NOT`, `ABS`, `+` and `-` are accepted.
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim().to_ascii_uppercase().as_str() {
            "NOT" => Ok(UnaryOp::Not),
            "ABS" => Ok(UnaryOp::Abs),
            "+" => Ok(UnaryOp::Plus),
            "-" => Ok(UnaryOp::Minus),
            _ => Err(Error::UnsupportedUnaryOperator(op.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Abs => "ABS",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
    Is,
    IsNot,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// A server operator addressed by name, rendered as `OPERATOR(name)`.
    Operator(String),
}

impl BinaryOp {
    pub fn to_sql(&self) -> String {
        let op = match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Like => "LIKE",
            BinaryOp::Is => "IS",
            BinaryOp::IsNot => "IS NOT",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Operator(name) => return format!("OPERATOR({})", name),
        };
        op.to_string()
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// `"df"."name"`, or `"df".*` when `name` is `*`.
    Column { dataframe: DataFrame, name: String },
    /// A field of a composite-typed column.
    Field { column: Box<Expr>, field: String },
    Literal(Value),
    /// Bare `*`, as in `count(*)`.
    Wildcard,
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Function(FunctionCall),
    Cast { expr: Box<Expr>, type_name: String },
    /// `item = ANY(container)`; a container bound to another dataframe is
    /// rendered as a sub-query over it.
    In { item: Box<Expr>, container: Box<Expr> },
}

impl Expr {
    pub fn column(dataframe: &DataFrame, name: impl Into<String>) -> Expr {
        Expr::Column {
            dataframe: dataframe.clone(),
            name: name.into(),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn null() -> Expr {
        Expr::Literal(Value::Null)
    }

    pub fn unary(op: &str, operand: impl Into<Expr>) -> Result<Expr> {
        Ok(Expr::Unary {
            op: UnaryOp::parse(op)?,
            operand: Box::new(operand.into()),
        })
    }

    pub fn binary(op: BinaryOp, left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        }
    }

    /// Equality; comparing against NULL becomes `IS`.
    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        let other = other.into();
        let op = if other.is_null() {
            BinaryOp::Is
        } else {
            BinaryOp::Eq
        };
        Expr::binary(op, self, other)
    }

    /// Inequality; comparing against NULL becomes `IS NOT`.
    pub fn ne(self, other: impl Into<Expr>) -> Expr {
        let other = other.into();
        let op = if other.is_null() {
            BinaryOp::IsNot
        } else {
            BinaryOp::Ne
        };
        Expr::binary(op, self, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Le, self, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Ge, self, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn is(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Is, self, other)
    }

    pub fn is_not(self, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::IsNot, self, other)
    }

    /// `LIKE` against a pattern. A text pattern has every `%` escaped, so it
    /// matches literally.
    pub fn like(self, pattern: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Like, self, pattern)
    }

    /// Apply a named server operator, e.g. `operator("pg_catalog.<")`.
    pub fn operator(self, name: impl Into<String>, other: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Operator(name.into()), self, other)
    }

    pub fn abs(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Abs,
            operand: Box::new(self),
        }
    }

    /// Membership test against a literal list or a column of another dataframe.
    pub fn is_in(self, container: impl Into<Expr>) -> Expr {
        Expr::In {
            item: Box::new(self),
            container: Box::new(container.into()),
        }
    }

    /// Access a field of a composite-typed column.
    pub fn field(self, name: impl Into<String>) -> Expr {
        Expr::Field {
            column: Box::new(self),
            field: name.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }

    /// Name of the column this expression refers to, if it is a bare column.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Expr::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The owning dataframe: the first operand's, else the second's.
    pub fn dataframe(&self) -> Option<DataFrame> {
        match self {
            Expr::Column { dataframe, .. } => Some(dataframe.clone()),
            Expr::Field { column, .. } => column.dataframe(),
            Expr::Literal(_) | Expr::Wildcard => None,
            Expr::Unary { operand, .. } => operand.dataframe(),
            Expr::Binary { left, right, .. } => left.dataframe().or_else(|| right.dataframe()),
            Expr::Function(call) => call.dataframe(),
            Expr::Cast { expr, .. } => expr.dataframe(),
            Expr::In { item, .. } => item.dataframe(),
        }
    }

    /// Every dataframe the expression reads row-wise, in first-seen order.
    ///
    /// Containers of `IN` tests are excluded; see [`Expr::other_dataframes`].
    pub fn dataframes(&self) -> Vec<DataFrame> {
        let mut found = Vec::new();
        self.collect_dataframes(&mut found, false);
        found
    }

    /// Dataframes read through `IN` sub-queries.
    pub fn other_dataframes(&self) -> Vec<DataFrame> {
        let mut found = Vec::new();
        self.collect_dataframes(&mut found, true);
        found
    }

    fn collect_dataframes(&self, found: &mut Vec<DataFrame>, containers: bool) {
        match self {
            Expr::Column { dataframe, .. } => {
                if !containers {
                    push_unique(found, dataframe)
                }
            }
            Expr::Field { column, .. } => column.collect_dataframes(found, containers),
            Expr::Literal(_) | Expr::Wildcard => {}
            Expr::Unary { operand, .. } => operand.collect_dataframes(found, containers),
            Expr::Binary { left, right, .. } => {
                left.collect_dataframes(found, containers);
                right.collect_dataframes(found, containers);
            }
            Expr::Function(call) => {
                if let Some(df) = call.bound_dataframe() {
                    if !containers {
                        push_unique(found, df);
                    }
                }
                for arg in call.args() {
                    arg.collect_dataframes(found, containers);
                }
            }
            Expr::Cast { expr, .. } => expr.collect_dataframes(found, containers),
            Expr::In { item, container } => {
                item.collect_dataframes(found, containers);
                if containers {
                    container.collect_dataframes(found, false);
                }
            }
        }
    }

    /// Check that every frame this expression reads row-wise is `base`.
    pub fn check_based_on(&self, base: &DataFrame) -> Result<()> {
        match self.dataframes().into_iter().find(|df| df.name() != base.name()) {
            Some(found) => Err(Error::UnrelatedDataFrames {
                expected: base.name().to_string(),
                found: found.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Functions that must exist on the server before this expression runs.
    pub fn functions(&self) -> Vec<Rc<dyn FunctionDef>> {
        let mut found = Vec::new();
        self.collect_functions(&mut found);
        found
    }

    fn collect_functions(&self, found: &mut Vec<Rc<dyn FunctionDef>>) {
        match self {
            Expr::Field { column, .. } => column.collect_functions(found),
            Expr::Unary { operand, .. } => operand.collect_functions(found),
            Expr::Binary { left, right, .. } => {
                left.collect_functions(found);
                right.collect_functions(found);
            }
            Expr::Function(call) => {
                let def = call.definition();
                if !found.iter().any(|f| Rc::ptr_eq(f, &def)) {
                    found.push(def);
                }
                for arg in call.args() {
                    arg.collect_functions(found);
                }
            }
            Expr::Cast { expr, .. } => expr.collect_functions(found),
            Expr::In { item, container } => {
                item.collect_functions(found);
                container.collect_functions(found);
            }
            Expr::Column { .. } | Expr::Literal(_) | Expr::Wildcard => {}
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Expr::Column { dataframe, name } if name == "*" => {
                format!("{}.*", quote_ident(dataframe.name()))
            }
            Expr::Column { dataframe, name } => {
                format!("{}.{}", quote_ident(dataframe.name()), quote_ident(name))
            }
            Expr::Field { column, field } => {
                format!("({}).{}", column.to_sql(), quote_ident(field))
            }
            Expr::Literal(value) => value.to_sql_literal(),
            Expr::Wildcard => "*".to_string(),
            Expr::Unary { op, operand } => format!("{}({})", op.as_str(), operand.to_sql()),
            Expr::Binary { op, left, right } => {
                let right = match (op, right.as_ref()) {
                    (BinaryOp::Like, Expr::Literal(Value::Text(pattern))) => {
                        Value::Text(pattern.replace('%', "\\%")).to_sql_literal()
                    }
                    _ => right.to_sql(),
                };
                format!("({} {} {})", left.to_sql(), op.to_sql(), right)
            }
            Expr::Function(call) => call.to_sql(),
            Expr::Cast { expr, type_name } => format!("({}::{})", expr.to_sql(), type_name),
            Expr::In { item, container } => {
                let container_sql = match container.dataframe() {
                    Some(other) => {
                        format!("SELECT {} FROM {}", container.to_sql(), other.from_clause())
                    }
                    None => container.to_sql(),
                };
                format!("({} = ANY({}))", item.to_sql(), container_sql)
            }
        }
    }
}

fn push_unique(found: &mut Vec<DataFrame>, df: &DataFrame) {
    if !found.iter().any(|f| f.name() == df.name()) {
        found.push(df.clone());
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<FunctionCall> for Expr {
    fn from(call: FunctionCall) -> Self {
        Expr::Function(call)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

macro_rules! literal_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expr {
                fn from(v: $t) -> Self {
                    Expr::Literal(Value::from(v))
                }
            }
        )*
    };
}

literal_from!(bool, i32, i64, f64, &str, String);

impl<T: Into<Value>> From<Vec<T>> for Expr {
    fn from(items: Vec<T>) -> Self {
        Expr::Literal(Value::from(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Expr {
    fn from(v: Option<T>) -> Self {
        Expr::Literal(Value::from(v))
    }
}

macro_rules! binary_op_trait {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> ops::$trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

binary_op_trait!(Add, add, BinaryOp::Add);
binary_op_trait!(Sub, sub, BinaryOp::Sub);
binary_op_trait!(Mul, mul, BinaryOp::Mul);
binary_op_trait!(Div, div, BinaryOp::Div);
binary_op_trait!(Rem, rem, BinaryOp::Mod);
binary_op_trait!(BitAnd, bitand, BinaryOp::And);
binary_op_trait!(BitOr, bitor, BinaryOp::Or);

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Minus,
            operand: Box::new(self),
        }
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}
