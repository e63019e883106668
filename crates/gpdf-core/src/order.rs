//! Ordering builder

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};

/// One ordering key. `ascending` and `operator` exclude each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub ascending: Option<bool>,
    pub nulls_first: Option<bool>,
    pub operator: Option<String>,
}

impl OrderKey {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: None,
            nulls_first: None,
            operator: None,
        }
    }

    pub fn asc(self) -> Self {
        self.ascending(true)
    }

    pub fn desc(self) -> Self {
        self.ascending(false)
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = Some(ascending);
        self
    }

    pub fn nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = Some(nulls_first);
        self
    }

    /// Order with a sort operator, e.g. `USING >`.
    pub fn using(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    fn to_sql(&self, dataframe: &DataFrame) -> String {
        let mut parts = vec![dataframe.col(&self.column).to_sql()];
        match self.ascending {
            Some(true) => parts.push("ASC".to_string()),
            Some(false) => parts.push("DESC".to_string()),
            None => {}
        }
        if let Some(operator) = &self.operator {
            parts.push(format!("USING {}", operator));
        }
        match self.nulls_first {
            Some(true) => parts.push("NULLS FIRST".to_string()),
            Some(false) => parts.push("NULLS LAST".to_string()),
            None => {}
        }
        parts.join(" ")
    }
}

impl From<&str> for OrderKey {
    fn from(column: &str) -> Self {
        OrderKey::new(column)
    }
}

impl From<String> for OrderKey {
    fn from(column: String) -> Self {
        OrderKey::new(column)
    }
}

/// Ordering of a dataframe, refined key by key.
#[derive(Debug, Clone)]
pub struct Ordering {
    dataframe: DataFrame,
    keys: Vec<OrderKey>,
}

impl Ordering {
    pub(crate) fn new(dataframe: &DataFrame) -> Self {
        Self {
            dataframe: dataframe.clone(),
            keys: Vec::new(),
        }
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.dataframe
    }

    pub fn keys(&self) -> &[OrderKey] {
        &self.keys
    }

    /// Add a key that breaks ties left by the previous ones.
    pub fn order_by(mut self, key: impl Into<OrderKey>) -> Result<Ordering> {
        let key = key.into();
        if key.ascending.is_some() && key.operator.is_some() {
            return Err(Error::AscendingWithOperator(key.column));
        }
        self.keys.push(key);
        Ok(self)
    }

    pub fn clause(&self) -> String {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|key| key.to_sql(&self.dataframe))
            .collect();
        format!("ORDER BY {}", keys.join(", "))
    }

    /// The first `n` rows in this order.
    pub fn head(&self, n: usize) -> DataFrame {
        self.slice(None, Some(n))
    }

    /// Rows `start..stop` in this order; no `stop` means `LIMIT ALL`.
    pub fn slice(&self, start: Option<usize>, stop: Option<usize>) -> DataFrame {
        let limit = match stop {
            Some(stop) => stop.saturating_sub(start.unwrap_or(0)).to_string(),
            None => "ALL".to_string(),
        };
        let mut query = format!(
            "SELECT * FROM {} {} LIMIT {}",
            self.dataframe.from_clause(),
            self.clause(),
            limit
        );
        if let Some(start) = start {
            query.push_str(&format!(" OFFSET {}", start));
        }
        DataFrame::derived(query, vec![self.dataframe.clone()], Vec::new(), None)
    }
}
