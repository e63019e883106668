//! Decoding fetched rows
//!
//! Each fetched row arrives as the JSON text of `to_json(<row>)`. Decoding
//! keeps the column order and refuses rows that carry the same column name
//! twice, which happens when `SELECT *` style composition collides.

use std::fmt;
use std::rc::Rc;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// One decoded record: an ordered mapping from column name to value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Map<String, JsonValue>,
}

impl Row {
    /// Decode the JSON text of one whole row.
    pub fn from_json(text: &str) -> Result<Row> {
        let mut deserializer = serde_json::Deserializer::from_str(text);
        let pairs = deserializer.deserialize_any(PairsVisitor)?;
        deserializer.end()?;
        let pairs = pairs.ok_or_else(|| Error::MalformedRow(text.to_string()))?;

        let mut duplicates: Vec<String> = Vec::new();
        let mut columns = Map::new();
        for (name, value) in pairs {
            if columns.contains_key(&name) {
                if !duplicates.contains(&name) {
                    duplicates.push(name);
                }
                continue;
            }
            columns.insert(name, value);
        }
        if !duplicates.is_empty() {
            return Err(Error::DuplicateColumns(duplicates));
        }
        Ok(Row { columns })
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &JsonValue> {
        self.columns.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self
            .columns
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect();
        write!(f, "{{{}}}", cells.join(", "))
    }
}

/// Collects object members as ordered pairs; any non-object yields `None`.
struct PairsVisitor;

impl<'de> Visitor<'de> for PairsVisitor {
    type Value = Option<Vec<(String, JsonValue)>>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object holding one row")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, JsonValue>()? {
            pairs.push((key, value));
        }
        Ok(Some(pairs))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(None)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }
}

/// Iterator over a dataframe's cached rows.
#[derive(Debug, Clone)]
pub struct Rows {
    rows: Rc<Vec<Row>>,
    position: usize,
}

impl Rows {
    pub(crate) fn new(rows: Rc<Vec<Row>>) -> Self {
        Self { rows, position: 0 }
    }

    /// Total number of rows, consumed or not.
    pub fn total(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let row = self.rows.get(self.position)?.clone();
        self.position += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rows.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rows {}
