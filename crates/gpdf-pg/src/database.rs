//! `Database` collaborator backed by the synchronous `postgres` driver

use std::cell::RefCell;

use gpdf_core::{Database, DbError, Value, WireRow};
use postgres::types::ToSql;
use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;

/// A single blocking connection to a PostgreSQL or Greenplum server.
///
/// Statements without parameters go through the simple query protocol so
/// every column arrives as text. Parameterized statements use the extended
/// protocol and require text-compatible result columns.
pub struct PgDatabase {
    client: RefCell<Option<Client>>,
}

impl PgDatabase {
    /// Connect with a libpq-style string, e.g. `host=localhost user=gpadmin`
    /// or `postgresql://gpadmin@localhost/postgres`.
    pub fn connect(params: &str) -> Result<Self, DbError> {
        let client = Client::connect(params, NoTls).map_err(into_db_error)?;
        debug!("connected to database");
        Ok(Self::from_client(client))
    }

    pub fn connect_with(config: &ConnectionConfig) -> Result<Self, DbError> {
        let client = config.to_pg_config().connect(NoTls).map_err(into_db_error)?;
        debug!(host = %config.host, port = config.port, dbname = %config.dbname, "connected to database");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: RefCell::new(Some(client)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.borrow().is_none()
    }
}

impl Database for PgDatabase {
    fn execute(&self, sql: &str, args: &[Value], has_results: bool) -> Result<Option<Vec<WireRow>>, DbError> {
        let mut guard = self.client.borrow_mut();
        let client = guard.as_mut().ok_or(DbError::Closed)?;

        if args.is_empty() {
            if !has_results {
                client.batch_execute(sql).map_err(into_db_error)?;
                return Ok(None);
            }
            let messages = client.simple_query(sql).map_err(into_db_error)?;
            let rows = messages
                .into_iter()
                .filter_map(|message| match message {
                    SimpleQueryMessage::Row(row) => {
                        Some((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect())
                    }
                    _ => None,
                })
                .collect();
            return Ok(Some(rows));
        }

        let params = args
            .iter()
            .map(to_param)
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| &**p).collect();
        if !has_results {
            client.execute(sql, &refs).map_err(into_db_error)?;
            return Ok(None);
        }
        let rows = client.query(sql, &refs).map_err(into_db_error)?;
        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                let value: Option<String> = row
                    .try_get(i)
                    .map_err(|e| DbError::UnsupportedParameter(format!("column {}: {}", i, e)))?;
                values.push(value);
            }
            decoded.push(values);
        }
        Ok(Some(decoded))
    }

    fn close(&self) -> Result<(), DbError> {
        match self.client.borrow_mut().take() {
            Some(client) => client.close().map_err(into_db_error),
            None => {
                warn!("close called on a closed connection");
                Ok(())
            }
        }
    }
}

fn to_param(value: &Value) -> Result<Box<dyn ToSql + Sync>, DbError> {
    Ok(match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Array(_) => {
            return Err(DbError::UnsupportedParameter(
                "array parameters must be inlined as literals".to_string(),
            ))
        }
    })
}

/// Keep the server's SQLSTATE and message as they were reported.
pub fn into_db_error(err: postgres::Error) -> DbError {
    match err.as_db_error() {
        Some(db_error) => DbError::server(Some(db_error.code().code()), db_error.message()),
        None if err.is_closed() => DbError::Closed,
        None => DbError::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_parameters_are_accepted() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(7),
            Value::Float(1.5),
            Value::Text("x".to_string()),
            Value::Bytes(vec![1, 2]),
        ] {
            assert!(to_param(&value).is_ok());
        }
    }

    #[test]
    fn test_array_parameter_is_rejected() {
        let err = to_param(&Value::Array(vec![Value::Int(1)])).err();
        assert!(matches!(err, Some(DbError::UnsupportedParameter(_))));
    }
}
