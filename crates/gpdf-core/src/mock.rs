//! Recording database collaborator for tests
//!
//! Every statement is recorded; statements that expect rows pop the next
//! queued result set (or get an empty one).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::DbError;
use crate::session::{Database, WireRow};
use crate::value::Value;

#[derive(Default)]
struct MockState {
    statements: Vec<String>,
    results: VecDeque<Vec<WireRow>>,
    failures: VecDeque<DbError>,
    closed: bool,
}

/// Cloning shares the recorded state, so a test can keep a handle after
/// moving one into a [`Session`](crate::Session).
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Rc<RefCell<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result set for the next statement that expects rows.
    pub fn push_rows(&self, rows: Vec<WireRow>) {
        self.state.borrow_mut().results.push_back(rows);
    }

    /// Queue a result set of single-column JSON text rows.
    pub fn push_json_rows(&self, rows: &[&str]) {
        self.push_rows(rows.iter().map(|r| vec![Some(r.to_string())]).collect());
    }

    /// Make the next statement fail with `err`.
    pub fn fail_next(&self, err: DbError) {
        self.state.borrow_mut().failures.push_back(err);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn last_statement(&self) -> Option<String> {
        self.state.borrow().statements.last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Database for MockDatabase {
    fn execute(
        &self,
        sql: &str,
        _args: &[Value],
        has_results: bool,
    ) -> Result<Option<Vec<WireRow>>, DbError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(DbError::Closed);
        }
        state.statements.push(sql.to_string());
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if has_results {
            Ok(Some(state.results.pop_front().unwrap_or_default()))
        } else {
            Ok(None)
        }
    }

    fn close(&self) -> Result<(), DbError> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}
