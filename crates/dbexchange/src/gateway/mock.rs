//! Scripted gateway for exercising the export/import walks without a
//! database. Expectations are consumed in order; a statement that does not
//! match the next expected pattern fails the test immediately.

use std::collections::VecDeque;

use crate::core::Value;
use crate::error::{ExchangeError, Result};

use super::{Gateway, SqlRow};

pub struct Call {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

struct Expectation {
    pattern: String,
    outcome: std::result::Result<Vec<SqlRow>, String>,
}

#[derive(Default)]
pub struct MockGateway {
    expectations: VecDeque<Expectation>,
    pub calls: Vec<Call>,
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the next statement to contain `pattern` and answer with `rows`.
    pub fn expect(&mut self, pattern: &str, rows: Vec<SqlRow>) -> &mut Self {
        self.expectations.push_back(Expectation {
            pattern: pattern.to_string(),
            outcome: Ok(rows),
        });
        self
    }

    /// Expect the next statement to contain `pattern` and fail with a
    /// wrapped driver error.
    pub fn expect_error(&mut self, pattern: &str, message: &str) -> &mut Self {
        self.expectations.push_back(Expectation {
            pattern: pattern.to_string(),
            outcome: Err(message.to_string()),
        });
        self
    }

    /// Assert every scripted expectation was consumed.
    pub fn verify_done(&self) {
        assert!(
            self.expectations.is_empty(),
            "{} scripted statements were never issued",
            self.expectations.len()
        );
    }

    pub fn executed(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.sql.as_str()).collect()
    }
}

impl Gateway for MockGateway {
    fn execute(&mut self, sql: &str, params: &[(&str, Value)]) -> Result<Vec<SqlRow>> {
        self.calls.push(Call {
            sql: sql.to_string(),
            params: params
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        });
        let expectation = self
            .expectations
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected statement: {}", sql));
        assert!(
            sql.contains(&expectation.pattern),
            "statement {:?} does not match expected pattern {:?}",
            sql,
            expectation.pattern
        );
        match expectation.outcome {
            Ok(rows) => Ok(rows),
            Err(message) => Err(ExchangeError::db(message, sql.to_string(), "")),
        }
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.begun += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.committed += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.rolled_back += 1;
        Ok(())
    }
}

/// Build a result row from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> SqlRow {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}
