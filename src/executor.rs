//! Query Execution
//!
//! Runs a validated statement on a freshly acquired connection and materializes the
//! rows into a [`TabularResult`].
//!
//! # Guarantees
//! - Only a [`SafeStatement`] can be executed
//! - The connection is released exactly once on every exit path (it is dropped at the
//!   end of the scoped block, or with the cancelled future on timeout)
//! - On timeout the engine stops the statement itself: `SQLite` interrupts it and
//!   `PostgreSQL` sends a cancel request
//! - Results are all-or-nothing: a malformed row fails the whole request
//! - Zero rows yield `{columns: [], rows: []}`

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::engine::{DatabaseEngine, EngineConnection, RowSet};
use crate::error::{InsightError, Result};
use crate::validator::SafeStatement;

/// Uniform tabular result
///
/// Every cell is text; `None` serializes as JSON `null`, never as the string `"null"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TabularResult {
    /// Build the result from a raw row set
    ///
    /// # Errors
    /// Returns `ExecutionError` if any row's width differs from the column count.
    pub fn from_row_set(row_set: RowSet) -> Result<Self> {
        if row_set.rows.is_empty() {
            return Ok(Self::default());
        }

        let width = row_set.columns.len();
        if let Some(pos) = row_set.rows.iter().position(|row| row.len() != width) {
            return Err(InsightError::execution(format!(
                "Row {pos} has {} values but the result has {width} columns",
                row_set.rows[pos].len()
            )));
        }

        Ok(Self {
            columns: row_set.columns,
            rows: row_set.rows,
        })
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Executes validated statements against one engine
#[derive(Debug)]
pub struct QueryExecutor<E> {
    engine: E,
    timeout: Duration,
}

impl<E: DatabaseEngine> QueryExecutor<E> {
    /// Create an executor; `timeout` bounds connect plus fetch
    pub const fn new(engine: E, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Execute a validated statement
    ///
    /// # Errors
    /// Returns `ExecutionError` for connection failures, database errors, malformed
    /// rows and timeouts.
    pub async fn execute(&self, statement: &SafeStatement) -> Result<TabularResult> {
        let started = Instant::now();

        let row_set = tokio::time::timeout(self.timeout, async {
            let mut conn = self.engine.connect().await?;
            let fetched = conn.fetch_all(statement.as_str()).await;
            drop(conn);
            fetched
        })
        .await
        .map_err(|_| {
            InsightError::execution(format!(
                "Query exceeded timeout of {}ms",
                self.timeout.as_millis()
            ))
        })??;

        let result = TabularResult::from_row_set(row_set)?;

        tracing::debug!(
            rows = result.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "statement executed"
        );

        Ok(result)
    }

    /// Check connectivity by acquiring and releasing one connection
    pub async fn ping(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.engine.connect()).await {
            Ok(Ok(conn)) => {
                drop(conn);
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "database ping failed");
                false
            }
            Err(_) => false,
        }
    }
}
