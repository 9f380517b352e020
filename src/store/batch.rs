//! Batched write engine.
//!
//! Statements are queued in arrival order, with consecutive statements of
//! the same SQL template grouped into one run, and executed together inside
//! one transaction once the number of pending statements reaches the
//! threshold. A threshold of zero means autocommit: every statement runs
//! immediately.

use sea_query::Values;
use sea_query_binder::SqlxValues;
use sqlx::{Connection, SqliteConnection};
use tracing::debug;

use crate::error::Result;

/// A parameterized statement.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub values: Values,
}

impl Statement {
    pub fn new(sql: impl Into<String>, values: Values) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}

impl From<(String, SqlxValues)> for Statement {
    fn from((sql, values): (String, SqlxValues)) -> Self {
        Self::new(sql, values.0)
    }
}

/// Pending statements as runs of one template, in enqueue order.
///
/// Runs never reorder statements: a link update queued after its row
/// insert always executes after it.
#[derive(Debug)]
pub struct BatchWriter {
    threshold: usize,
    runs: Vec<(String, Vec<Values>)>,
    pending: usize,
}

impl BatchWriter {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            runs: Vec::new(),
            pending: 0,
        }
    }

    pub fn is_autocommit(&self) -> bool {
        self.threshold == 0
    }

    /// Statements queued and not yet executed.
    pub fn pending_rows(&self) -> usize {
        self.pending
    }

    /// Queue a statement, or execute it right away in autocommit mode.
    pub async fn enqueue(&mut self, conn: &mut SqliteConnection, statement: Statement) -> Result<()> {
        if self.is_autocommit() {
            execute(conn, &statement.sql, statement.values).await?;
            return Ok(());
        }

        match self.runs.last_mut() {
            Some((sql, rows)) if *sql == statement.sql => rows.push(statement.values),
            _ => self.runs.push((statement.sql, vec![statement.values])),
        }
        self.pending += 1;
        Ok(())
    }

    /// Flush if the pending count reached the threshold. Returns whether it did.
    pub async fn maybe_flush(&mut self, conn: &mut SqliteConnection) -> Result<bool> {
        if self.is_autocommit() || self.pending < self.threshold {
            return Ok(false);
        }
        self.flush_all(conn).await?;
        Ok(true)
    }

    /// Execute every queued statement in one transaction.
    ///
    /// The queue is emptied before executing; a failed batch is dropped,
    /// not retried. Returns the number of statements executed.
    pub async fn flush_all(&mut self, conn: &mut SqliteConnection) -> Result<usize> {
        if self.pending == 0 {
            return Ok(0);
        }

        let runs = std::mem::take(&mut self.runs);
        let count = std::mem::take(&mut self.pending);

        let mut tx = conn.begin().await?;
        for (sql, rows) in runs {
            for values in rows {
                execute(&mut *tx, &sql, values).await?;
            }
        }
        tx.commit().await?;

        debug!(statements = count, "Committed batch");
        Ok(count)
    }

    /// Drop every queued statement without executing it.
    pub fn discard(&mut self) -> usize {
        self.runs.clear();
        std::mem::take(&mut self.pending)
    }
}

async fn execute(conn: &mut SqliteConnection, sql: &str, values: Values) -> Result<()> {
    sqlx::query_with(sql, SqlxValues(values))
        .execute(&mut *conn)
        .await?;
    Ok(())
}
