//! Per-table row id allocation.
//!
//! Child rows reference their parent's id before the parent is committed,
//! so ids are assigned here rather than read back from the store. Each
//! table's counter is seeded once from `MAX(_id)` and then advanced purely
//! in memory.

use std::collections::HashMap;

use sea_query::{Alias, Expr, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::schema::COL_ID;
use crate::error::{Result, SinkError};

/// Next-id counters keyed by table name.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: HashMap<String, i64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_seeded(&self, table: &str) -> bool {
        self.next.contains_key(table)
    }

    /// Start a table's counter after `max_id`.
    pub fn seed(&mut self, table: &str, max_id: Option<i64>) {
        self.next.insert(table.to_string(), max_id.unwrap_or(0) + 1);
    }

    /// Seed a table's counter from the store if not yet done.
    pub async fn ensure_seeded(&mut self, conn: &mut SqliteConnection, table: &str) -> Result<()> {
        if self.is_seeded(table) {
            return Ok(());
        }

        let query = Query::select()
            .expr(Expr::col(Alias::new(COL_ID)).max())
            .from(Alias::new(table))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        let max_id: Option<i64> = match row {
            Some(row) => row.try_get(0)?,
            None => None,
        };

        debug!(table, ?max_id, "Seeded row ids");
        self.seed(table, max_id);
        Ok(())
    }

    /// Reserve the next id for a table.
    pub fn allocate(&mut self, table: &str) -> Result<i64> {
        let next = self.next.get_mut(table).ok_or_else(|| {
            SinkError::Catalog(format!("row ids for table {:?} were never seeded", table))
        })?;
        let id = *next;
        *next += 1;
        Ok(id)
    }

    pub fn clear(&mut self) {
        self.next.clear();
    }
}
