//! Backfiller: walks a table in batches, touching every row so
//! its BEFORE triggers populate shadow columns for rows written before the
//! migration started.
//!
//! Algorithm per batch:
//!   1. Select up to `batch_size` rows ordered by the identity columns,
//!      starting strictly after the last-seen identity tuple, locked
//!      `FOR NO KEY UPDATE` so the batch can't disappear under us without
//!      blocking foreign-key-only writers.
//!   2. `UPDATE` those rows by their primary key/identity, setting no real
//!      column (the write itself is what fires the `down`/`up` triggers
//!      that populate the shadow columns) — matching the "no-op column
//!      touch" pattern that drives this style of backfill. The same
//!      statement clears `naming::NEEDS_BACKFILL_COLUMN` for each row
//!      touched, so the sentinel the caller added before starting the
//!      backfill accurately tracks which rows still await their first pass.
//!   3. Remember the last row's identity tuple as the next batch's cursor.
//!   4. Sleep `batch_delay` between batches to bound the write amplification
//!      imposed on a live table.
//!
//! The identity comparison is built with bound parameters
//! (`$1, $2, ... > ...`) rather than string-interpolated literals, so it
//! works uniformly across integer, UUID, and text identity columns without
//! either SQL injection risk or type-coercion surprises.

use std::cmp::min;
use std::time::Duration;

use rand::Rng;
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;

use crate::db::Connection;
use crate::error::{is_transient_error, EngineError, Result};
use crate::ident::quote_ident;
use crate::naming;

pub struct BackfillTask<'a> {
    pub table: &'a str,
    pub identity_columns: &'a [String],
    /// Any other column; touched in the `SET` clause as a no-op
    /// (`col = col`) so the UPDATE is well-formed even though the real
    /// effect is triggered by firing the row's BEFORE triggers.
    pub touch_column: &'a str,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BackfillTask<'_> {
    fn default() -> Self {
        BackfillTask {
            table: "",
            identity_columns: &[],
            touch_column: "",
            batch_size: 1000,
            batch_delay: Duration::from_millis(0),
        }
    }
}

/// Progress reported after each batch: rows touched so far and an estimate
/// of the table's total row count.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub rows_done: u64,
    pub estimated_total: u64,
}

impl<'a> BackfillTask<'a> {
    pub async fn run(
        &self,
        db: &mut dyn Connection,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<()> {
        if self.identity_columns.is_empty() {
            return Err(EngineError::BackfillNotPossible(self.table.to_string()));
        }

        let estimated_total = self.estimate_row_count(db).await?;
        let mut rows_done: u64 = 0;
        let mut last_row: Option<Vec<CursorValue>> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let touched = self.run_batch(db, last_row.as_deref()).await?;
            match touched {
                None => break,
                Some((count, new_cursor)) => {
                    rows_done += count;
                    last_row = Some(new_cursor);
                    on_progress(Progress {
                        rows_done,
                        estimated_total,
                    });
                }
            }

            if !self.batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch_delay) => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
        }

        Ok(())
    }

    /// Runs one batch's SELECT + UPDATE inside a single transaction,
    /// retrying the whole transaction from scratch on a transient error
    /// (serialization failure, deadlock) — the `FOR NO KEY UPDATE` lock the
    /// SELECT takes is only held for as long as the transaction is open, so
    /// splitting the two statements across separate autocommit statements
    /// would release it before the UPDATE runs and make the batch
    /// non-atomic.
    async fn run_batch(
        &self,
        db: &mut dyn Connection,
        cursor: Option<&[CursorValue]>,
    ) -> Result<Option<(u64, Vec<CursorValue>)>> {
        const STARTING_WAIT_TIME: u64 = 100;
        const MAX_WAIT_TIME: u64 = 3_200;
        const MAX_ATTEMPTS: u32 = 10;

        let mut attempts = 0;
        loop {
            match self.run_batch_in_transaction(db, cursor).await {
                Ok(result) => return Ok(result),
                Err(err) if is_transient_error(&err) && attempts + 1 < MAX_ATTEMPTS => {
                    attempts += 1;
                    let wait_time = min(MAX_WAIT_TIME, STARTING_WAIT_TIME * u64::pow(2, attempts - 1));
                    let jitter: u64 = rand::rngs::OsRng.gen_range(0..=wait_time / 2);
                    tokio::time::sleep(Duration::from_millis(wait_time + jitter)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_batch_in_transaction(
        &self,
        db: &mut dyn Connection,
        cursor: Option<&[CursorValue]>,
    ) -> Result<Option<(u64, Vec<CursorValue>)>> {
        let identity_cols: Vec<String> = self.identity_columns.iter().map(|c| quote_ident(c)).collect();
        let identity_list = identity_cols.join(", ");

        let where_clause = match cursor {
            Some(values) if !values.is_empty() => {
                let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${i}")).collect();
                format!("WHERE ({identity_list}) > ({})", placeholders.join(", "))
            }
            _ => String::new(),
        };

        let select = format!(
            "SELECT {identity_list} FROM {table} {where_clause}
             ORDER BY {identity_list}
             LIMIT {batch_size}
             FOR NO KEY UPDATE",
            table = quote_ident(self.table),
            batch_size = self.batch_size,
        );

        let params: Vec<&(dyn ToSql + Sync)> = match cursor {
            Some(values) => values.iter().map(|v| v.as_sql()).collect(),
            None => Vec::new(),
        };

        let mut tx = db.transaction().await.map_err(EngineError::Other)?;

        let rows = match tx.query_with_params(&select, &params).await {
            Ok(rows) => rows,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(EngineError::Other(err));
            }
        };

        if rows.is_empty() {
            tx.rollback().await.map_err(EngineError::Other)?;
            return Ok(None);
        }

        let ids: Vec<Vec<CursorValue>> = rows
            .iter()
            .map(|row| {
                (0..self.identity_columns.len())
                    .map(|i| CursorValue::from_row(row, i))
                    .collect()
            })
            .collect();

        // Touch every selected row in one statement, matching it back by
        // identity tuple via a VALUES list bound as parameters. Clearing the
        // needs-backfill sentinel alongside the no-op touch costs nothing
        // extra since the row is already locked and being written.
        let touch_col = quote_ident(self.touch_column);
        let needs_backfill_col = quote_ident(naming::NEEDS_BACKFILL_COLUMN);
        let mut update = format!(
            "UPDATE {table} SET {touch_col} = {touch_col}, {needs_backfill_col} = false WHERE ({identity_list}) IN (",
            table = quote_ident(self.table),
        );

        let flat_params: Vec<&(dyn ToSql + Sync)> = ids.iter().flat_map(|tuple| tuple.iter().map(|v| v.as_sql())).collect();

        let cols = self.identity_columns.len();
        let mut placeholder_idx = 1;
        let tuples: Vec<String> = ids
            .iter()
            .map(|_| {
                let ph: Vec<String> = (0..cols)
                    .map(|_| {
                        let p = format!("${placeholder_idx}");
                        placeholder_idx += 1;
                        p
                    })
                    .collect();
                format!("({})", ph.join(", "))
            })
            .collect();
        update.push_str(&tuples.join(", "));
        update.push(')');

        if let Err(err) = tx.query_with_params(&update, &flat_params).await {
            let _ = tx.rollback().await;
            return Err(EngineError::Other(err));
        }

        tx.commit().await.map_err(EngineError::Other)?;

        let last = ids.last().expect("rows is non-empty").clone();
        Ok(Some((rows.len() as u64, last)))
    }

    async fn estimate_row_count(&self, db: &mut dyn Connection) -> Result<u64> {
        let rows = db
            .query(&format!(
                "SELECT n_live_tup FROM pg_stat_user_tables WHERE relname = '{}'",
                self.table.replace('\'', "''"),
            ))
            .await
            .map_err(EngineError::Other)?;

        if let Some(row) = rows.first() {
            let estimate: i64 = row.get(0);
            if estimate >= 0 {
                return Ok(estimate as u64);
            }
        }

        let rows = db
            .query(&format!("SELECT count(*) FROM {}", quote_ident(self.table)))
            .await
            .map_err(EngineError::Other)?;
        let count: i64 = rows.first().map(|r| r.get(0)).unwrap_or(0);
        Ok(count as u64)
    }
}

/// A type-erased identity column value, carried between batches as the
/// resume cursor. Supports the identity column types an `identity_columns`
/// selection can realistically be: integers, text, and UUID.
#[derive(Debug, Clone)]
enum CursorValue {
    Int(i64),
    Text(String),
    Uuid(uuid::Uuid),
}

impl CursorValue {
    fn from_row(row: &tokio_postgres::Row, idx: usize) -> Self {
        if let Ok(v) = row.try_get::<_, i64>(idx) {
            return CursorValue::Int(v);
        }
        if let Ok(v) = row.try_get::<_, i32>(idx) {
            return CursorValue::Int(v as i64);
        }
        if let Ok(v) = row.try_get::<_, uuid::Uuid>(idx) {
            return CursorValue::Uuid(v);
        }
        CursorValue::Text(row.get::<_, String>(idx))
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            CursorValue::Int(v) => v,
            CursorValue::Text(v) => v,
            CursorValue::Uuid(v) => v,
        }
    }
}
