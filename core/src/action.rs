//! DB action layer: the small, idempotent DDL steps that
//! operations compose. Every action has a deterministic ID derived from its
//! parameters via `naming::action_id`, so re-running a migration after a
//! crash can skip actions that already completed rather than re-issuing DDL
//! that would conflict with itself.

use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;

use crate::db::Connection;
use crate::error::{sqlstate, EngineError, Result};
use crate::ident::{quote_ident, quote_literal};
use crate::naming;

#[async_trait]
pub trait DBAction: Send + Sync {
    /// Deterministic identifier, stable across retries of the same logical
    /// action on the same table/column/constraint.
    fn id(&self) -> String;

    async fn execute(&self, db: &mut dyn Connection) -> Result<()>;
}

fn ddl_err(id: &str, err: anyhow::Error) -> EngineError {
    EngineError::ddl(id, err)
}

/// `ALTER TABLE ... ADD COLUMN` with an optional default and nullability.
/// Adding a column with a non-volatile default is itself a metadata-only
/// operation since Postgres 11, so no separate backfill is required for it.
pub struct AddColumn {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

#[async_trait]
impl DBAction for AddColumn {
    fn id(&self) -> String {
        naming::action_id("add_column", &[&self.table, &self.column])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let nullability = if self.nullable { "" } else { " NOT NULL" };
        let default = self
            .default
            .as_deref()
            .map(|d| format!(" DEFAULT {d}"))
            .unwrap_or_default();

        db.run(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {data_type}{default}{nullability}",
            table = quote_ident(&self.table),
            column = quote_ident(&self.column),
            data_type = self.data_type,
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

/// Adds the per-row needs-backfill sentinel (`naming::NEEDS_BACKFILL_COLUMN`)
/// ahead of a backfill. `ADD COLUMN ... DEFAULT true` is a metadata-only fast
/// default, so every row already in the table is marked as needing the
/// backfill pass without a table rewrite; the immediate `SET DEFAULT false`
/// only changes what rows inserted from this point on receive, since the
/// coherence triggers populate those rows' shadow columns at write time and
/// they never need backfilling.
pub struct EnsureNeedsBackfillColumn {
    pub table: String,
}

#[async_trait]
impl DBAction for EnsureNeedsBackfillColumn {
    fn id(&self) -> String {
        naming::action_id("ensure_needs_backfill_column", &[&self.table])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let table = quote_ident(&self.table);
        let column = quote_ident(naming::NEEDS_BACKFILL_COLUMN);

        db.run(&format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} boolean NOT NULL DEFAULT true"))
            .await
            .map_err(|e| ddl_err(&self.id(), e))?;

        db.run(&format!("ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT false"))
            .await
            .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct DropColumn {
    pub table: String,
    pub column: String,
}

#[async_trait]
impl DBAction for DropColumn {
    fn id(&self) -> String {
        naming::action_id("drop_column", &[&self.table, &self.column])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} DROP COLUMN IF EXISTS {column}",
            table = quote_ident(&self.table),
            column = quote_ident(&self.column),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

/// Create a CHECK constraint `NOT VALID`: visible to
/// new writes immediately, validated against existing rows later without
/// holding an ACCESS EXCLUSIVE lock for the scan.
pub struct CreateCheckConstraintNotValid {
    pub table: String,
    pub name: String,
    pub expression: String,
}

#[async_trait]
impl DBAction for CreateCheckConstraintNotValid {
    fn id(&self) -> String {
        naming::action_id("create_check_constraint", &[&self.table, &self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let result = db
            .run(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} CHECK ({expr}) NOT VALID",
                table = quote_ident(&self.table),
                name = quote_ident(&self.name),
                expr = self.expression,
            ))
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                if is_already_exists(&e) {
                    Ok(())
                } else {
                    Err(ddl_err(&self.id(), e))
                }
            }
        }
    }
}

/// `ALTER TABLE ... VALIDATE CONSTRAINT`: scans existing rows under a SHARE
/// UPDATE EXCLUSIVE lock, which blocks other DDL but not normal reads/writes.
pub struct ValidateConstraint {
    pub table: String,
    pub name: String,
}

#[async_trait]
impl DBAction for ValidateConstraint {
    fn id(&self) -> String {
        naming::action_id("validate_constraint", &[&self.table, &self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} VALIDATE CONSTRAINT {name}",
            table = quote_ident(&self.table),
            name = quote_ident(&self.name),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct DropConstraint {
    pub table: String,
    pub name: String,
}

#[async_trait]
impl DBAction for DropConstraint {
    fn id(&self) -> String {
        naming::action_id("drop_constraint", &[&self.table, &self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {name}",
            table = quote_ident(&self.table),
            name = quote_ident(&self.name),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct CreateForeignKeyNotValid {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[async_trait]
impl DBAction for CreateForeignKeyNotValid {
    fn id(&self) -> String {
        naming::action_id("create_fk_constraint", &[&self.table, &self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let cols = self.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let ref_cols = self.referenced_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");

        let result = db
            .run(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({cols}) REFERENCES {ref_table} ({ref_cols}) NOT VALID",
                table = quote_ident(&self.table),
                name = quote_ident(&self.name),
                ref_table = quote_ident(&self.referenced_table),
            ))
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(ddl_err(&self.id(), e)),
        }
    }
}

/// Build a UNIQUE index `CONCURRENTLY` and then attach it as a constraint.
/// `CONCURRENTLY` avoids the ACCESS EXCLUSIVE lock a plain `CREATE UNIQUE
/// INDEX` would need, at the cost of two transactions and a possible
/// `indisvalid = false` leftover if it's interrupted.
pub struct CreateUniqueIndexConcurrently {
    pub table: String,
    pub index_name: String,
    pub columns: Vec<String>,
    pub cancel: CancellationToken,
}

#[async_trait]
impl DBAction for CreateUniqueIndexConcurrently {
    fn id(&self) -> String {
        naming::action_id("create_unique_index", &[&self.table, &self.index_name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let exists = index_exists(db, &self.index_name).await?;
        if !exists {
            let cols = self.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
            db.run(&format!(
                "CREATE UNIQUE INDEX CONCURRENTLY {name} ON {table} ({cols})",
                name = quote_ident(&self.index_name),
                table = quote_ident(&self.table),
            ))
            .await
            .map_err(|e| ddl_err(&self.id(), e))?;
        }

        wait_for_index_valid(db, &self.index_name, &self.cancel).await?;
        Ok(())
    }
}

pub struct CreateIndexConcurrently {
    pub table: String,
    pub index_name: String,
    pub columns: Vec<String>,
    pub cancel: CancellationToken,
}

#[async_trait]
impl DBAction for CreateIndexConcurrently {
    fn id(&self) -> String {
        naming::action_id("create_index", &[&self.table, &self.index_name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let exists = index_exists(db, &self.index_name).await?;
        if !exists {
            let cols = self.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
            db.run(&format!(
                "CREATE INDEX CONCURRENTLY {name} ON {table} ({cols})",
                name = quote_ident(&self.index_name),
                table = quote_ident(&self.table),
            ))
            .await
            .map_err(|e| ddl_err(&self.id(), e))?;
        }

        wait_for_index_valid(db, &self.index_name, &self.cancel).await?;
        Ok(())
    }
}

pub struct DropIndexConcurrently {
    pub index_name: String,
}

#[async_trait]
impl DBAction for DropIndexConcurrently {
    fn id(&self) -> String {
        naming::action_id("drop_index", &[&self.index_name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", quote_ident(&self.index_name)))
            .await
            .map_err(|e| ddl_err(&self.id(), e))
    }
}

/// Polls `pg_index.indisvalid` on a 500ms ticker, racing each tick against `cancel` so a caller can abort
/// the wait promptly instead of blocking to completion.
/// `CREATE INDEX CONCURRENTLY` can leave an invalid index behind if its
/// backing transaction was cancelled or it raced a conflicting DDL
/// statement; when that happens the only fix is to drop and retry (capped
/// rather than looping forever).
async fn wait_for_index_valid(db: &mut dyn Connection, index_name: &str, cancel: &CancellationToken) -> Result<()> {
    const MAX_ATTEMPTS: u32 = 5;
    const POLL_INTERVAL: Duration = Duration::from_millis(500);

    for attempt in 0..MAX_ATTEMPTS {
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let rows = db
            .query(&format!(
                "SELECT indisvalid FROM pg_index i JOIN pg_class c ON c.oid = i.indexrelid WHERE c.relname = {}",
                quote_literal(index_name),
            ))
            .await
            .map_err(EngineError::Other)?;

        match rows.first() {
            Some(row) if row.get::<'_, _, bool>(0) => return Ok(()),
            Some(_) if attempt + 1 < MAX_ATTEMPTS => {
                // Invalid index from an interrupted build; drop and let the
                // caller's next attempt recreate it from scratch.
                db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", quote_ident(index_name)))
                    .await
                    .map_err(EngineError::Other)?;
                return Err(EngineError::Other(anyhow::anyhow!(
                    "index {index_name} build left an invalid index; retry the migration"
                )));
            }
            Some(_) => {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "index {index_name} never became valid after {MAX_ATTEMPTS} attempts"
                )))
            }
            None => return Err(EngineError::Other(anyhow::anyhow!("index {index_name} not found after creation"))),
        }
    }

    Ok(())
}

async fn index_exists(db: &mut dyn Connection, index_name: &str) -> Result<bool> {
    let rows = db
        .query(&format!(
            "SELECT 1 FROM pg_class WHERE relname = {}",
            quote_literal(index_name),
        ))
        .await
        .map_err(EngineError::Other)?;
    Ok(!rows.is_empty())
}

pub struct SetNotNullNotValid {
    pub table: String,
    pub column: String,
    pub check_name: String,
}

#[async_trait]
impl DBAction for SetNotNullNotValid {
    fn id(&self) -> String {
        naming::action_id("set_not_null_check", &[&self.table, &self.column])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let action = CreateCheckConstraintNotValid {
            table: self.table.clone(),
            name: self.check_name.clone(),
            expression: format!("{} IS NOT NULL", quote_ident(&self.column)),
        };
        action.execute(db).await
    }
}

/// Promote a validated NOT NULL check constraint to an actual column
/// attribute.
pub struct SetColumnNotNull {
    pub table: String,
    pub column: String,
}

#[async_trait]
impl DBAction for SetColumnNotNull {
    fn id(&self) -> String {
        naming::action_id("set_column_not_null", &[&self.table, &self.column])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL",
            table = quote_ident(&self.table),
            column = quote_ident(&self.column),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct RenameColumn {
    pub table: String,
    pub from: String,
    pub to: String,
}

#[async_trait]
impl DBAction for RenameColumn {
    fn id(&self) -> String {
        naming::action_id("rename_column", &[&self.table, &self.from, &self.to])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} RENAME COLUMN {from} TO {to}",
            table = quote_ident(&self.table),
            from = quote_ident(&self.from),
            to = quote_ident(&self.to),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct RenameConstraint {
    pub table: String,
    pub from: String,
    pub to: String,
}

#[async_trait]
impl DBAction for RenameConstraint {
    fn id(&self) -> String {
        naming::action_id("rename_constraint", &[&self.table, &self.from, &self.to])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} RENAME CONSTRAINT {from} TO {to}",
            table = quote_ident(&self.table),
            from = quote_ident(&self.from),
            to = quote_ident(&self.to),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct RenameTable {
    pub from: String,
    pub to: String,
}

#[async_trait]
impl DBAction for RenameTable {
    fn id(&self) -> String {
        naming::action_id("rename_table", &[&self.from, &self.to])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {from} RENAME TO {to}",
            from = quote_ident(&self.from),
            to = quote_ident(&self.to),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct SetReplicaIdentity {
    pub table: String,
    /// Either "DEFAULT", "FULL", "NOTHING", or "USING INDEX <name>".
    pub identity: String,
}

#[async_trait]
impl DBAction for SetReplicaIdentity {
    fn id(&self) -> String {
        naming::action_id("set_replica_identity", &[&self.table])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} REPLICA IDENTITY {identity}",
            table = quote_ident(&self.table),
            identity = self.identity,
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct SetDefault {
    pub table: String,
    pub column: String,
    pub default: Option<String>,
}

#[async_trait]
impl DBAction for SetDefault {
    fn id(&self) -> String {
        naming::action_id("set_default", &[&self.table, &self.column])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let clause = match &self.default {
            Some(expr) => format!("SET DEFAULT {expr}"),
            None => "DROP DEFAULT".to_string(),
        };
        db.run(&format!(
            "ALTER TABLE {table} ALTER COLUMN {column} {clause}",
            table = quote_ident(&self.table),
            column = quote_ident(&self.column),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct SetComment {
    pub object: CommentTarget,
    pub comment: Option<String>,
}

pub enum CommentTarget {
    Table(String),
    Column(String, String),
}

#[async_trait]
impl DBAction for SetComment {
    fn id(&self) -> String {
        match &self.object {
            CommentTarget::Table(t) => naming::action_id("set_comment_table", &[t]),
            CommentTarget::Column(t, c) => naming::action_id("set_comment_column", &[t, c]),
        }
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let value = self.comment.as_deref().map(quote_literal).unwrap_or_else(|| "NULL".to_string());
        let on = match &self.object {
            CommentTarget::Table(t) => format!("TABLE {}", quote_ident(t)),
            CommentTarget::Column(t, c) => format!("COLUMN {}.{}", quote_ident(t), quote_ident(c)),
        };
        db.run(&format!("COMMENT ON {on} IS {value}"))
            .await
            .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct CreateTable {
    pub name: String,
    pub column_defs: Vec<String>,
    pub primary_key: Vec<String>,
}

#[async_trait]
impl DBAction for CreateTable {
    fn id(&self) -> String {
        naming::action_id("create_table", &[&self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        let mut defs = self.column_defs.clone();
        if !self.primary_key.is_empty() {
            let pk_cols = self.primary_key.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
            defs.push(format!("PRIMARY KEY ({pk_cols})"));
        }

        db.run(&format!(
            "CREATE TABLE IF NOT EXISTS {name} ({defs})",
            name = quote_ident(&self.name),
            defs = defs.join(", "),
        ))
        .await
        .map_err(|e| ddl_err(&self.id(), e))
    }
}

pub struct DropTable {
    pub name: String,
}

#[async_trait]
impl DBAction for DropTable {
    fn id(&self) -> String {
        naming::action_id("drop_table", &[&self.name])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name)))
            .await
            .map_err(|e| ddl_err(&self.id(), e))
    }
}

/// Arbitrary user-supplied SQL (`raw_sql`/`sql` operations): the
/// one action the engine cannot make idempotent on the user's behalf, so its
/// ID folds in a hash-free counter supplied by the caller rather than the
/// statement text, which may not be stable or safe to embed in an identifier.
pub struct RawSql {
    pub up: String,
    pub down: Option<String>,
    pub ordinal: usize,
}

#[async_trait]
impl DBAction for RawSql {
    fn id(&self) -> String {
        naming::action_id("raw_sql", &[&self.ordinal.to_string()])
    }

    async fn execute(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&self.up).await.map_err(|e| ddl_err(&self.id(), e))
    }
}

impl RawSql {
    pub async fn execute_down(&self, db: &mut dyn Connection) -> Result<()> {
        if let Some(down) = &self.down {
            db.run(down).await.map_err(|e| ddl_err(&format!("{}_down", self.id()), e))?;
        }
        Ok(())
    }
}

/// Issue a parameterized query, used by the backfiller for the composite
/// identity comparison.
pub async fn query_with_params(
    db: &mut dyn Connection,
    query: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<Vec<tokio_postgres::Row>> {
    db.query_with_params(query, params).await.map_err(EngineError::Other)
}

fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tokio_postgres::Error>()
        .and_then(|e| e.as_db_error())
        .map(|e| e.code().code() == sqlstate::DUPLICATE_OBJECT)
        .unwrap_or(false)
}
