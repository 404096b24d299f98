//! The durable migration ledger: an out-of-scope collaborator the engine
//! treats as an opaque store of `(name, started_at, completed_at,
//! rolled_back_at)` tuples.
//!
//! Crash recovery does not depend on this ledger: every `DBAction` is
//! idempotent (`IF NOT EXISTS`/`IF EXISTS`/duplicate-object-swallowing), so
//! re-running a migration's `start` after a crash is always safe. The ledger
//! exists purely to answer "what's the latest completed version?" and "is a
//! migration currently in flight?" for callers like the CLI's `status`
//! command and a connecting client choosing a version schema.

use crate::{db::Connection, naming::STATE_SCHEMA};

/// One row of the durable migration ledger. The timestamp is carried as the
/// text Postgres renders it as: nothing in the engine computes with it,
/// only the CLI's `status` command displays it.
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub name: String,
    pub version_schema: String,
    pub started_at: String,
    pub completed: bool,
    pub rolled_back: bool,
}

/// The durable ledger interface:
/// `start`/`complete`/`rollback` record transitions; `latest_version`/
/// `history` answer what a client needs to know to connect through the
/// right version schema or to avoid racing a live migration.
#[async_trait::async_trait]
pub trait StateStore: Send {
    async fn start(
        &mut self,
        name: &str,
        version_schema: &str,
        description: Option<&str>,
        operations_json: serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn complete(&mut self, name: &str) -> anyhow::Result<()>;

    async fn rollback(&mut self, name: &str) -> anyhow::Result<()>;

    /// The version schema name of the most recently completed migration
    /// that has not since been rolled back, or `None` if none has run.
    async fn latest_version(&mut self) -> anyhow::Result<Option<String>>;

    /// True if the most recently started migration has not yet completed
    /// or rolled back.
    async fn is_active(&mut self) -> anyhow::Result<bool>;

    async fn history(&mut self) -> anyhow::Result<Vec<MigrationRecord>>;
}

/// Creates the ledger's schema and table if they don't already exist. Safe
/// to call on every connect; idempotent like everything else in the engine.
pub async fn ensure_state_schema(db: &mut (impl Connection + ?Sized)) -> anyhow::Result<()> {
    db.run(&format!("CREATE SCHEMA IF NOT EXISTS {STATE_SCHEMA}")).await?;

    db.run(&format!(
        "
        CREATE TABLE IF NOT EXISTS {STATE_SCHEMA}.migrations (
            index INTEGER GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            version_schema TEXT NOT NULL,
            description TEXT,
            operations JSONB NOT NULL,
            started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ,
            rolled_back_at TIMESTAMPTZ
        )
        "
    ))
    .await?;

    Ok(())
}

pub struct PostgresStateStore<'a, C: Connection + ?Sized> {
    db: &'a mut C,
}

impl<'a, C: Connection + ?Sized> PostgresStateStore<'a, C> {
    pub fn new(db: &'a mut C) -> Self {
        PostgresStateStore { db }
    }
}

#[async_trait::async_trait]
impl<C: Connection + ?Sized> StateStore for PostgresStateStore<'_, C> {
    async fn start(
        &mut self,
        name: &str,
        version_schema: &str,
        description: Option<&str>,
        operations_json: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.db
            .query_with_params(
                &format!(
                    "INSERT INTO {STATE_SCHEMA}.migrations (name, version_schema, description, operations) \
                     VALUES ($1, $2, $3, $4) ON CONFLICT (name) DO NOTHING"
                ),
                &[&name, &version_schema, &description, &operations_json],
            )
            .await?;
        Ok(())
    }

    async fn complete(&mut self, name: &str) -> anyhow::Result<()> {
        self.db
            .query_with_params(
                &format!("UPDATE {STATE_SCHEMA}.migrations SET completed_at = NOW() WHERE name = $1 AND completed_at IS NULL"),
                &[&name],
            )
            .await?;
        Ok(())
    }

    async fn rollback(&mut self, name: &str) -> anyhow::Result<()> {
        self.db
            .query_with_params(
                &format!("UPDATE {STATE_SCHEMA}.migrations SET rolled_back_at = NOW() WHERE name = $1"),
                &[&name],
            )
            .await?;
        Ok(())
    }

    async fn latest_version(&mut self) -> anyhow::Result<Option<String>> {
        let rows = self
            .db
            .query(&format!(
                "
                SELECT version_schema FROM {STATE_SCHEMA}.migrations
                WHERE completed_at IS NOT NULL AND rolled_back_at IS NULL
                ORDER BY index DESC LIMIT 1
                "
            ))
            .await?;
        Ok(rows.first().map(|row| row.get(0)))
    }

    async fn is_active(&mut self) -> anyhow::Result<bool> {
        let rows = self
            .db
            .query(&format!(
                "
                SELECT 1 FROM {STATE_SCHEMA}.migrations
                WHERE completed_at IS NULL AND rolled_back_at IS NULL
                ORDER BY index DESC LIMIT 1
                "
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn history(&mut self) -> anyhow::Result<Vec<MigrationRecord>> {
        let rows = self
            .db
            .query(&format!(
                "
                SELECT name, version_schema, started_at::TEXT, completed_at IS NOT NULL, rolled_back_at IS NOT NULL
                FROM {STATE_SCHEMA}.migrations ORDER BY index ASC
                "
            ))
            .await?;

        Ok(rows
            .iter()
            .map(|row| MigrationRecord {
                name: row.get(0),
                version_schema: row.get(1),
                started_at: row.get(2),
                completed: row.get(3),
                rolled_back: row.get(4),
            })
            .collect())
    }
}
