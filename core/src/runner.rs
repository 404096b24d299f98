//! Migration runner: drives a `Migration`'s
//! operations through Start -> Complete, or Start -> Rollback, against a
//! single locked connection, consulting and updating the state ledger as
//! the final step of each phase.
//!
//! ```text
//!    [none] --start--> [in-progress] --complete--> [complete]
//!                           |
//!                           +------- rollback ---> [rolled-back]
//! ```
//!
//! A migration can't be completed twice, and can't be rolled back once
//! completed — both are enforced against the ledger, not re-derived from
//! the virtual schema.

use tokio_util::sync::CancellationToken;

use crate::{
    db::Connection,
    error::{EngineError, Result},
    migration::Migration,
    operations::MigrationContext,
    schema::{self, Schema},
    state::{ensure_state_schema, PostgresStateStore, StateStore},
};

pub struct Runner<'a> {
    migration: &'a Migration,
}

impl<'a> Runner<'a> {
    pub fn new(migration: &'a Migration) -> Self {
        Runner { migration }
    }

    /// Runs every operation's `validate` against `schema`, in declaration
    /// order, without issuing any DDL. Pass a live connection to check
    /// against the database's current catalog, or a `FakeConnection` to
    /// lint a migration file in isolation.
    pub async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        for operation in &self.migration.operations {
            operation.validate(db, schema).await?;
        }
        Ok(())
    }

    /// Start phase: validates, then runs every operation's
    /// `start` in declaration order, then exposes both the old and new
    /// shapes of every affected table concurrently through this migration's
    /// version schema, and records the migration as in-progress.
    pub async fn start(&self, db: &mut dyn Connection, schema: &mut Schema, cancel: &CancellationToken) -> Result<()> {
        ensure_state_schema(db).await.map_err(EngineError::Other)?;

        self.migration.validate_isolation()?;

        {
            let mut store = PostgresStateStore::new(db);
            if store.is_active().await.map_err(EngineError::Other)? {
                return Err(EngineError::AlreadyStarted(self.migration.name.clone()));
            }
        }

        self.validate(db, schema).await?;

        let mut needs_schema_refresh = false;
        for (index, operation) in self.migration.operations.iter().enumerate() {
            let ctx = MigrationContext::new(0, index, cancel.clone());
            operation.start(&ctx, db, schema).await?;
            needs_schema_refresh |= operation.requires_schema_refresh();
        }

        if needs_schema_refresh {
            // `raw_sql`/`sql` can change the catalog in ways the virtual
            // `Schema`'s change-tracking doesn't see; `get_tables`/`get_table`
            // always re-read `information_schema`/`pg_catalog` live, so there's
            // no cache to invalidate here — this just documents, at the call
            // site, that the view creation below is relied upon to reflect
            // whatever such an operation just did.
            tracing::debug!(migration = %self.migration.name, "schema refresh requested after raw SQL; views will be built from live catalog state");
        }

        let schema_name = self.migration.version_schema_name();
        schema::create_new_schema_func(db, &schema_name).await.map_err(EngineError::Other)?;
        schema.create_for_migration(db, &schema_name).await.map_err(EngineError::Other)?;

        let operations_json = serde_json::to_value(&self.migration.operations).map_err(|err| EngineError::Other(err.into()))?;

        let mut store = PostgresStateStore::new(db);
        store
            .start(&self.migration.name, &schema_name, self.migration.description.as_deref(), operations_json)
            .await
            .map_err(EngineError::Other)?;

        Ok(())
    }

    /// Complete phase: runs every operation's `complete` in declaration
    /// order, dropping the scaffolding `start` put in place, then the
    /// `is_new_schema()` helper itself, and marks the ledger row completed.
    pub async fn complete(&self, db: &mut dyn Connection, cancel: &CancellationToken) -> Result<()> {
        {
            let mut store = PostgresStateStore::new(db);
            if !store.is_active().await.map_err(EngineError::Other)? {
                return Err(EngineError::NotInProgress(self.migration.name.clone()));
            }
        }

        for (index, operation) in self.migration.operations.iter().enumerate() {
            let ctx = MigrationContext::new(0, index, cancel.clone());
            operation.complete(&ctx, db).await?;
        }

        schema::drop_new_schema_func(db).await.map_err(EngineError::Other)?;

        let mut store = PostgresStateStore::new(db);
        store.complete(&self.migration.name).await.map_err(EngineError::Other)
    }

    /// Rollback phase: undoes every operation's `start`, in reverse
    /// declaration order, dropping the `is_new_schema()` helper and marking
    /// the ledger row rolled back. Only valid while the migration is still
    /// in progress.
    pub async fn rollback(&self, db: &mut dyn Connection, cancel: &CancellationToken) -> Result<()> {
        {
            let mut store = PostgresStateStore::new(db);
            if !store.is_active().await.map_err(EngineError::Other)? {
                return Err(EngineError::NotInProgress(self.migration.name.clone()));
            }
        }

        for (index, operation) in self.migration.operations.iter().enumerate().rev() {
            let ctx = MigrationContext::new(0, index, cancel.clone());
            operation.rollback(&ctx, db).await?;
        }

        schema::drop_new_schema_func(db).await.map_err(EngineError::Other)?;

        let mut store = PostgresStateStore::new(db);
        store.rollback(&self.migration.name).await.map_err(EngineError::Other)
    }
}
