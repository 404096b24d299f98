#[macro_use]
extern crate tracing;

pub mod action;
pub mod backfill;
pub mod db;
pub mod duplicator;
pub mod error;
pub mod ident;
pub mod migration;
pub mod naming;
pub mod operations;
pub mod runner;
pub mod schema;
pub mod state;
pub mod trigger;

use anyhow::bail;
use tokio_postgres::Config;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Lock,
    migration::Migration,
    runner::Runner,
    schema::Schema,
    state::{ensure_state_schema, MigrationRecord, PostgresStateStore, StateStore},
};

/// The engine's entry point: one advisory-locked connection, through which
/// every migration lifecycle call runs.
pub struct Engine {
    pub db: Lock,
    /// Shared across every lifecycle call made through this `Engine`; a
    /// caller holding a clone (via `cancel_token`) can interrupt an
    /// in-progress `migrate` — chiefly its backfill loops and concurrent
    /// index builds — by calling `.cancel()` on it, e.g. from a Ctrl-C
    /// handler.
    cancel: CancellationToken,
}

/// A snapshot of the engine's state against a database, for a caller like
/// the CLI's `status` command to display.
pub struct Status {
    pub latest_version: Option<String>,
    pub is_active: bool,
    pub history: Vec<MigrationRecord>,
}

impl Engine {
    pub async fn new(connection_string: &str) -> anyhow::Result<Engine> {
        let config: Config = connection_string.parse()?;
        Self::new_with_config(&config).await
    }

    pub async fn new_with_options(host: &str, port: u16, database: &str, username: &str, password: &str) -> anyhow::Result<Engine> {
        let mut config = Config::new();
        config.host(host).port(port).user(username).dbname(database).password(password);

        Self::new_with_config(&config).await
    }

    pub async fn new_with_config(config: &Config) -> anyhow::Result<Engine> {
        let db = Lock::connect(config).await?;
        Ok(Engine {
            db,
            cancel: CancellationToken::new(),
        })
    }

    /// A clone of this engine's cancellation token. Call `.cancel()` on it
    /// (e.g. from a signal handler) to interrupt an in-progress `migrate`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Filters `candidates` down to the migrations that haven't been
    /// started yet, verifying that every migration already recorded in the
    /// `pgvista.migrations` ledger still matches (by name, in order) the
    /// corresponding prefix of `candidates`.
    pub async fn remaining_migrations(&mut self, candidates: Vec<Migration>) -> anyhow::Result<Vec<Migration>> {
        let applied = self
            .db
            .lock(|db| async move {
                ensure_state_schema(db).await?;
                let mut store = PostgresStateStore::new(db);
                store.history().await
            })
            .await?;

        let mut candidates = candidates.into_iter();
        for record in &applied {
            match candidates.next() {
                Some(candidate) if candidate.name == record.name => {}
                Some(candidate) => {
                    bail!("migration {} does not match already-applied migration {}", candidate.name, record.name)
                }
                None => bail!("already-applied migration {} is missing locally", record.name),
            }
        }

        Ok(candidates.collect())
    }

    /// Runs the Start phase for every migration in `migrations`
    /// that isn't already in the ledger, in order, over one locked
    /// connection and one shared virtual schema.
    pub async fn migrate(&mut self, migrations: Vec<Migration>) -> anyhow::Result<Vec<Migration>> {
        let pending = self.remaining_migrations(migrations).await?;

        let cancel = self.cancel.clone();
        self.db
            .lock(|db| async move {
                let mut schema = Schema::new();
                for migration in &pending {
                    Runner::new(migration).start(db, &mut schema, &cancel).await?;
                }
                Ok(())
            })
            .await?;

        Ok(pending)
    }

    /// Runs the Complete phase for `migration`, which must already be
    /// in-progress.
    pub async fn complete(&mut self, migration: &Migration) -> anyhow::Result<()> {
        let cancel = self.cancel.clone();
        self.db
            .lock(|db| async move { Runner::new(migration).complete(db, &cancel).await.map_err(anyhow::Error::from) })
            .await
    }

    /// Runs the Rollback phase for `migration`, which must still be
    /// in-progress.
    pub async fn rollback(&mut self, migration: &Migration) -> anyhow::Result<()> {
        let cancel = self.cancel.clone();
        self.db
            .lock(|db| async move { Runner::new(migration).rollback(db, &cancel).await.map_err(anyhow::Error::from) })
            .await
    }

    pub async fn status(&mut self) -> anyhow::Result<Status> {
        self.db
            .lock(|db| async move {
                ensure_state_schema(db).await?;
                let mut store = PostgresStateStore::new(db);
                let latest_version = store.latest_version().await?;
                let is_active = store.is_active().await?;
                let history = store.history().await?;
                Ok(Status {
                    latest_version,
                    is_active,
                    history,
                })
            })
            .await
    }
}

/// Name of the per-migration schema a connecting client sets `search_path`
/// to in order to see that migration's shape of every table.
pub fn schema_name_for_migration(migration_name: &str) -> String {
    naming::version_schema_name(migration_name)
}

/// `SET search_path` statement for connecting through a given migration's
/// version schema.
pub fn schema_query_for_migration(migration_name: &str) -> String {
    format!("SET search_path TO {}", ident::quote_ident(&schema_name_for_migration(migration_name)))
}

pub use error::EngineError as Error;
