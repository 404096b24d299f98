//! Database driver interface and the advisory-lock wrapper that
//! keeps one pgvista process at a time working on a given database.
//!
//! `Connection` is deliberately narrow: `exec` (DDL/no-rows), `query` (rows
//! back), `query_with_params` (typed parameter binding — used for the
//! composite-identity backfill comparison), and `transaction` (a
//! short-lived transaction a caller can retry around). Everything else in
//! the engine is built out of these four primitives.

use std::{cmp::min, future::Future, time::Duration};

use anyhow::{anyhow, Context};
use rand::prelude::*;
use tokio_postgres::{self as postgres, types::ToSql, NoTls, Row};

use crate::error::is_transient;

/// Lock wraps a regular DbConn, only allowing access using the
/// `lock` method. This method will acquire the advisory lock before
/// allowing access to the database, and then release it afterwards.
///
/// We use advisory locks to avoid multiple pgvista instances working
/// on the same database at the same time. Lock is the only way to
/// get a Postgres connection, which ensures every DB access goes through
/// one advisory lock.
///
/// Postgres docs on advisory locks:
///   https://www.postgresql.org/docs/current/explicit-locking.html#ADVISORY-LOCKS
pub struct Lock {
    client: Postgres,
}

impl Lock {
    // Advisory lock keys in Postgres are 64-bit integers.
    // The key we use was chosen randomly.
    const LOCK_KEY: i64 = 7_331_009_488_213_004_551;

    pub async fn connect(config: &postgres::Config) -> anyhow::Result<Self> {
        Self::connect_with_lock_timeout(config, Duration::from_secs(1)).await
    }

    pub async fn connect_with_lock_timeout(
        config: &postgres::Config,
        lock_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let (pg, conn) = config.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::error!(error = %err, "postgres connection task terminated");
            }
        });

        // When running DDL queries that acquire locks, we risk causing a "lock queue".
        // When attempting to acquire a lock, Postgres will wait for any long running queries to complete.
        // At the same time, it will block other queries until the lock has been acquired and released.
        // This has the bad effect of the long-running query blocking other queries because of us, forming
        // a queue of other queries until we release our lock.
        //
        // We set lock_timeout to avoid this. It puts an upper bound on how long Postgres will
        // wait to acquire a lock, and thus on how long a long-running query can block other
        // queries behind us. Callers that hit it see a retryable LOCK_NOT_AVAILABLE error.
        //
        // Reference: https://medium.com/paypal-tech/postgresql-at-scale-database-schema-changes-without-downtime-20d3749ed680
        pg.simple_query(&format!("SET lock_timeout = '{}ms'", lock_timeout.as_millis()))
            .await
            .context("failed to set lock_timeout")?;

        Ok(Self {
            client: Postgres::new(pg),
        })
    }

    /// Acquire the advisory lock, run `f` against the locked connection, and
    /// release the lock whether or not `f` succeeded.
    pub async fn lock<F, Fut, T>(&mut self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Postgres) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.acquire_lock().await?;
        let result = f(&mut self.client).await;
        self.release_lock().await?;
        result
    }

    async fn acquire_lock(&mut self) -> anyhow::Result<()> {
        let success = self
            .client
            .query(&format!("SELECT pg_try_advisory_lock({})", Self::LOCK_KEY))
            .await?
            .first()
            .ok_or_else(|| anyhow!("unexpectedly failed when acquiring advisory lock"))
            .map(|row| row.get::<'_, _, bool>(0))?;

        if success {
            Ok(())
        } else {
            Err(anyhow!(
                "another instance of pgvista is already running against this database"
            ))
        }
    }

    async fn release_lock(&mut self) -> anyhow::Result<()> {
        self.client
            .query(&format!("SELECT pg_advisory_unlock({})", Self::LOCK_KEY))
            .await?
            .first()
            .ok_or_else(|| anyhow!("unexpectedly failed when releasing advisory lock"))?;
        Ok(())
    }

    /// Is another session currently holding the advisory lock, i.e. is an
    /// engine run active against this database right now. Implemented as a
    /// non-blocking try-then-release: if we can take the lock ourselves,
    /// nobody else holds it.
    pub async fn is_active(&mut self) -> anyhow::Result<bool> {
        let acquired = self
            .client
            .query(&format!("SELECT pg_try_advisory_lock({})", Self::LOCK_KEY))
            .await?
            .first()
            .map(|row| row.get::<'_, _, bool>(0))
            .unwrap_or(false);

        if acquired {
            self.release_lock().await?;
        }

        Ok(!acquired)
    }
}

/// The narrow driver abstraction every DB action and operation programs
/// against.
#[async_trait::async_trait]
pub trait Connection: Send {
    async fn run(&mut self, query: &str) -> anyhow::Result<()>;

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>>;

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>>;

    async fn transaction(&mut self) -> anyhow::Result<Transaction>;
}

pub struct Postgres {
    client: postgres::Client,
}

impl Postgres {
    fn new(client: postgres::Client) -> Self {
        Postgres { client }
    }
}

#[async_trait::async_trait]
impl Connection for Postgres {
    async fn run(&mut self, query: &str) -> anyhow::Result<()> {
        retry_automatically(|| self.client.batch_execute(query)).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>> {
        let rows = retry_automatically(|| self.client.query(query, &[])).await?;
        Ok(rows)
    }

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>> {
        let rows = retry_automatically(|| self.client.query(query, params)).await?;
        Ok(rows)
    }

    async fn transaction(&mut self) -> anyhow::Result<Transaction> {
        let transaction = self.client.transaction().await?;
        Ok(Transaction { transaction })
    }
}

pub struct Transaction<'a> {
    transaction: postgres::Transaction<'a>,
}

impl Transaction<'_> {
    pub async fn commit(self) -> anyhow::Result<()> {
        self.transaction.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> anyhow::Result<()> {
        self.transaction.rollback().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for Transaction<'_> {
    async fn run(&mut self, query: &str) -> anyhow::Result<()> {
        self.transaction.batch_execute(query).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>> {
        let rows = self.transaction.query(query, &[]).await?;
        Ok(rows)
    }

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>> {
        let rows = self.transaction.query(query, params).await?;
        Ok(rows)
    }

    async fn transaction(&mut self) -> anyhow::Result<Transaction> {
        let transaction = self.transaction.transaction().await?;
        Ok(Transaction { transaction })
    }
}

/// Retry a fallible database operation with exponential backoff and jitter,
/// but only for errors classified as transient (lock-timeout, serialization
/// failure, deadlock). Everything else surfaces immediately.
pub async fn retry_automatically<T, F, Fut>(mut f: F) -> Result<T, postgres::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, postgres::Error>>,
{
    const STARTING_WAIT_TIME: u64 = 100;
    const MAX_WAIT_TIME: u64 = 3_200;
    const MAX_ATTEMPTS: u32 = 10;

    let mut rng = rand::rngs::OsRng;
    let mut attempts = 0;
    loop {
        let result = f().await;

        let error = match result {
            Ok(_) => return result,
            Err(err) => err,
        };

        // If we got a database error, we check if it's one of the transient
        // ones. If we didn't get a database error at all, it's most likely a
        // connection-level failure (reset, broken pipe), which is also worth
        // retrying.
        if let Some(db_error) = error.as_db_error() {
            if !is_transient(db_error) {
                return Err(error);
            }
        }

        attempts += 1;
        if attempts >= MAX_ATTEMPTS {
            return Err(error);
        }

        // The wait time increases exponentially, starting at 100ms and doubling up to a max of 3.2s.
        let wait_time = min(MAX_WAIT_TIME, STARTING_WAIT_TIME * u64::pow(2, attempts - 1));

        // The jitter is up to half the wait time.
        let jitter: u64 = rng.gen_range(0..=wait_time / 2);

        tokio::time::sleep(Duration::from_millis(wait_time + jitter)).await;
    }
}

/// A fake, in-memory `Connection` used to run `Operation::validate` against
/// the virtual schema without a real database. Any
/// attempt to actually execute SQL against it is a programming error —
/// validation must stay pure and never depends on query results.
pub mod fake {
    use super::*;

    #[derive(Default)]
    pub struct FakeConnection;

    #[async_trait::async_trait]
    impl Connection for FakeConnection {
        async fn run(&mut self, _query: &str) -> anyhow::Result<()> {
            Err(anyhow!("FakeConnection cannot execute DDL; validation must be pure"))
        }

        async fn query(&mut self, _query: &str) -> anyhow::Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn query_with_params(
            &mut self,
            _query: &str,
            _params: &[&(dyn ToSql + Sync)],
        ) -> anyhow::Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn transaction(&mut self) -> anyhow::Result<Transaction> {
            Err(anyhow!("FakeConnection has no real transactions"))
        }
    }
}
