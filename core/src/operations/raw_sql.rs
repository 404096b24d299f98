use serde::{Deserialize, Serialize};

use crate::db::Connection;
use crate::error::Result;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Arbitrary SQL, run as-is. The
/// engine can't make this idempotent or reversible on the user's behalf:
/// `up` runs at `start`, `down` (if given) runs at `rollback`, and
/// `complete` is a no-op since there's no scaffolding for the engine to
/// know about.
#[derive(Serialize, Deserialize, Debug)]
pub struct RawSql {
    pub up: String,
    pub down: Option<String>,
}

impl RawSql {
    async fn run_start(&self, db: &mut dyn Connection) -> Result<()> {
        db.run(&self.up).await.map_err(crate::error::EngineError::Other)
    }

    async fn run_rollback(&self, db: &mut dyn Connection) -> Result<()> {
        if let Some(down) = &self.down {
            db.run(down).await.map_err(crate::error::EngineError::Other)?;
        }
        Ok(())
    }
}

#[typetag::serde(name = "raw_sql")]
#[async_trait::async_trait]
impl Operation for RawSql {
    fn requires_schema_refresh(&self) -> bool {
        true
    }

    async fn validate(&self, _db: &mut dyn Connection, _schema: &Schema) -> Result<()> {
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, _schema: &mut Schema) -> Result<()> {
        self.run_start(db).await
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        self.run_rollback(db).await
    }
}

/// `sql` is accepted as a synonym for `raw_sql` in migration files; it's a
/// distinct type so typetag can register it under its own tag, delegating to
/// the same logic.
#[derive(Serialize, Deserialize, Debug)]
pub struct Sql {
    pub up: String,
    pub down: Option<String>,
}

#[typetag::serde(name = "sql")]
#[async_trait::async_trait]
impl Operation for Sql {
    fn requires_schema_refresh(&self) -> bool {
        true
    }

    async fn validate(&self, _db: &mut dyn Connection, _schema: &Schema) -> Result<()> {
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, _schema: &mut Schema) -> Result<()> {
        RawSql {
            up: self.up.clone(),
            down: self.down.clone(),
        }
        .run_start(db)
        .await
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        RawSql {
            up: self.up.clone(),
            down: self.down.clone(),
        }
        .run_rollback(db)
        .await
    }
}
