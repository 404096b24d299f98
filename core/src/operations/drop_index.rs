use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropIndexConcurrently};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Drop a secondary index, `CONCURRENTLY` for the
/// same lock-avoidance reason it was built that way.
#[derive(Serialize, Deserialize, Debug)]
pub struct DropIndex {
    pub table: String,
    pub name: String,
}

#[typetag::serde(name = "drop_index")]
#[async_trait::async_trait]
impl Operation for DropIndex {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_index(&self.name).is_none() {
            return Err(EngineError::IndexDoesNotExist(self.name.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropIndexConcurrently { index_name: self.name.clone() };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
