use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropTable as DropTableAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Drop a table. The table stays physically
/// present, and its view continues to exist for any already-created
/// version schema, until `complete` physically drops it.
#[derive(Serialize, Deserialize, Debug)]
pub struct DropTable {
    pub table: String,
}

#[typetag::serde(name = "drop_table")]
#[async_trait::async_trait]
impl Operation for DropTable {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |table| table.set_removed());
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropTableAction { name: self.table.clone() };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
