use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropColumn as DropColumnAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Drop a column. The column stays physically
/// present until `complete`: the old version schema's view still selects
/// it, so clients connected through that version must keep seeing it until
/// they've migrated off. The new version's view simply omits it from the
/// start — no DDL is needed to make that so, only a virtual schema change.
#[derive(Serialize, Deserialize, Debug)]
pub struct DropColumn {
    pub table: String,
    pub column: String,
}

#[typetag::serde(name = "drop_column")]
#[async_trait::async_trait]
impl Operation for DropColumn {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_column(&self.column).is_none() {
            return Err(EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |table| {
            table.change_column(&self.column, |column| column.set_removed());
        });
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropColumnAction {
            table: self.table.clone(),
            column: self.column.clone(),
        };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        // The column was never physically touched; the virtual schema
        // change is discarded along with the rest of this migration's
        // in-memory `Schema` when rollback unwinds.
        Ok(())
    }
}
