use serde::{Deserialize, Serialize};

use crate::action::{DBAction, RenameTable as RenameTableAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Rename a table. Like `rename_column`, purely
/// virtual until `complete`: each version's view exposes the table under
/// whatever name that version expects, regardless of the table's physical
/// name.
#[derive(Serialize, Deserialize, Debug)]
pub struct RenameTable {
    pub table: String,
    pub new_name: String,
}

#[typetag::serde(name = "rename_table")]
#[async_trait::async_trait]
impl Operation for RenameTable {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.new_name)?;
        schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |table| table.set_name(&self.new_name));
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = RenameTableAction {
            from: self.table.clone(),
            to: self.new_name.clone(),
        };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
