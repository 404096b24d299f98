use serde::{Deserialize, Serialize};

use crate::action::{DBAction, RenameColumn as RenameColumnAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Rename a column. Purely virtual during the
/// migration window: the physical column keeps its old name, and each
/// version's view aliases it to whatever name that version expects. Only
/// `complete` performs the physical rename, once the old version (and its
/// view referencing the old alias) is no longer reachable.
#[derive(Serialize, Deserialize, Debug)]
pub struct RenameColumn {
    pub table: String,
    pub column: String,
    pub new_name: String,
}

#[typetag::serde(name = "rename_column")]
#[async_trait::async_trait]
impl Operation for RenameColumn {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.new_name)?;

        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_column(&self.column).is_none() {
            return Err(EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()));
        }
        if table.get_column(&self.new_name).is_some() {
            return Err(EngineError::ColumnAlreadyExists(self.new_name.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |table| {
            table.change_column(&self.column, |column| column.set_name(&self.new_name));
        });
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = RenameColumnAction {
            table: self.table.clone(),
            from: self.column.clone(),
            to: self.new_name.clone(),
        };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
