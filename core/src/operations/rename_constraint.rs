use serde::{Deserialize, Serialize};

use crate::action::{DBAction, RenameConstraint as RenameConstraintAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Rename a constraint. Constraint names
/// aren't projected through views, so unlike column/table renames this can
/// be applied immediately — no version of the table's view depends on a
/// constraint's name.
#[derive(Serialize, Deserialize, Debug)]
pub struct RenameConstraint {
    pub table: String,
    pub name: String,
    pub new_name: String,
}

#[typetag::serde(name = "rename_constraint")]
#[async_trait::async_trait]
impl Operation for RenameConstraint {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.new_name)?;
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_constraint(&self.name).is_none() {
            return Err(EngineError::ConstraintDoesNotExist(self.name.clone(), self.table.clone()));
        }
        if table.get_constraint(&self.new_name).is_some() {
            return Err(EngineError::ConstraintAlreadyExists(self.new_name.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = RenameConstraintAction {
            table: self.table.clone(),
            from: self.name.clone(),
            to: self.new_name.clone(),
        };
        action.execute(db).await?;
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = RenameConstraintAction {
            table: self.table.clone(),
            from: self.new_name.clone(),
            to: self.name.clone(),
        };
        action.execute(db).await
    }
}
