use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropConstraint as DropConstraintAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Drop a single-purpose constraint: the
/// constraint stays in place until `complete`, since the old version's
/// clients may still depend on it being enforced.
#[derive(Serialize, Deserialize, Debug)]
pub struct DropConstraint {
    pub table: String,
    pub name: String,
}

#[typetag::serde(name = "drop_constraint")]
#[async_trait::async_trait]
impl Operation for DropConstraint {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_constraint(&self.name).is_none() {
            return Err(EngineError::ConstraintDoesNotExist(self.name.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, _db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropConstraintAction {
            table: self.table.clone(),
            name: self.name.clone(),
        };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
