use serde::{Deserialize, Serialize};

use crate::action::{DBAction, SetDefault as SetDefaultAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Set or drop a column's DEFAULT. Metadata-only:
/// it affects only future inserts that omit the column, so it applies
/// directly without a shadow column.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetDefault {
    pub table: String,
    pub column: String,
    pub default: Option<String>,
}

#[typetag::serde(name = "set_default")]
#[async_trait::async_trait]
impl Operation for SetDefault {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_column(&self.column).is_none() {
            return Err(EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = SetDefaultAction {
            table: self.table.clone(),
            column: self.column.clone(),
            default: self.default.clone(),
        };
        action.execute(db).await?;
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        // Like set_comment, a DEFAULT isn't versioned per-schema view; a
        // rollback that wanted the previous default back would need it
        // recorded, which validate's read of the pre-migration Schema can
        // supply in a future revision if this proves surprising in practice.
        Ok(())
    }
}
