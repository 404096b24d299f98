use serde::{Deserialize, Serialize};

use crate::action::{CreateIndexConcurrently, DBAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Create a secondary (non-unique) index, built
/// `CONCURRENTLY` so it never takes the ACCESS EXCLUSIVE lock a plain
/// `CREATE INDEX` would.
#[derive(Serialize, Deserialize, Debug)]
pub struct CreateIndex {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
}

#[typetag::serde(name = "create_index")]
#[async_trait::async_trait]
impl Operation for CreateIndex {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.name)?;
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if self.columns.is_empty() {
            return Err(EngineError::FieldRequired("columns", "create_index"));
        }
        for column in &self.columns {
            if table.get_column(column).is_none() {
                return Err(EngineError::ColumnDoesNotExist(column.clone(), self.table.clone()));
            }
        }
        Ok(())
    }

    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = CreateIndexConcurrently {
            table: self.table.clone(),
            index_name: self.name.clone(),
            columns: self.columns.clone(),
            cancel: ctx.cancel.clone(),
        };
        action.execute(db).await?;
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", crate::ident::quote_ident(&self.name)))
            .await
            .map_err(EngineError::Other)
    }
}
