use serde::{Deserialize, Serialize};

use crate::action::{CreateUniqueIndexConcurrently, DBAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::unique_index_name;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Make an existing column (or column set) UNIQUE.
/// Built as a `CONCURRENTLY` index, same as `create_constraint`'s unique
/// variant, then attached as a named constraint at `complete`. Unlike
/// `set_not_null`, there's no deferred-validation step: a unique index
/// build itself scans and fails immediately if duplicate values exist.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetUnique {
    pub table: String,
    pub columns: Vec<String>,
    pub name: Option<String>,
}

impl SetUnique {
    fn index_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| unique_index_name(&self.table, &self.columns.join("_")))
    }
}

#[typetag::serde(name = "set_unique")]
#[async_trait::async_trait]
impl Operation for SetUnique {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if self.columns.is_empty() {
            return Err(EngineError::FieldRequired("columns", "set_unique"));
        }
        for column in &self.columns {
            if table.get_column(column).is_none() {
                return Err(EngineError::ColumnDoesNotExist(column.clone(), self.table.clone()));
            }
        }
        Ok(())
    }

    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = CreateUniqueIndexConcurrently {
            table: self.table.clone(),
            index_name: self.index_name(),
            columns: self.columns.clone(),
            cancel: ctx.cancel.clone(),
        };
        action.execute(db).await?;
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!(
            "ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE USING INDEX {name}",
            table = quote_ident(&self.table),
            name = quote_ident(&self.index_name()),
        ))
        .await
        .map_err(EngineError::Other)
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", quote_ident(&self.index_name())))
            .await
            .map_err(EngineError::Other)
    }
}
