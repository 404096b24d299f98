use serde::{Deserialize, Serialize};

use crate::action::{CreateCheckConstraintNotValid, DBAction, DropConstraint as DropConstraintAction, ValidateConstraint};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Attach a CHECK constraint to a column. No shadow
/// column is needed: the column's identity doesn't change, only a table-level
/// constraint referencing it, so this follows the same deferred-validation
/// shape as `set_not_null` rather than the duplication protocol.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetCheckConstraint {
    pub table: String,
    pub column: String,
    pub name: String,
    pub constraint: String,
    #[serde(default)]
    pub no_inherit: bool,
}

#[typetag::serde(name = "set_check_constraint")]
#[async_trait::async_trait]
impl Operation for SetCheckConstraint {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.name)?;
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;

        table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?;

        if table.get_constraint(&self.name).is_some() {
            return Err(EngineError::ConstraintAlreadyExists(self.name.clone(), self.table.clone()));
        }
        if self.constraint.trim().is_empty() {
            return Err(EngineError::FieldRequired("constraint", "set_check_constraint"));
        }

        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        if self.no_inherit {
            db.run(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} CHECK ({expr}) NO INHERIT NOT VALID",
                table = quote_ident(&self.table),
                name = quote_ident(&self.name),
                expr = self.constraint,
            ))
            .await
            .map_err(EngineError::Other)?;
        } else {
            let action = CreateCheckConstraintNotValid {
                table: self.table.clone(),
                name: self.name.clone(),
                expression: self.constraint.clone(),
            };
            action.execute(db).await?;
        }

        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = ValidateConstraint {
            table: self.table.clone(),
            name: self.name.clone(),
        };
        action.execute(db).await
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropConstraintAction {
            table: self.table.clone(),
            name: self.name.clone(),
        };
        action.execute(db).await
    }
}
