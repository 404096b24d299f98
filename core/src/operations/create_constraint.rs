use serde::{Deserialize, Serialize};

use crate::action::{CreateCheckConstraintNotValid, CreateForeignKeyNotValid, CreateUniqueIndexConcurrently, DBAction, DropConstraint as DropConstraintAction, ValidateConstraint};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintSpec {
    Check { expression: String },
    Unique { columns: Vec<String> },
    ForeignKey {
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
    },
}

/// Create a new constraint on existing columns, using the deferred-validation pattern throughout:
/// add it `NOT VALID` (or as a concurrently-built unique index), then
/// validate against existing rows without an ACCESS EXCLUSIVE scan.
#[derive(Serialize, Deserialize, Debug)]
pub struct CreateConstraint {
    pub table: String,
    pub name: String,
    #[serde(flatten)]
    pub spec: ConstraintSpec,
}

#[typetag::serde(name = "create_constraint")]
#[async_trait::async_trait]
impl Operation for CreateConstraint {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.name)?;
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;

        if table.get_constraint(&self.name).is_some() {
            return Err(EngineError::ConstraintAlreadyExists(self.name.clone(), self.table.clone()));
        }

        let columns_to_check: &[String] = match &self.spec {
            ConstraintSpec::Unique { columns } => columns,
            ConstraintSpec::ForeignKey { columns, .. } => columns,
            ConstraintSpec::Check { .. } => &[],
        };
        for column in columns_to_check {
            if table.get_column(column).is_none() {
                return Err(EngineError::ColumnDoesNotExist(column.clone(), self.table.clone()));
            }
        }

        Ok(())
    }

    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        match &self.spec {
            ConstraintSpec::Check { expression } => {
                let action = CreateCheckConstraintNotValid {
                    table: self.table.clone(),
                    name: self.name.clone(),
                    expression: expression.clone(),
                };
                action.execute(db).await?;
            }
            ConstraintSpec::Unique { columns } => {
                let action = CreateUniqueIndexConcurrently {
                    table: self.table.clone(),
                    index_name: self.name.clone(),
                    columns: columns.clone(),
                    cancel: ctx.cancel.clone(),
                };
                action.execute(db).await?;
            }
            ConstraintSpec::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
            } => {
                let action = CreateForeignKeyNotValid {
                    table: self.table.clone(),
                    name: self.name.clone(),
                    columns: columns.clone(),
                    referenced_table: referenced_table.clone(),
                    referenced_columns: referenced_columns.clone(),
                };
                action.execute(db).await?;
            }
        }

        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        match &self.spec {
            ConstraintSpec::Check { .. } | ConstraintSpec::ForeignKey { .. } => {
                let action = ValidateConstraint {
                    table: self.table.clone(),
                    name: self.name.clone(),
                };
                action.execute(db).await
            }
            ConstraintSpec::Unique { .. } => {
                // The concurrently-built unique index already enforces
                // uniqueness; attach it to the catalog as a named
                // constraint so `\d` and pg_constraint introspection show it
                // the way a plain ADD CONSTRAINT ... UNIQUE would.
                db.run(&format!(
                    "ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE USING INDEX {name}",
                    table = crate::ident::quote_ident(&self.table),
                    name = crate::ident::quote_ident(&self.name),
                ))
                .await
                .map_err(EngineError::Other)
            }
        }
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        match &self.spec {
            ConstraintSpec::Unique { .. } => {
                db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", crate::ident::quote_ident(&self.name)))
                    .await
                    .map_err(EngineError::Other)
            }
            _ => {
                let action = DropConstraintAction {
                    table: self.table.clone(),
                    name: self.name.clone(),
                };
                action.execute(db).await
            }
        }
    }
}
