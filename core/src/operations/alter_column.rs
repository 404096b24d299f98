use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::{
    DBAction, DropColumn as DropColumnAction, DropConstraint as DropConstraintAction, EnsureNeedsBackfillColumn,
    RenameColumn as RenameColumnAction, SetColumnNotNull, SetDefault as SetDefaultAction, SetNotNullNotValid,
    ValidateConstraint,
};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::duplicator::Duplicator;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::{self, validate_user_identifier};
use crate::schema::Schema;
use crate::trigger::{TriggerConfig, TriggerSynthesizer};

use super::{MigrationContext, Operation};

/// The sub-change an `alter_column` carries, at most one at a time alongside
/// an optional rename. `change_type`, `set_check_constraint` and
/// `set_foreign_key` are split out as their own operations; this one covers
/// the remaining three, which all share the same duplication protocol.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct AlterColumnChanges {
    pub name: Option<String>,
    pub nullable: Option<bool>,
    pub unique: Option<bool>,
    pub default: Option<String>,
}

/// Change an existing column's name, nullability, uniqueness, or default
///. A rename with no other change is purely
/// virtual, same as `rename_column`. Any other change goes through the full
/// duplicate/trigger/backfill protocol since old-schema
/// writers must keep seeing the original column's behavior until `complete`.
#[derive(Serialize, Deserialize, Debug)]
pub struct AlterColumn {
    pub table: String,
    pub column: String,
    /// Expression that computes the shadow column's value from a row
    /// written through the old schema. Required when `changes.nullable`
    /// is being set to `false` and the column may already contain NULLs.
    pub up: Option<String>,
    /// Expression that computes the original column's value from a row
    /// written through the new schema. Defaults to a plain copy.
    pub down: Option<String>,
    #[serde(default)]
    pub changes: AlterColumnChanges,
}

impl AlterColumn {
    fn final_name(&self) -> &str {
        self.changes.name.as_deref().unwrap_or(&self.column)
    }

    fn sub_op_count(&self) -> usize {
        [self.changes.nullable.is_some(), self.changes.unique.is_some(), self.changes.default.is_some()]
            .into_iter()
            .filter(|set| *set)
            .count()
    }

    fn is_rename_only(&self) -> bool {
        self.sub_op_count() == 0
    }

    fn shadow_name(&self) -> String {
        naming::shadow_column(&self.column)
    }
}

#[typetag::serde(name = "alter_column")]
#[async_trait::async_trait]
impl Operation for AlterColumn {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        if let Some(new_name) = &self.changes.name {
            validate_user_identifier(new_name)?;
        }
        naming::validate_generated_names(&self.table, &self.column)?;

        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        let column = table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?;

        if let Some(new_name) = &self.changes.name {
            if new_name != &self.column && table.get_column(new_name).is_some() {
                return Err(EngineError::ColumnAlreadyExists(new_name.clone(), self.table.clone()));
            }
        }

        if self.sub_op_count() > 1 {
            return Err(EngineError::MultipleAlterColumnChanges(self.column.clone()));
        }

        if self.is_rename_only() {
            if self.changes.name.is_none() {
                return Err(EngineError::AlterColumnNoChanges(self.column.clone()));
            }
            if self.up.is_some() || self.down.is_some() {
                return Err(EngineError::InvalidName(
                    self.column.clone(),
                    "a rename-only alter_column may not specify up/down SQL",
                ));
            }
            return Ok(());
        }

        if self.changes.nullable == Some(false) {
            if !column.nullable {
                return Err(EngineError::ColumnIsNotNullable(self.column.clone()));
            }
            if self.up.is_none() {
                return Err(EngineError::UpSqlMustBeColumnDefault(self.column.clone()));
            }
        }
        if self.changes.nullable == Some(true) && column.nullable {
            return Err(EngineError::ColumnIsNullable(self.column.clone()));
        }

        if self.changes.unique == Some(false) {
            return Err(EngineError::InvalidName(
                self.column.clone(),
                "alter_column unique=false is not supported; use drop_constraint",
            ));
        }

        if table.identity_columns().is_none() {
            return Err(EngineError::BackfillNotPossible(self.table.clone()));
        }

        Ok(())
    }

    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        let column = table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?
            .clone();

        if self.is_rename_only() {
            schema.change_table(&self.table, |t| {
                t.change_column(&self.column, |c| {
                    if let Some(new_name) = &self.changes.name {
                        c.set_name(new_name);
                    }
                });
            });
            return Ok(());
        }

        let shadow = self.shadow_name();
        Duplicator::new(&table, &column, ctx.cancel.clone()).run(db).await?;

        if let Some(default_expr) = &self.changes.default {
            let action = SetDefaultAction {
                table: table.real_name.clone(),
                column: shadow.clone(),
                default: Some(default_expr.clone()),
            };
            action.execute(db).await?;
        }

        if self.changes.nullable == Some(false) {
            let check_name = naming::not_null_check_name(&table.real_name, &shadow);
            let action = SetNotNullNotValid {
                table: table.real_name.clone(),
                column: shadow.clone(),
                check_name,
            };
            action.execute(db).await?;
        }

        if self.changes.unique == Some(true) {
            let index_name = naming::unique_index_name(&table.real_name, self.final_name());
            let action = crate::action::CreateUniqueIndexConcurrently {
                table: table.real_name.clone(),
                index_name,
                columns: vec![shadow.clone()],
                cancel: ctx.cancel.clone(),
            };
            action.execute(db).await?;
        }

        let up = self.up.clone().unwrap_or_else(|| quote_ident(&self.column));
        let down = self.down.clone().unwrap_or_else(|| quote_ident(&shadow));

        let mut table_columns = table.column_type_pairs();
        table_columns.push((shadow.clone(), column.data_type.clone()));

        let trigger_config = TriggerConfig {
            table: table.real_name.clone(),
            column: self.column.clone(),
            shadow_column: shadow.clone(),
            up,
            down,
            table_columns,
        };
        TriggerSynthesizer::new(&trigger_config).create(db).await?;

        EnsureNeedsBackfillColumn { table: table.real_name.clone() }.execute(db).await?;

        let identity = table.identity_columns().ok_or_else(|| EngineError::BackfillNotPossible(self.table.clone()))?;
        let task = BackfillTask {
            table: &table.real_name,
            identity_columns: &identity,
            touch_column: &self.column,
            batch_size: 1000,
            batch_delay: Duration::from_millis(0),
        };
        task.run(db, &ctx.cancel, |_| {}).await?;

        schema.change_table(&self.table, |t| {
            t.change_column(&self.column, |c| {
                c.set_column(&shadow);
                if let Some(new_name) = &self.changes.name {
                    c.set_name(new_name);
                }
            });
        });

        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        if self.is_rename_only() {
            let action = RenameColumnAction {
                table: self.table.clone(),
                from: self.column.clone(),
                to: self.final_name().to_string(),
            };
            return action.execute(db).await;
        }

        let shadow = self.shadow_name();

        let trigger_config = TriggerConfig {
            table: self.table.clone(),
            column: self.column.clone(),
            shadow_column: shadow.clone(),
            up: String::new(),
            down: String::new(),
            table_columns: Vec::new(),
        };
        TriggerSynthesizer::new(&trigger_config).drop(db).await?;

        DropColumnAction {
            table: self.table.clone(),
            column: naming::NEEDS_BACKFILL_COLUMN.to_string(),
        }
        .execute(db)
        .await?;

        // Promote the deferred not-null check the duplicator (or, when this
        // operation is itself the one establishing NOT NULL, `start`'s own
        // explicit call) left on the shadow column — present whenever the
        // original column was NOT NULL, whether or not nullability is what
        // this operation is actually changing.
        let check_name = naming::not_null_check_name(&self.table, &shadow);
        if constraint_exists(db, &self.table, &check_name).await? {
            ValidateConstraint {
                table: self.table.clone(),
                name: check_name.clone(),
            }
            .execute(db)
            .await?;
            SetColumnNotNull {
                table: self.table.clone(),
                column: shadow.clone(),
            }
            .execute(db)
            .await?;
            DropConstraintAction {
                table: self.table.clone(),
                name: check_name,
            }
            .execute(db)
            .await?;
        }

        DropColumnAction {
            table: self.table.clone(),
            column: self.column.clone(),
        }
        .execute(db)
        .await?;

        RenameColumnAction {
            table: self.table.clone(),
            from: shadow,
            to: self.final_name().to_string(),
        }
        .execute(db)
        .await?;

        if self.changes.unique == Some(true) {
            let index_name = naming::unique_index_name(&self.table, self.final_name());
            db.run(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE USING INDEX {name}",
                table = quote_ident(&self.table),
                name = quote_ident(&index_name),
            ))
            .await
            .map_err(EngineError::Other)?;
        }

        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        if self.is_rename_only() {
            return Ok(());
        }

        let shadow = self.shadow_name();
        let trigger_config = TriggerConfig {
            table: self.table.clone(),
            column: self.column.clone(),
            shadow_column: shadow.clone(),
            up: String::new(),
            down: String::new(),
            table_columns: Vec::new(),
        };
        TriggerSynthesizer::new(&trigger_config).drop(db).await?;

        DropColumnAction {
            table: self.table.clone(),
            column: naming::NEEDS_BACKFILL_COLUMN.to_string(),
        }
        .execute(db)
        .await?;

        if self.changes.unique == Some(true) {
            let index_name = naming::unique_index_name(&self.table, self.final_name());
            db.run(&format!("DROP INDEX CONCURRENTLY IF EXISTS {}", quote_ident(&index_name)))
                .await
                .map_err(EngineError::Other)?;
        }

        DropColumnAction {
            table: self.table.clone(),
            column: shadow,
        }
        .execute(db)
        .await
    }
}

async fn constraint_exists(db: &mut dyn Connection, table: &str, name: &str) -> Result<bool> {
    let rows = db
        .query(&format!(
            "SELECT 1 FROM pg_constraint c JOIN pg_class t ON t.oid = c.conrelid
             WHERE t.relname = {table} AND c.conname = {name}",
            table = crate::ident::quote_literal(table),
            name = crate::ident::quote_literal(name),
        ))
        .await
        .map_err(EngineError::Other)?;
    Ok(!rows.is_empty())
}
