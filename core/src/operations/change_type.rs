use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::{
    DBAction, DropColumn as DropColumnAction, DropConstraint as DropConstraintAction, EnsureNeedsBackfillColumn,
    RenameColumn as RenameColumnAction, SetColumnNotNull, ValidateConstraint,
};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::duplicator::Duplicator;
use crate::error::{EngineError, Result};
use crate::naming;
use crate::schema::Schema;
use crate::trigger::{TriggerConfig, TriggerSynthesizer};

use super::{MigrationContext, Operation};

/// Change an existing column's data type. Unlike
/// `alter_column`'s other sub-changes, a type change has no sensible
/// default conversion in either direction, so both `up` and `down` are
/// mandatory.
#[derive(Serialize, Deserialize, Debug)]
pub struct ChangeType {
    pub table: String,
    pub column: String,
    #[serde(rename = "type")]
    pub new_type: String,
    /// Expression converting the old-typed value to the new type.
    pub up: String,
    /// Expression converting the new-typed value back to the old type.
    pub down: String,
}

impl ChangeType {
    fn shadow_name(&self) -> String {
        naming::shadow_column(&self.column)
    }
}

#[typetag::serde(name = "change_type")]
#[async_trait::async_trait]
impl Operation for ChangeType {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        naming::validate_generated_names(&self.table, &self.column)?;

        if self.new_type.trim().is_empty() {
            return Err(EngineError::FieldRequired("type", "change_type"));
        }
        if self.up.trim().is_empty() {
            return Err(EngineError::FieldRequired("up", "change_type"));
        }
        if self.down.trim().is_empty() {
            return Err(EngineError::FieldRequired("down", "change_type"));
        }

        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?;

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

        let shadow = self.shadow_name();
        Duplicator::new(&table, &column, ctx.cancel.clone())
            .with_type(&self.new_type)
            .run(db)
            .await?;

        let mut table_columns = table.column_type_pairs();
        table_columns.push((shadow.clone(), self.new_type.clone()));

        let trigger_config = TriggerConfig {
            table: table.real_name.clone(),
            column: self.column.clone(),
            shadow_column: shadow.clone(),
            up: self.up.clone(),
            down: self.down.clone(),
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
            });
        });

        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
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

        // If the original column was NOT NULL, the duplicator left a
        // deferred NOT VALID check on the shadow column carrying that
        // constraint forward; validate and promote it to a real NOT NULL
        // before the rename so the type change doesn't silently drop it.
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
            to: self.column.clone(),
        }
        .execute(db)
        .await
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
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
