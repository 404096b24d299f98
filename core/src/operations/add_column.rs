use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::{AddColumn as AddColumnAction, DBAction, DropColumn as DropColumnAction, EnsureNeedsBackfillColumn};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::{self, validate_user_identifier};
use crate::schema::Schema;
use crate::trigger::{TriggerConfig, TriggerSynthesizer};

use super::create_table::is_serial_type;
use super::{ColumnDef, MigrationContext, Operation};

/// Add a new column to an existing table. If the
/// column isn't nullable, `up` must produce its value for rows written
/// through the old schema's view (which doesn't mention the new column at
/// all), and the backfiller populates it for rows that already existed.
#[derive(Serialize, Deserialize, Debug)]
pub struct AddColumn {
    pub table: String,
    pub column: ColumnDef,
    pub up: Option<String>,
}

#[typetag::serde(name = "add_column")]
#[async_trait::async_trait]
impl Operation for AddColumn {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.column.name)?;

        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        if table.get_column(&self.column.name).is_some() {
            return Err(EngineError::ColumnAlreadyExists(self.column.name.clone(), self.table.clone()));
        }

        // GENERATED columns (identity or expression) can only be created
        // alongside their table in `create_table`: adding one to a table
        // that already has rows would need Postgres to compute every
        // existing row's value itself, which isn't expressible as the
        // nullable-then-backfill sequence the rest of this operation relies
        // on. Fatal, not a `start()`-time surprise.
        if self.column.generated.is_some() {
            return Err(EngineError::InvalidGeneratedColumn(self.column.name.clone()));
        }

        let has_implicit_default = self.column.default.is_some() || is_serial_type(&self.column.r#type);
        if !self.column.nullable && !has_implicit_default && self.up.is_none() {
            return Err(EngineError::UpSqlMustBeColumnDefault(self.column.name.clone()));
        }

        Ok(())
    }

    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;

        let action = AddColumnAction {
            table: table.real_name.clone(),
            column: self.column.name.clone(),
            data_type: self.column.r#type.clone(),
            nullable: true,
            default: self.column.default.clone(),
        };
        action.execute(db).await?;

        if let Some(up) = &self.up {
            let mut table_columns = table.column_type_pairs();
            table_columns.push((self.column.name.clone(), self.column.r#type.clone()));

            let trigger_config = TriggerConfig {
                table: table.real_name.clone(),
                column: self.column.name.clone(),
                shadow_column: self.column.name.clone(),
                up: up.clone(),
                // A new column has no old-schema counterpart to write back
                // to, so only the up trigger is installed; `down` is unused.
                down: String::new(),
                table_columns,
            };
            TriggerSynthesizer::new(&trigger_config).create_up_only(db).await?;

            EnsureNeedsBackfillColumn { table: table.real_name.clone() }.execute(db).await?;

            let identity = table.identity_columns().ok_or_else(|| EngineError::BackfillNotPossible(self.table.clone()))?;
            let task = BackfillTask {
                table: &table.real_name,
                identity_columns: &identity,
                touch_column: &self.column.name,
                batch_size: 1000,
                batch_delay: Duration::from_millis(0),
            };
            task.run(db, &ctx.cancel, |_| {}).await?;
        }

        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        if self.up.is_some() {
            let trigger_config = TriggerConfig {
                table: self.table.clone(),
                column: self.column.name.clone(),
                shadow_column: self.column.name.clone(),
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
        }

        if !self.column.nullable {
            db.run(&format!(
                "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL",
                table = quote_ident(&self.table),
                column = quote_ident(&self.column.name),
            ))
            .await
            .map_err(EngineError::Other)?;
        }

        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        if self.up.is_some() {
            let trigger_config = TriggerConfig {
                table: self.table.clone(),
                column: self.column.name.clone(),
                shadow_column: self.column.name.clone(),
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
        }

        let action = DropColumnAction {
            table: self.table.clone(),
            column: self.column.name.clone(),
        };
        action.execute(db).await
    }
}
