use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::{
    DBAction, DropColumn as DropColumnAction, DropConstraint as DropConstraintAction, EnsureNeedsBackfillColumn,
    RenameColumn as RenameColumnAction, SetColumnNotNull, SetNotNullNotValid, ValidateConstraint,
};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::duplicator::Duplicator;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::{self, not_null_check_name};
use crate::schema::Schema;
use crate::trigger::{TriggerConfig, TriggerSynthesizer};

use super::{MigrationContext, Operation};

/// Make an existing nullable column NOT NULL.
/// Goes through the same duplicate/trigger/backfill protocol as
/// `alter_column`'s nullable sub-change: a `NOT VALID` check added directly
/// to the real column would enforce against every writer immediately,
/// including ones still connected through the old (nullable) version's
/// view, so the new version gets its own column instead.
///
///   1. `start`: duplicate the column (the source column is nullable, so the
///      duplicator itself adds no not-null check to the shadow), add the
///      `NOT VALID` not-null check this operation is establishing directly,
///      wire up/down triggers — `up` fills NULLs for rows written through
///      the old version, `down` defaults to a plain copy — then backfill
///      every existing row.
///   2. `complete`: validate the check, promote to `SET NOT NULL`, drop the
///      now-redundant check constraint, drop the old column, rename the
///      shadow into its place.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetNotNull {
    pub table: String,
    pub column: String,
    /// Expression filling NULLs for rows written through the old version,
    /// e.g. `'unknown'`. Required: there is no sensible default.
    pub up: String,
}

impl SetNotNull {
    fn shadow_name(&self) -> String {
        naming::shadow_column(&self.column)
    }
}

#[typetag::serde(name = "set_not_null")]
#[async_trait::async_trait]
impl Operation for SetNotNull {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        naming::validate_generated_names(&self.table, &self.column)?;
        if self.up.trim().is_empty() {
            return Err(EngineError::FieldRequired("up", "set_not_null"));
        }

        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        let column = table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?;
        if !column.nullable {
            return Err(EngineError::ColumnIsNotNullable(self.column.clone()));
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

        let shadow = self.shadow_name();
        Duplicator::new(&table, &column, ctx.cancel.clone()).run(db).await?;

        let check_name = not_null_check_name(&table.real_name, &shadow);
        SetNotNullNotValid {
            table: table.real_name.clone(),
            column: shadow.clone(),
            check_name,
        }
        .execute(db)
        .await?;

        let mut table_columns = table.column_type_pairs();
        table_columns.push((shadow.clone(), column.data_type.clone()));

        let trigger_config = TriggerConfig {
            table: table.real_name.clone(),
            column: self.column.clone(),
            shadow_column: shadow.clone(),
            up: self.up.clone(),
            down: quote_ident(&self.column),
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
            t.change_column(&self.column, |c| c.set_column(&shadow));
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

        let check_name = not_null_check_name(&self.table, &shadow);
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
