use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropConstraint as DropConstraintAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// Drop a constraint that spans more than one column. Kept distinct from `drop_constraint`
/// because a multi-column constraint can't be re-derived for a single
/// column's shadow copy during an in-flight `alter_column`/`change_type` on
/// one of its columns — the duplicator skips duplicating it entirely
/// (schema.rs `get_constraints`), so dropping it never races a duplication.
#[derive(Serialize, Deserialize, Debug)]
pub struct DropMultiColumnConstraint {
    pub table: String,
    pub name: String,
}

#[typetag::serde(name = "drop_multi_column_constraint")]
#[async_trait::async_trait]
impl Operation for DropMultiColumnConstraint {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;
        let constraint = table
            .get_constraint(&self.name)
            .ok_or_else(|| EngineError::ConstraintDoesNotExist(self.name.clone(), self.table.clone()))?;

        let column_count = match &constraint.kind {
            crate::schema::ConstraintKind::PrimaryKey { columns } => columns.len(),
            crate::schema::ConstraintKind::Unique { columns } => columns.len(),
            crate::schema::ConstraintKind::ForeignKey { columns, .. } => columns.len(),
            crate::schema::ConstraintKind::Check { .. } => 1,
        };
        if column_count < 2 {
            return Err(EngineError::InvalidName(self.name.clone(), "is not a multi-column constraint"));
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
