use serde::{Deserialize, Serialize};

use crate::action::{CommentTarget, DBAction, SetComment as SetCommentAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum CommentTargetSpec {
    // Column is listed first: untagged enums try variants in order and a
    // struct deserializer ignores fields it doesn't recognize, so a Table
    // variant listed first would also match content that carries `column`.
    Column { table: String, column: String },
    Table { table: String },
}

/// Set or clear a COMMENT. A metadata-only
/// change; no shadow column or trigger is needed, so it applies directly at
/// `start` and `complete` is a no-op.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetComment {
    #[serde(flatten)]
    pub target: CommentTargetSpec,
    pub comment: Option<String>,
}

impl SetComment {
    fn action_target(&self) -> CommentTarget {
        match &self.target {
            CommentTargetSpec::Table { table } => CommentTarget::Table(table.clone()),
            CommentTargetSpec::Column { table, column } => CommentTarget::Column(table.clone(), column.clone()),
        }
    }

    fn table_name(&self) -> &str {
        match &self.target {
            CommentTargetSpec::Table { table } => table,
            CommentTargetSpec::Column { table, .. } => table,
        }
    }
}

#[typetag::serde(name = "set_comment")]
#[async_trait::async_trait]
impl Operation for SetComment {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, self.table_name()).await.map_err(EngineError::Other)?;
        if let CommentTargetSpec::Column { column, .. } = &self.target {
            if table.get_column(column).is_none() {
                return Err(EngineError::ColumnDoesNotExist(column.clone(), self.table_name().to_string()));
            }
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = SetCommentAction {
            object: self.action_target(),
            comment: self.comment.clone(),
        };
        action.execute(db).await?;
        schema.change_table(self.table_name(), |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        // Comments aren't versioned per-schema; leaving the new comment in
        // place after a rollback is consistent with Postgres's own
        // treatment of COMMENT as unversioned metadata.
        Ok(())
    }
}
