use serde::{Deserialize, Serialize};

use crate::action::{CommentTarget, CreateTable as CreateTableAction, DBAction, DropTable as DropTableAction, SetComment as SetCommentAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// How a column's value is produced by Postgres itself rather than
/// supplied by the writer. `Identity` and `Expression` are mutually
/// exclusive by construction (an enum, not two optional fields) — a column
/// can't be both a `GENERATED ... AS IDENTITY` and a `GENERATED ... AS
/// (expr) STORED` column.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedColumn {
    Identity { always: bool },
    Expression(String),
}

/// A single column definition, shared by `create_table` and `add_column`
///.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub r#type: String,
    #[serde(default)]
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub generated: Option<GeneratedColumn>,
}

/// Postgres's implicitly-defaulted integer types
/// (`SERIAL`/`BIGSERIAL`/`SMALLSERIAL` expand to an integer column plus an
/// owned sequence default at parse time), which `add_column`'s validate
/// treats the same as an explicit `default` when deciding whether `up` SQL
/// is required.
pub(super) fn is_serial_type(type_name: &str) -> bool {
    matches!(
        type_name.trim().to_ascii_lowercase().as_str(),
        "serial" | "serial4" | "bigserial" | "serial8" | "smallserial" | "serial2"
    )
}

impl ColumnDef {
    fn render(&self) -> String {
        let mut parts = vec![quote_ident(&self.name), self.r#type.clone()];
        match &self.generated {
            Some(GeneratedColumn::Identity { always }) => {
                parts.push(format!("GENERATED {} AS IDENTITY", if *always { "ALWAYS" } else { "BY DEFAULT" }));
            }
            Some(GeneratedColumn::Expression(expr)) => {
                parts.push(format!("GENERATED ALWAYS AS ({expr}) STORED"));
            }
            None => {
                if let Some(default) = &self.default {
                    parts.push(format!("DEFAULT {default}"));
                }
            }
        }
        if !self.nullable {
            parts.push("NOT NULL".to_string());
        }
        parts.join(" ")
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[typetag::serde(name = "create_table")]
#[async_trait::async_trait]
impl Operation for CreateTable {
    async fn validate(&self, _db: &mut dyn Connection, _schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.table)?;
        if self.columns.is_empty() {
            return Err(EngineError::FieldRequired("columns", "create_table"));
        }
        for column in &self.columns {
            validate_user_identifier(&column.name)?;
            if column.generated.is_some() && column.default.is_some() {
                return Err(EngineError::InvalidGeneratedColumn(column.name.clone()));
            }
        }
        for pk_col in &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == pk_col) {
                return Err(EngineError::InvalidPrimaryKey(
                    self.table.clone(),
                    "primary_key references a column not in this table",
                ));
            }
        }
        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let action = CreateTableAction {
            name: self.table.clone(),
            column_defs: self.columns.iter().map(ColumnDef::render).collect(),
            primary_key: self.primary_key.clone(),
        };
        action.execute(db).await?;

        for column in &self.columns {
            if let Some(comment) = &column.comment {
                let action = SetCommentAction {
                    object: CommentTarget::Column(self.table.clone(), column.name.clone()),
                    comment: Some(comment.clone()),
                };
                action.execute(db).await?;
            }
        }

        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()> {
        let action = DropTableAction { name: self.table.clone() };
        action.execute(db).await
    }
}
