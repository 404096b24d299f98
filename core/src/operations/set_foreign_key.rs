use serde::{Deserialize, Serialize};

use crate::action::{DBAction, DropConstraint as DropConstraintAction, ValidateConstraint};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::validate_user_identifier;
use crate::schema::Schema;

use super::{MigrationContext, Operation};

/// `ON DELETE`/`ON UPDATE` behavior for a foreign key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// `MATCH` clause for a multi-column foreign key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Simple,
    Full,
    Partial,
}

impl MatchType {
    fn as_sql(&self) -> Option<&'static str> {
        match self {
            MatchType::Simple => None,
            MatchType::Full => Some("MATCH FULL"),
            MatchType::Partial => Some("MATCH PARTIAL"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForeignKeyReference {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
    #[serde(default)]
    pub match_type: MatchType,
}

/// Attach a foreign key to a column. Like `set_check_constraint`, the column's identity
/// doesn't change, so this adds the constraint `NOT VALID` directly rather
/// than going through the duplication protocol.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetForeignKey {
    pub table: String,
    pub column: String,
    pub name: String,
    pub references: ForeignKeyReference,
}

#[typetag::serde(name = "set_foreign_key")]
#[async_trait::async_trait]
impl Operation for SetForeignKey {
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        validate_user_identifier(&self.name)?;
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;

        table
            .get_column(&self.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.column.clone(), self.table.clone()))?;

        if table.get_constraint(&self.name).is_some() {
            return Err(EngineError::ConstraintAlreadyExists(self.name.clone(), self.table.clone()));
        }

        let referenced = schema.get_table(db, &self.references.table).await.map_err(EngineError::Other)?;
        referenced
            .get_column(&self.references.column)
            .ok_or_else(|| EngineError::ColumnDoesNotExist(self.references.column.clone(), self.references.table.clone()))?;

        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let match_clause = self.references.match_type.as_sql().map(|m| format!(" {m}")).unwrap_or_default();

        db.run(&format!(
            "ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({column}) REFERENCES {ref_table} ({ref_column}){match_clause} \
             ON DELETE {on_delete} ON UPDATE {on_update} NOT VALID",
            table = quote_ident(&self.table),
            name = quote_ident(&self.name),
            column = quote_ident(&self.column),
            ref_table = quote_ident(&self.references.table),
            ref_column = quote_ident(&self.references.column),
            on_delete = self.references.on_delete.as_sql(),
            on_update = self.references.on_update.as_sql(),
        ))
        .await
        .map_err(EngineError::Other)?;

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
