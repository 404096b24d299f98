//! The column duplicator: given an existing column, materialize
//! a shadow column that will become the column's new physical home, copying
//! over every piece of schema that referenced the original so the shadow
//! column is constrained identically (modulo whatever the operation is
//! changing) before the backfill and triggers bring its data in sync.
//!
//! Steps, in order:
//!   1. Add the shadow column (nullable, regardless of the original's
//!      nullability — the triggers and backfill populate it before any
//!      NOT NULL is enforced).
//!   2. If the original column is NOT NULL, add a deferred `NOT VALID` CHECK
//!      carrying that constraint onto the shadow column, so an operation
//!      that doesn't itself touch nullability (e.g. `change_type`) doesn't
//!      silently drop it; the owning operation's `complete` validates and
//!      promotes this check the same way `set_not_null`'s own does.
//!   3. Copy the DEFAULT, swallowing a datatype mismatch (42804): the new
//!      type may not accept the old default, which is fine, the operation
//!      is expected to supply its own if needed.
//!   4. Copy the COMMENT.
//!   5. Copy CHECK constraints, rewriting the original column name to the
//!      shadow column name via `ident::rewrite_identifiers`, swallowing
//!      undefined-function errors (42883) the same way defaults are.
//!   6. Duplicate a UNIQUE constraint as a concurrently-built unique index.
//!   7. Duplicate foreign keys referencing or referenced by the column.
//!   8. Duplicate secondary indexes that include the column.

use tokio_util::sync::CancellationToken;

use crate::action::{
    CreateCheckConstraintNotValid, CreateForeignKeyNotValid, CreateIndexConcurrently, CreateUniqueIndexConcurrently,
    DBAction, SetComment, SetDefault, SetNotNullNotValid,
};
use crate::db::Connection;
use crate::error::{sqlstate, EngineError, Result};
use crate::ident::{quote_ident, rewrite_identifiers};
use crate::naming;
use crate::schema::{Column, ConstraintKind, Table};

pub struct Duplicator<'a> {
    pub table: &'a Table,
    pub column: &'a Column,
    /// Overrides the shadow column's data type; `None` keeps the original's.
    pub new_type: Option<&'a str>,
    cancel: CancellationToken,
}

impl<'a> Duplicator<'a> {
    pub fn new(table: &'a Table, column: &'a Column, cancel: CancellationToken) -> Self {
        Duplicator {
            table,
            column,
            new_type: None,
            cancel,
        }
    }

    pub fn with_type(mut self, new_type: &'a str) -> Self {
        self.new_type = Some(new_type);
        self
    }

    pub fn shadow_column_name(&self) -> String {
        naming::shadow_column(&self.column.name)
    }

    pub async fn run(&self, db: &mut dyn Connection) -> Result<()> {
        let shadow = self.shadow_column_name();
        let data_type = self.new_type.unwrap_or(&self.column.data_type);

        // 1. Shadow column, always nullable until the backfill/triggers
        // catch it up; the operation's own NOT NULL (if any) is enforced
        // later via the deferred-check pattern, not here.
        db.run(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {shadow} {data_type}",
            table = quote_ident(&self.table.real_name),
            shadow = quote_ident(&shadow),
        ))
        .await
        .map_err(EngineError::Other)?;

        // 2. Carry a NOT NULL original forward as a deferred check, so an
        // operation that's changing something other than nullability
        // (e.g. `change_type`) doesn't lose it across the rename at
        // `complete`. An operation that's itself establishing NOT NULL
        // (`set_not_null`, `alter_column`'s nullable sub-change) adds its
        // own check afterwards against a column that's still nullable here,
        // so this is a no-op for those.
        if !self.column.nullable {
            let check_name = naming::not_null_check_name(&self.table.real_name, &shadow);
            let action = SetNotNullNotValid {
                table: self.table.real_name.clone(),
                column: shadow.clone(),
                check_name,
            };
            action.execute(db).await?;
        }

        // 3. Default.
        if let Some(default) = &self.column.default {
            let action = SetDefault {
                table: self.table.real_name.clone(),
                column: shadow.clone(),
                default: Some(default.clone()),
            };
            if let Err(err) = action.execute(db).await {
                if !is_sqlstate(&err, sqlstate::DATATYPE_MISMATCH) {
                    return Err(err);
                }
            }
        }

        // 4. Comment.
        if let Some(comment) = &self.column.comment {
            let action = SetComment {
                object: crate::action::CommentTarget::Column(self.table.real_name.clone(), shadow.clone()),
                comment: Some(comment.clone()),
            };
            action.execute(db).await?;
        }

        // 5. CHECK constraints referencing this column.
        for constraint in &self.table.constraints {
            if let ConstraintKind::Check { expression } = &constraint.kind {
                if !mentions_column(expression, &self.column.name) {
                    continue;
                }

                let rewritten = rewrite_identifiers(expression, &[(&self.column.name, &shadow)]);
                let name = naming::duplicated_name(&constraint.name);

                let action = CreateCheckConstraintNotValid {
                    table: self.table.real_name.clone(),
                    name,
                    expression: rewritten,
                };

                if let Err(err) = action.execute(db).await {
                    if !is_sqlstate(&err, sqlstate::UNDEFINED_FUNCTION) {
                        return Err(err);
                    }
                }
            }
        }

        // 6. UNIQUE constraint covering exactly this column.
        for constraint in &self.table.constraints {
            if let ConstraintKind::Unique { columns } = &constraint.kind {
                if columns.as_slice() == [self.column.name.clone()] {
                    let index_name = naming::unique_index_name(&self.table.real_name, &shadow);
                    let action = CreateUniqueIndexConcurrently {
                        table: self.table.real_name.clone(),
                        index_name,
                        columns: vec![shadow.clone()],
                        cancel: self.cancel.clone(),
                    };
                    action.execute(db).await?;
                }
            }
        }

        // 7. Foreign keys where this column is the sole referencing column.
        for constraint in &self.table.constraints {
            if let ConstraintKind::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
            } = &constraint.kind
            {
                if columns.as_slice() == [self.column.name.clone()] {
                    let name = naming::duplicated_name(&constraint.name);
                    let action = CreateForeignKeyNotValid {
                        table: self.table.real_name.clone(),
                        name,
                        columns: vec![shadow.clone()],
                        referenced_table: referenced_table.clone(),
                        referenced_columns: referenced_columns.clone(),
                    };
                    action.execute(db).await?;
                }
            }
        }

        // 8. Secondary indexes that include this column. Composite indexes
        // keep their other columns as-is and substitute only the shadow
        // column in the position this column occupied.
        for index in &self.table.indexes {
            if index.columns.contains(&self.column.name) {
                let new_columns: Vec<String> = index
                    .columns
                    .iter()
                    .map(|c| if c == &self.column.name { shadow.clone() } else { c.clone() })
                    .collect();
                let index_name = naming::duplicated_name(&index.name);

                let action = CreateIndexConcurrently {
                    table: self.table.real_name.clone(),
                    index_name,
                    columns: new_columns,
                    cancel: self.cancel.clone(),
                };
                action.execute(db).await?;
            }
        }

        Ok(())
    }
}

fn mentions_column(expression: &str, column: &str) -> bool {
    // Same whole-word matching rule the rewriter itself uses, so "mentions"
    // and "rewrites" never disagree about what counts as a reference.
    rewrite_identifiers(expression, &[(column, "\u{0}MATCHED\u{0}")]).contains("\u{0}MATCHED\u{0}")
}

fn is_sqlstate(err: &EngineError, code: &str) -> bool {
    if let EngineError::Ddl { source, .. } = err {
        if let Some(pg_err) = source.downcast_ref::<tokio_postgres::Error>() {
            if let Some(db_err) = pg_err.as_db_error() {
                return db_err.code().code() == code;
            }
        }
    }
    false
}
