//! The closed set of migration operations. Each operation is a
//! `#[typetag::serde]` trait object so a migration file's `operations` list
//! deserializes directly into the right concrete type, tagged by its `type`
//! field.
//!
//! Every operation implements a four-phase contract:
//!   - `validate`: pure, no DDL; checks the operation's own fields and their
//!     consistency with the virtual `Schema`.
//!   - `start`: issues the DDL that makes both the old and new shape of the
//!     table concurrently queryable (duplicator/trigger/backfill calls for
//!     column-shaped operations; a single DDL statement for table/constraint
//!     operations that don't need a shadow column).
//!   - `complete`: drops whatever scaffolding `start` put in place (shadow
//!     triggers, the old column) and leaves only the new shape behind.
//!   - `rollback`: undoes `start`'s effects, leaving the table exactly as
//!     `validate` found it.

mod add_column;
mod alter_column;
mod change_type;
mod create_constraint;
mod create_index;
mod create_table;
mod drop_column;
mod drop_constraint;
mod drop_index;
mod drop_multi_column_constraint;
mod drop_table;
mod raw_sql;
mod rename_column;
mod rename_constraint;
mod rename_table;
mod set_check_constraint;
mod set_comment;
mod set_default;
mod set_foreign_key;
mod set_not_null;
mod set_replica_identity;
mod set_unique;

pub use add_column::AddColumn;
pub use alter_column::AlterColumn;
pub use change_type::ChangeType;
pub use create_constraint::CreateConstraint;
pub use create_index::CreateIndex;
pub use create_table::{ColumnDef, CreateTable, GeneratedColumn};
pub use drop_column::DropColumn;
pub use drop_constraint::DropConstraint;
pub use drop_index::DropIndex;
pub use drop_multi_column_constraint::DropMultiColumnConstraint;
pub use drop_table::DropTable;
pub use raw_sql::{RawSql, Sql};
pub use rename_column::RenameColumn;
pub use rename_constraint::RenameConstraint;
pub use rename_table::RenameTable;
pub use set_check_constraint::SetCheckConstraint;
pub use set_comment::SetComment;
pub use set_default::SetDefault;
pub use set_foreign_key::SetForeignKey;
pub use set_not_null::SetNotNull;
pub use set_replica_identity::{ReplicaIdentityKind, SetReplicaIdentity};
pub use set_unique::SetUnique;

use std::fmt::Debug;

use tokio_util::sync::CancellationToken;

use crate::{db::Connection, error::Result, schema::Schema};

#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub migration_index: usize,
    pub operation_index: usize,
    /// Cancelled by the runner's caller (e.g. a signal handler) to interrupt
    /// a long-running `start` — chiefly the backfill loop and
    /// `wait_for_index_valid`'s poll, both of which check this between
    /// iterations rather than mid-statement.
    pub cancel: CancellationToken,
}

impl MigrationContext {
    pub fn new(migration_index: usize, operation_index: usize, cancel: CancellationToken) -> Self {
        MigrationContext {
            migration_index,
            operation_index,
            cancel,
        }
    }
}

#[typetag::serde(tag = "type")]
#[async_trait::async_trait]
pub trait Operation: Debug + Send + Sync {
    /// Pure validation against the virtual schema. Must never
    /// issue DDL; callers run this against a `FakeConnection`.
    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()>;

    /// Begin the migration window: make the new shape queryable alongside
    /// the old one.
    async fn start(&self, ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()>;

    /// Finish the migration window: drop the old shape's scaffolding.
    async fn complete(&self, ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()>;

    /// Undo `start`, restoring the table to its pre-migration shape.
    async fn rollback(&self, ctx: &MigrationContext, db: &mut dyn Connection) -> Result<()>;

    /// An isolated operation may not share a migration with any other
    /// operation (e.g. `set_replica_identity`, whose effect is immediate and
    /// whole-table and doesn't compose with a duplication/backfill window
    /// another operation in the same migration might be running).
    fn is_isolated(&self) -> bool {
        false
    }

    /// An operation that can change the physical catalog in ways the
    /// virtual `Schema` doesn't track structurally (chiefly `raw_sql`/`sql`,
    /// whose `up` statement is opaque to the engine) asks the runner to
    /// re-derive the version schema's views from the live catalog after
    /// `start`, rather than trusting only the `Schema`'s own change-tracking.
    fn requires_schema_refresh(&self) -> bool {
        false
    }
}
