//! Bit-stable identifier conventions. Centralized so every component (duplicator, trigger
//! synthesizer, backfiller, operations) derives the same names from the
//! same inputs.

use crate::error::{EngineError, Result};
use crate::ident::validate_identifier;

pub const SHADOW_PREFIX: &str = "_pgvista_new_";
pub const DUP_PREFIX: &str = "_pgvista_dup_";
pub const NOT_NULL_CHECK_PREFIX: &str = "_pgvista_check_not_null_";
pub const UNIQUE_INDEX_PREFIX: &str = "_pgvista_uniq_";
pub const TRIGGER_PREFIX: &str = "_pgvista_trigger_";
pub const STATE_SCHEMA: &str = "pgvista";

/// Per-row sentinel added to a table for the duration of any backfilling
/// operation. Every row present when it's added starts out `true`
/// ("still needs its triggers' initial pass"); the backfill batches clear it
/// row by row as they touch each one, and it's dropped once the operation
/// completes or rolls back.
pub const NEEDS_BACKFILL_COLUMN: &str = "_pgvista_needs_backfill";

/// Name of the shadow column that materializes the new representation of
/// `column` while a migration is in progress.
pub fn shadow_column(column: &str) -> String {
    format!("{SHADOW_PREFIX}{column}")
}

/// Name of a duplicated constraint or index, derived from the original name.
pub fn duplicated_name(original: &str) -> String {
    format!("{DUP_PREFIX}{original}")
}

/// Name of the deferred NOT VALID CHECK constraint that stands in for a
/// NOT NULL attribute until Complete can flip it without a full table scan.
pub fn not_null_check_name(table: &str, column: &str) -> String {
    format!("{NOT_NULL_CHECK_PREFIX}{table}_{column}")
}

/// Name of the concurrently-built unique index backing a shadow column's
/// UNIQUE constraint.
pub fn unique_index_name(table: &str, column: &str) -> String {
    format!("{UNIQUE_INDEX_PREFIX}{table}_{column}")
}

/// Name of the trigger (and its backing function) for a `(table, column)`
/// pair, in the given direction.
pub fn trigger_name(table: &str, column: &str, direction: Direction) -> String {
    match direction {
        Direction::Up => format!("{TRIGGER_PREFIX}{table}_{column}_up"),
        Direction::Down => format!("{TRIGGER_PREFIX}{table}_{column}_down"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    #[serde(rename = "up")]
    Up,
    #[serde(rename = "down")]
    Down,
}

/// Name of the per-migration schema that exposes that migration's view of
/// every table.
pub fn version_schema_name(name: &str) -> String {
    format!("migration_{name}")
}

/// Validate every generated identifier this module can produce for a given
/// `(table, column)` pair, surfacing `EngineError::InvalidLength` for any
/// that exceed PostgreSQL's 63-byte limit.
pub fn validate_generated_names(table: &str, column: &str) -> Result<()> {
    for name in [
        shadow_column(column),
        not_null_check_name(table, column),
        unique_index_name(table, column),
        trigger_name(table, column, Direction::Up),
        trigger_name(table, column, Direction::Down),
    ] {
        validate_identifier(&name)?;
    }
    Ok(())
}

/// Validate a user-supplied identifier (table/column/constraint/index name).
pub fn validate_user_identifier(name: &str) -> Result<()> {
    validate_identifier(name)
}

/// Deterministic action ID for crash recovery.
pub fn action_id(kind: &str, parts: &[&str]) -> String {
    let mut id = kind.to_string();
    for part in parts {
        id.push('_');
        id.push_str(part);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_column_naming_is_stable() {
        assert_eq!(shadow_column("email"), "_pgvista_new_email");
    }

    #[test]
    fn action_ids_are_stable_and_distinguishing() {
        let a = action_id("create_fk_constraint", &["orders", "customer_id_fkey"]);
        let b = action_id("create_fk_constraint", &["orders", "customer_id_fkey"]);
        assert_eq!(a, b);
        let c = action_id("create_fk_constraint", &["orders", "other_fkey"]);
        assert_ne!(a, c);
    }

    #[test]
    fn long_generated_names_are_rejected() {
        let long_table = "t".repeat(60);
        assert!(matches!(
            validate_generated_names(&long_table, "c"),
            Err(EngineError::InvalidLength(_, _))
        ));
    }
}
