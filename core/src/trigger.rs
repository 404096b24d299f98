//! Trigger synthesizer: generates the BEFORE ROW trigger pair
//! that keeps an original column and its shadow column coherent while both
//! versions of the schema are live.
//!
//! Two triggers per column:
//!   - `up`: fires when a client connected through the *old* schema writes
//!     a row; computes the shadow column's value from the up expression so
//!     new-schema readers see a consistent value immediately.
//!   - `down`: fires when a client connected through the *new* schema
//!     writes a row; computes the original column's value from the down
//!     expression so old-schema readers keep working during the migration
//!     window.
//!
//! Dispatch between old/new behavior within a single physical trigger
//! happens through `<state_schema>.is_new_schema()`, which inspects
//! `search_path` — the same mechanism `schema::create_new_schema_func` wires
//! up per migration.

use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::ident::quote_ident;
use crate::naming::{self, Direction};

/// One column's up/down expressions, as supplied by the operation driving
/// this trigger pair (e.g. `alter_column`'s `up`/`down` SQL fragments).
pub struct TriggerConfig {
    pub table: String,
    pub column: String,
    pub shadow_column: String,
    /// SQL expression, evaluated with `NEW` in scope, producing the shadow
    /// column's value from the rest of the row.
    pub up: String,
    /// SQL expression producing the original column's value from the rest
    /// of the row (including the shadow column).
    pub down: String,
    /// Every column of the owning table, `(name, data_type)`, used to build
    /// the function preamble so `up`/`down` expressions can reference
    /// column names unqualified instead of `NEW.<col>`. Carries the
    /// column's catalog type directly rather than `<table>.<col>%TYPE`
    /// since the shadow column this preamble must also cover doesn't exist
    /// as a named `<table>.<col>` reference until the duplicator has run.
    /// Empty for a drop-only config, which never renders a function body.
    pub table_columns: Vec<(String, String)>,
}

pub struct TriggerSynthesizer<'a> {
    pub config: &'a TriggerConfig,
}

impl<'a> TriggerSynthesizer<'a> {
    pub fn new(config: &'a TriggerConfig) -> Self {
        TriggerSynthesizer { config }
    }

    pub async fn create(&self, db: &mut dyn Connection) -> Result<()> {
        self.create_direction(db, Direction::Up).await?;
        self.create_direction(db, Direction::Down).await?;
        Ok(())
    }

    /// Installs only the up trigger. Used by operations whose column has no
    /// old-schema counterpart to write back to (`add_column`'s new column
    /// doesn't exist in the old schema's view at all, so a down trigger
    /// would have nothing meaningful to copy and would instead stomp the
    /// value a new-schema writer just supplied).
    pub async fn create_up_only(&self, db: &mut dyn Connection) -> Result<()> {
        self.create_direction(db, Direction::Up).await
    }

    async fn create_direction(&self, db: &mut dyn Connection, direction: Direction) -> Result<()> {
        let trigger_name = naming::trigger_name(&self.config.table, &self.config.column, direction);
        let (target_column, expr, guard) = match direction {
            // The up trigger only needs to run when a pre-migration client
            // wrote the row (search_path not pointing at the new schema);
            // a post-migration write already set the shadow column itself.
            Direction::Up => (&self.config.shadow_column, &self.config.up, "NOT"),
            Direction::Down => (&self.config.column, &self.config.down, ""),
        };

        let preamble = self.declarations();

        let function_body = format!(
            "
            CREATE OR REPLACE FUNCTION {function}()
            RETURNS TRIGGER AS $$
            DECLARE
            {preamble}
            BEGIN
                IF {guard} {state_schema}.is_new_schema() THEN
                    NEW.{target} := {expr};
                END IF;
                RETURN NEW;
            END
            $$ LANGUAGE plpgsql;
            ",
            function = quote_ident(&trigger_name),
            state_schema = naming::STATE_SCHEMA,
            target = quote_ident(target_column),
            expr = expr,
            guard = guard,
        );

        db.run(&function_body).await.map_err(EngineError::Other)?;

        db.run(&format!(
            "
            DROP TRIGGER IF EXISTS {trigger} ON {table};
            CREATE TRIGGER {trigger}
                BEFORE INSERT OR UPDATE ON {table}
                FOR EACH ROW
                EXECUTE PROCEDURE {function}();
            ",
            trigger = quote_ident(&trigger_name),
            table = quote_ident(&self.config.table),
            function = quote_ident(&trigger_name),
        ))
        .await
        .map_err(EngineError::Other)?;

        Ok(())
    }

    /// Renders the `DECLARE` block that lets `up`/`down` expressions
    /// reference bare column names instead of `NEW.<col>`.
    fn declarations(&self) -> String {
        self.config
            .table_columns
            .iter()
            .map(|(name, data_type)| {
                format!(
                    "    {ident} {data_type} := NEW.{ident};",
                    ident = quote_ident(name),
                    data_type = data_type,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn drop(&self, db: &mut dyn Connection) -> Result<()> {
        for direction in [Direction::Up, Direction::Down] {
            let trigger_name = naming::trigger_name(&self.config.table, &self.config.column, direction);
            db.run(&format!(
                "DROP TRIGGER IF EXISTS {trigger} ON {table}; DROP FUNCTION IF EXISTS {func}();",
                trigger = quote_ident(&trigger_name),
                table = quote_ident(&self.config.table),
                func = quote_ident(&trigger_name),
            ))
            .await
            .map_err(EngineError::Other)?;
        }
        Ok(())
    }
}
