//! The virtual schema: what a migration's
//! operations see and mutate before any of it is reflected in the physical
//! catalog. `Schema` tracks renames/removals/shadow-column substitutions;
//! `Table`/`Column`/`Constraint`/`Index` are read back from
//! `information_schema`/`pg_catalog`, with those changes applied on top.

use std::collections::{HashMap, HashSet};

use anyhow::Context;

use crate::db::Connection;
use crate::ident::quote_ident;
use crate::naming;

/// Schema tracks changes made to tables and columns during a migration.
/// These changes are not applied until the migration is completed but
/// need to be taken into consideration when creating views for a migration
/// and when a user references a table or column in a migration.
///
/// The changes to a table are tracked by a `TableChanges` struct. The possible
/// changes are:
///   - Changing the name which updates `current_name`.
///   - Removing which sets the `removed` flag.
///
/// Changes to a column are tracked by a `ColumnChanges` struct which reside in
/// the corresponding `TableChanges`. The possible changes are:
///   - Changing the name which updates `current_name`.
///   - Changing the backing column which will add the new column to the end of
///     `intermediate_columns`. This is used when shadow columns are
///     introduced which will eventually replace the current column.
///   - Removing which sets the `removed` flag.
///
/// Schema provides some schema introspection methods, `get_tables` and `get_table`,
/// which will retrieve the current schema from the database and apply the changes.
#[derive(Debug)]
pub struct Schema {
    table_changes: Vec<TableChanges>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema {
            table_changes: Vec::new(),
        }
    }

    pub fn change_table<F>(&mut self, current_name: &str, f: F)
    where
        F: FnOnce(&mut TableChanges),
    {
        let table_change_index = self
            .table_changes
            .iter()
            .position(|table| table.current_name == current_name)
            .unwrap_or_else(|| {
                let new_changes = TableChanges::new(current_name.to_string());
                self.table_changes.push(new_changes);
                self.table_changes.len() - 1
            });

        let table_changes = &mut self.table_changes[table_change_index];
        f(table_changes)
    }

    pub async fn create_for_migration(&self, db: &mut (impl Connection + ?Sized), schema_name: &str) -> anyhow::Result<()> {
        db.run(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema_name)))
            .await
            .with_context(|| format!("failed to create version schema {schema_name}"))?;

        for table in self.get_tables(db).await? {
            table.create_view(db, &schema_name).await?;
        }

        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct TableChanges {
    current_name: String,
    real_name: String,
    column_changes: Vec<ColumnChanges>,
    removed: bool,
}

impl TableChanges {
    fn new(name: String) -> Self {
        Self {
            current_name: name.to_string(),
            real_name: name,
            column_changes: Vec::new(),
            removed: false,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.current_name = name.to_string();
    }

    pub fn change_column<F>(&mut self, current_name: &str, f: F)
    where
        F: FnOnce(&mut ColumnChanges),
    {
        let column_change_index = self
            .column_changes
            .iter()
            .position(|column| column.current_name == current_name)
            .unwrap_or_else(|| {
                let new_changes = ColumnChanges::new(current_name.to_string());
                self.column_changes.push(new_changes);
                self.column_changes.len() - 1
            });

        let column_changes = &mut self.column_changes[column_change_index];
        f(column_changes)
    }

    pub fn set_removed(&mut self) {
        self.removed = true;
    }
}

#[derive(Debug)]
pub struct ColumnChanges {
    current_name: String,
    backing_columns: Vec<String>,
    removed: bool,
}

impl ColumnChanges {
    fn new(name: String) -> Self {
        Self {
            current_name: name.to_string(),
            backing_columns: vec![name],
            removed: false,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.current_name = name.to_string();
    }

    /// Point this logical column at a new backing (shadow) column — used
    /// when a migration's Start phase introduces `_pgvista_new_<col>` as the
    /// column's new physical home.
    pub fn set_column(&mut self, column_name: &str) {
        self.backing_columns.push(column_name.to_string())
    }

    pub fn set_removed(&mut self) {
        self.removed = true;
    }

    fn real_name(&self) -> &str {
        self.backing_columns
            .last()
            .expect("backing_columns should never be empty")
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub real_name: String,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub real_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    PrimaryKey { columns: Vec<String> },
    Unique { columns: Vec<String> },
    Check { expression: String },
    ForeignKey {
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    /// NOT VALID constraints are in place for new writes but haven't been
    /// checked against existing rows yet.
    pub not_valid: bool,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Schema {
    pub async fn get_tables(&self, db: &mut dyn Connection) -> anyhow::Result<Vec<Table>> {
        let rows = db
            .query(
                "
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
            ",
            )
            .await?;

        let names = rows
            .iter()
            .map(|row| row.get::<'_, _, String>("table_name"))
            .filter_map(|real_name| {
                let table_changes = self.table_changes.iter().find(|changes| changes.real_name == real_name);

                if let Some(changes) = table_changes {
                    if changes.removed {
                        return None;
                    }
                }

                Some(real_name)
            });

        let mut tables = Vec::new();
        for real_name in names {
            tables.push(self.get_table_by_real_name(db, &real_name).await?);
        }

        Ok(tables)
    }

    pub async fn get_table(&self, db: &mut dyn Connection, table_name: &str) -> anyhow::Result<Table> {
        let table_changes = self.table_changes.iter().find(|changes| changes.current_name == table_name);

        let real_table_name = table_changes
            .map(|changes| changes.real_name.to_string())
            .unwrap_or_else(|| table_name.to_string());

        self.get_table_by_real_name(db, &real_table_name).await
    }

    async fn get_table_by_real_name(&self, db: &mut dyn Connection, real_table_name: &str) -> anyhow::Result<Table> {
        let table_changes = self.table_changes.iter().find(|changes| changes.real_name == real_table_name);

        let real_columns: Vec<(String, String, bool, Option<String>, Option<String>)> = db
            .query(&format!(
                "
                SELECT
                    c.column_name,
                    CASE WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name ELSE c.data_type END,
                    c.is_nullable,
                    c.column_default,
                    col_description('{table}'::regclass, c.ordinal_position)
                FROM information_schema.columns c
                WHERE c.table_name = '{table}' AND c.table_schema = 'public'
                ORDER BY c.ordinal_position
                ",
                table = real_table_name,
            ))
            .await?
            .iter()
            .map(|row| {
                (
                    row.get("column_name"),
                    row.get(1),
                    row.get::<'_, _, String>("is_nullable") == "YES",
                    row.get("column_default"),
                    row.get(4),
                )
            })
            .collect();

        let mut ignore_columns: HashSet<String> = HashSet::new();
        let mut aliases: HashMap<String, &str> = HashMap::new();

        if let Some(changes) = table_changes {
            for column_changes in &changes.column_changes {
                if column_changes.removed {
                    ignore_columns.insert(column_changes.real_name().to_string());
                } else {
                    aliases.insert(column_changes.real_name().to_string(), &column_changes.current_name);
                }

                let (_, rest) = column_changes
                    .backing_columns
                    .split_last()
                    .expect("backing_columns should never be empty");

                for column in rest {
                    ignore_columns.insert(column.to_string());
                }
            }
        }

        let mut columns: Vec<Column> = Vec::new();

        for (real_name, data_type, nullable, default, comment) in real_columns {
            if ignore_columns.contains(&*real_name) {
                continue;
            }
            // The needs-backfill sentinel is bookkeeping for the in-progress
            // backfill, not a column either schema version should ever see.
            if real_name == naming::NEEDS_BACKFILL_COLUMN {
                continue;
            }

            let name = aliases
                .get(&real_name)
                .map(|alias| alias.to_string())
                .unwrap_or_else(|| real_name.to_string());

            columns.push(Column {
                name,
                real_name,
                data_type,
                nullable,
                default,
                comment,
            });
        }

        let current_table_name = table_changes
            .map(|changes| changes.current_name.as_ref())
            .unwrap_or(real_table_name);

        let constraints = self.get_constraints(db, real_table_name, &ignore_columns, &aliases).await?;
        let indexes = self.get_indexes(db, real_table_name, &ignore_columns, &aliases).await?;

        Ok(Table {
            name: current_table_name.to_string(),
            real_name: real_table_name.to_string(),
            columns,
            constraints,
            indexes,
        })
    }

    async fn get_constraints(
        &self,
        db: &mut dyn Connection,
        real_table_name: &str,
        ignore_columns: &HashSet<String>,
        aliases: &HashMap<String, &str>,
    ) -> anyhow::Result<Vec<Constraint>> {
        let rows = db
            .query(&format!(
                "
                SELECT
                    con.conname,
                    con.contype,
                    con.convalidated,
                    pg_get_constraintdef(con.oid) AS definition,
                    ARRAY(
                        SELECT attname FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ) AS columns,
                    frel.relname AS referenced_table,
                    ARRAY(
                        SELECT attname FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ) AS referenced_columns
                FROM pg_constraint con
                JOIN pg_class rel ON rel.oid = con.conrelid
                LEFT JOIN pg_class frel ON frel.oid = con.confrelid
                WHERE rel.relname = '{table}' AND con.contype IN ('p', 'u', 'c', 'f')
                ",
                table = real_table_name,
            ))
            .await?;

        let rename = |real: &str| -> Option<String> {
            if ignore_columns.contains(real) {
                return None;
            }
            Some(aliases.get(real).map(|s| s.to_string()).unwrap_or_else(|| real.to_string()))
        };

        let mut constraints = Vec::new();
        for row in rows {
            let name: String = row.get("conname");
            let contype: i8 = row.get::<'_, _, i8>("contype");
            let validated: bool = row.get("convalidated");
            let definition: String = row.get("definition");

            let real_cols: Vec<String> = row.get("columns");
            let cols: Vec<String> = real_cols.iter().filter_map(|c| rename(c)).collect();
            if cols.len() != real_cols.len() {
                // One of the constrained columns has been removed in this
                // migration's virtual schema; the constraint no longer applies.
                continue;
            }

            let kind = match contype as u8 as char {
                'p' => ConstraintKind::PrimaryKey { columns: cols },
                'u' => ConstraintKind::Unique { columns: cols },
                'c' => ConstraintKind::Check { expression: definition },
                'f' => {
                    let referenced_table: String = row.get("referenced_table");
                    let referenced_columns: Vec<String> = row.get("referenced_columns");
                    ConstraintKind::ForeignKey {
                        columns: cols,
                        referenced_table,
                        referenced_columns,
                    }
                }
                _ => continue,
            };

            constraints.push(Constraint {
                name,
                kind,
                not_valid: !validated,
            });
        }

        Ok(constraints)
    }

    async fn get_indexes(
        &self,
        db: &mut dyn Connection,
        real_table_name: &str,
        ignore_columns: &HashSet<String>,
        aliases: &HashMap<String, &str>,
    ) -> anyhow::Result<Vec<Index>> {
        let rows = db
            .query(&format!(
                "
                SELECT
                    i.relname AS index_name,
                    ix.indisunique,
                    ARRAY(
                        SELECT a.attname
                        FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ) AS columns
                FROM pg_index ix
                JOIN pg_class t ON t.oid = ix.indrelid
                JOIN pg_class i ON i.oid = ix.indexrelid
                WHERE t.relname = '{table}' AND ix.indisvalid
                  AND NOT EXISTS (
                      SELECT 1 FROM pg_constraint con
                      WHERE con.conindid = ix.indexrelid
                  )
                ",
                table = real_table_name,
            ))
            .await?;

        let rename = |real: &str| -> Option<String> {
            if ignore_columns.contains(real) {
                return None;
            }
            Some(aliases.get(real).map(|s| s.to_string()).unwrap_or_else(|| real.to_string()))
        };

        let mut indexes = Vec::new();
        for row in rows {
            let name: String = row.get("index_name");
            let unique: bool = row.get("indisunique");
            let real_cols: Vec<String> = row.get("columns");
            let cols: Vec<String> = real_cols.iter().filter_map(|c| rename(c)).collect();
            if cols.len() != real_cols.len() {
                continue;
            }
            indexes.push(Index {
                name,
                columns: cols,
                unique,
            });
        }

        Ok(indexes)
    }
}

impl Table {
    pub fn real_column_names<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = &'a String> {
        columns.iter().map(|name| self.get_column(name).map(|col| &col.real_name).unwrap_or(name))
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// `(physical column name, data type)` for every column, keyed by
    /// `real_name` rather than the possibly-renamed logical `name` — trigger
    /// bodies run against the physical row, before any rename
    /// this migration is making takes effect at Complete.
    pub fn column_type_pairs(&self) -> Vec<(String, String)> {
        self.columns.iter().map(|c| (c.real_name.clone(), c.data_type.clone())).collect()
    }

    pub fn get_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// The columns that identify a row for backfill purposes: the primary key if one exists, otherwise a
    /// single NOT NULL UNIQUE column. Returns `None` if neither exists.
    pub fn identity_columns(&self) -> Option<Vec<String>> {
        for constraint in &self.constraints {
            if let ConstraintKind::PrimaryKey { columns } = &constraint.kind {
                return Some(columns.clone());
            }
        }

        for constraint in &self.constraints {
            if let ConstraintKind::Unique { columns } = &constraint.kind {
                if columns.len() == 1 {
                    if let Some(col) = self.get_column(&columns[0]) {
                        if !col.nullable {
                            return Some(columns.clone());
                        }
                    }
                }
            }
        }

        None
    }

    pub async fn create_view(&self, db: &mut (impl Connection + ?Sized), schema: &str) -> anyhow::Result<()> {
        let select_columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("{} AS {}", quote_ident(&column.real_name), quote_ident(&column.name)))
            .collect();

        db.run(&format!(
            "CREATE OR REPLACE VIEW {schema}.{view_name} AS SELECT {columns} FROM {table_name}",
            schema = quote_ident(schema),
            table_name = quote_ident(&self.real_name),
            view_name = quote_ident(&self.name),
            columns = select_columns.join(", "),
        ))
        .await
        .with_context(|| format!("failed to create view for table {}", self.name))?;

        Ok(())
    }
}

/// Create the `<state_schema>.is_new_schema()` helper: a PL/pgSQL function
/// the BEFORE triggers call to decide
/// which direction (up/down) to run, keyed off either the connection's
/// `search_path` (a client connected through the new version's schema) or an
/// explicit session-local override used by the backfiller, which always
/// wants the "new" behavior regardless of search_path.
pub async fn create_new_schema_func(db: &mut dyn Connection, schema_name: &str) -> anyhow::Result<()> {
    let query = format!(
        "
        CREATE OR REPLACE FUNCTION {state_schema}.is_new_schema()
        RETURNS BOOLEAN AS $$
        DECLARE
            setting TEXT := current_setting('{state_schema}.is_new_schema', TRUE);
            setting_bool BOOLEAN := setting IS NOT NULL AND setting = 'YES';
        BEGIN
            RETURN current_setting('search_path') = '{schema_name}' OR setting_bool;
        END
        $$ language 'plpgsql';
        ",
        state_schema = crate::naming::STATE_SCHEMA,
        schema_name = schema_name,
    );
    db.query(&query)
        .await
        .context("failed creating helper function is_new_schema()")?;

    Ok(())
}

pub async fn drop_new_schema_func(db: &mut dyn Connection) -> anyhow::Result<()> {
    db.query(&format!(
        "DROP FUNCTION IF EXISTS {}.is_new_schema;",
        crate::naming::STATE_SCHEMA
    ))
    .await?;
    Ok(())
}
