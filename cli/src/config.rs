use std::{fs, path::Path};

use anyhow::Context;
use clap::Args;

use pgvista::migration::Migration;

/// Which migration files to load, and in what order. The plan file is itself a newline-separated list
/// of migration file paths, one per line, blank lines and `#`-comments
/// ignored — this is the only thing that encodes migration order, since
/// filesystem directory listings don't guarantee one.
#[derive(Args)]
pub struct Options {
    #[clap(long, default_value = "migrations.plan")]
    plan: String,
}

impl Options {
    pub fn find_migrations(&self) -> anyhow::Result<Vec<Migration>> {
        let plan_file = fs::read_to_string(&self.plan).with_context(|| format!("failed to read plan file {}", self.plan))?;

        let planned_migrations = plan_file.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#'));

        let mut migrations = Vec::new();
        for planned_migration in planned_migrations {
            let path = Path::new(planned_migration);
            let migration = Migration::from_file(path, None).with_context(|| format!("failed to parse migration file {}", path.display()))?;
            migrations.push(migration);
        }

        Ok(migrations)
    }
}
