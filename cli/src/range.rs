use clap::{Args, ArgAction};

use pgvista::migration::Migration;

/// How many of the not-yet-applied migrations a `start` invocation should
/// run: every one of them, a fixed count, or up to (and including) a named
/// migration.
pub enum Range {
    All,
    Number(usize),
    UpTo(String),
}

#[derive(Args)]
#[group(multiple = false, required = true)]
pub struct Options {
    #[clap(short, long, action = ArgAction::SetTrue)]
    all: bool,

    #[clap(short, long)]
    number: Option<usize>,

    migration: Option<String>,
}

impl From<Options> for Range {
    fn from(value: Options) -> Self {
        match value {
            Options { all: true, number: None, migration: None } => Range::All,
            Options { all: false, number: Some(number), migration: None } => Range::Number(number),
            Options { all: false, number: None, migration: Some(migration) } => Range::UpTo(migration),
            _ => unreachable!("invalid range options"),
        }
    }
}

impl Range {
    /// Truncates `pending` (in order) to the subset this range selects.
    pub fn apply(&self, pending: Vec<Migration>) -> anyhow::Result<Vec<Migration>> {
        match self {
            Range::All => Ok(pending),
            Range::Number(n) => Ok(pending.into_iter().take(*n).collect()),
            Range::UpTo(name) => {
                let mut selected = Vec::new();
                for migration in pending {
                    let found = migration.name == *name;
                    selected.push(migration);
                    if found {
                        return Ok(selected);
                    }
                }
                anyhow::bail!("migration {} not found among pending migrations", name)
            }
        }
    }
}
