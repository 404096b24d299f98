use anyhow::Context;
use colored::Colorize;

use crate::{config, connection};

#[derive(clap::Args)]
pub struct Options {
    #[clap(flatten)]
    connection: connection::Options,

    #[clap(flatten)]
    config: config::Options,
}

pub async fn command(opts: Options) -> anyhow::Result<()> {
    let mut engine = opts.connection.to_engine_from_env().await?;
    let migrations = opts.config.find_migrations()?;

    let status = engine.status().await?;
    if !status.is_active {
        println!("No migration in progress");
        return Ok(());
    }

    let in_progress = status
        .history
        .iter()
        .rev()
        .find(|record| !record.completed && !record.rolled_back)
        .context("engine reports a migration in progress but the ledger has no matching row")?;

    let migration = migrations
        .into_iter()
        .find(|migration| migration.name == in_progress.name)
        .with_context(|| format!("migration {} is in progress but wasn't found locally", in_progress.name))?;

    print!("Completing '{}'... ", migration.name);
    engine.complete(&migration).await?;
    println!("{}", "done".green());

    Ok(())
}
