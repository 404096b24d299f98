use clap::Args;
use colored::Colorize;

use crate::{config, connection, range};

#[derive(Args)]
pub struct Options {
    #[clap(long, short)]
    complete: bool,

    #[clap(flatten)]
    range: range::Options,

    #[clap(flatten)]
    connection: connection::Options,

    #[clap(flatten)]
    config: config::Options,
}

pub async fn command(opts: Options) -> anyhow::Result<()> {
    let mut engine = opts.connection.to_engine_from_env().await?;
    let migrations = opts.config.find_migrations()?;

    let range: range::Range = opts.range.into();
    let pending = engine.remaining_migrations(migrations).await?;
    let pending = range.apply(pending)?;

    if pending.is_empty() {
        println!("No migrations to apply");
        return Ok(());
    }

    // A Ctrl-C during `start` aborts the current migration's backfill/index
    // build cleanly instead of leaving the connection to be killed outright;
    // the migration itself stays in-progress in the ledger, ready to be
    // retried or rolled back.
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    // Only one migration may be in-progress at a time, so a
    // multi-migration batch starts and (optionally) completes each one in
    // turn rather than starting them all up front.
    for migration in &pending {
        print!("Starting '{}'... ", migration.name);
        engine.migrate(vec![migration.clone()]).await?;
        println!("{}", "done".green());

        if opts.complete {
            print!("Completing '{}'... ", migration.name);
            engine.complete(migration).await?;
            println!("{}", "done".green());
        }
    }

    Ok(())
}
