use clap::Args;

use crate::connection;

#[derive(Args)]
pub struct Options {
    #[clap(flatten)]
    connection: connection::Options,
}

pub async fn command(opts: Options) -> anyhow::Result<()> {
    let mut engine = opts.connection.to_engine_from_env().await?;
    let status = engine.status().await?;

    match &status.latest_version {
        Some(version) => println!("Latest completed version: {version}"),
        None => println!("No migration has completed yet"),
    }

    println!("Migration in progress: {}", if status.is_active { "yes" } else { "no" });

    if status.history.is_empty() {
        return Ok(());
    }

    println!("\nHistory:");
    for record in &status.history {
        let state = if record.rolled_back {
            "rolled back"
        } else if record.completed {
            "completed"
        } else {
            "in progress"
        };
        println!("  {} ({}) — started {}", record.name, state, record.started_at);
    }

    Ok(())
}
