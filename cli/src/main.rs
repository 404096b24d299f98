mod config;
mod connection;
mod migration;
mod range;

use clap::Parser;

#[derive(Parser)]
#[clap(name = "pgvista", version, about)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
#[clap(about)]
enum Command {
    #[clap(subcommand, display_order = 1)]
    Migration(migration::Command),

    #[clap(about = "Output the query your application should use to select the right schema", display_order = 2)]
    SchemaQuery(SchemaQueryOptions),
}

#[derive(clap::Args)]
struct SchemaQueryOptions {
    #[clap(flatten)]
    config: config::Options,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Args = Args::parse();

    match args.cmd {
        Command::Migration(cmd) => migration::command(cmd).await,
        Command::SchemaQuery(opts) => {
            let migrations = opts.config.find_migrations()?;
            let query = migrations.last().map(|migration| pgvista::schema_query_for_migration(&migration.name));
            println!("{}", query.unwrap_or_default());
            Ok(())
        }
    }
}
