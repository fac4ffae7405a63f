use anyhow::Result;
use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::Args;
use commands::GlobalOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --json output stays parseable
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = GlobalOptions {
        json: args.json,
        cache_dir: args.cache_dir,
    };
    commands::run(args.command, &options).await
}
