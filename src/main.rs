//! Ralph entry point: parse arguments, initialize logging, run the command.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ralph::cli::{execute, Cli};
use ralph::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "ralph=info",
        1 => "ralph=debug",
        _ => "ralph=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let config = Config::from_env();
    if let Err(e) = execute(cli.command, config).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
