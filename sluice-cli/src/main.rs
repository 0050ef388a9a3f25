//! Sluice CLI
//!
//! Runs pipelines over a directory of content from the command line.

mod commands;
mod pipeline;
mod source;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "sluice_cli=info,sluice_engine=info,sluice_plugins=info,sluice_lua=info";
const VERBOSE_LOG_FILTER: &str =
    "sluice_cli=debug,sluice_engine=debug,sluice_plugins=debug,sluice_lua=debug";

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice data pipeline engine", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    handle_command(cli.command).await
}
