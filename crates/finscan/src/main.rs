mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            paths,
            json,
            pretty,
            config,
        } => cli::extract::run(&paths, json || pretty, pretty, config.as_deref()),
        Commands::Classify { identifiers } => cli::classify::run(&identifiers),
        Commands::Config { config } => cli::config::run(config.as_deref()),
    }
}
