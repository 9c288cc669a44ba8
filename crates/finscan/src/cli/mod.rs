pub mod classify;
pub mod config;
pub mod extract;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "finscan",
    about = "Extract securities and portfolio totals from Swiss banking statements",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract securities from statements (.txt, .json page dumps, .pdf)
    Extract {
        /// Files or directories to read
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
        /// Pretty-print JSON (implies --json)
        #[arg(long)]
        pretty: bool,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check identifiers and show their jurisdiction
    Classify {
        /// ISINs to classify
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Print the effective configuration
    Config {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
