//! quorumkv replica CLI.
//!
//! # Quick Start
//!
//! ```bash
//! # Check a config file resolves to a valid cluster view
//! qkv config check --file replica1.toml
//!
//! # Run a replica
//! qkv run --file replica1.toml
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// quorumkv - a replicated key-value store with interchangeable CFT and BFT
/// consensus engines.
#[derive(Parser)]
#[command(name = "qkv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load configuration, boot a replica, and block until shutdown.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        file: Option<String>,

        /// Environment variable prefix for config overrides.
        #[arg(long, default_value = "QKV")]
        env_prefix: String,
    },

    /// Validate configuration commands.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate a config file, print the resolved cluster view,
    /// and exit without starting a replica.
    Check {
        /// Path to a TOML config file.
        #[arg(long)]
        file: Option<String>,

        /// Environment variable prefix for config overrides.
        #[arg(long, default_value = "QKV")]
        env_prefix: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, env_prefix } => commands::run::run(file, &env_prefix),
        Commands::Config(ConfigCommands::Check { file, env_prefix }) => commands::config::check(file, &env_prefix),
    }
}
