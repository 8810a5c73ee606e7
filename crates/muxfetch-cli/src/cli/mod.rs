//! CLI for the muxfetch request multiplexer.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use muxfetch_core::config;
use std::path::PathBuf;

use commands::{run_config, run_fetch};

/// Top-level CLI for muxfetch.
#[derive(Debug, Parser)]
#[command(name = "muxfetch")]
#[command(about = "muxfetch: coalescing HTTP fetcher", long_about = None)]
pub struct Cli {
    /// Read configuration from PATH instead of ~/.config/muxfetch/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URLs. Repeated URLs share a single transfer.
    Fetch {
        /// HTTP/HTTPS URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print a JSON summary instead of a table.
        #[arg(long)]
        json: bool,

        /// Override `max_concurrent_requests` from the config file.
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
    },

    /// Show the config file path and the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let (path, mut cfg) = match cli.config {
            Some(path) => {
                let cfg = config::load_from(&path)?;
                (path, cfg)
            }
            None => (config::config_path()?, config::load_or_init()?),
        };
        tracing::debug!("loaded config from {}: {:?}", path.display(), cfg);

        match cli.command {
            CliCommand::Fetch {
                urls,
                json,
                max_concurrent,
            } => {
                if let Some(n) = max_concurrent {
                    cfg.max_concurrent_requests = n;
                }
                run_fetch(&cfg, &urls, json).await?;
            }
            CliCommand::Config => run_config(&path, &cfg)?,
        }

        Ok(())
    }
}
