//! CLI for the studysync resilience and sync core.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use studysync_core::config::{self, SyncConfig};
use studysync_core::retry::RetryOverrides;

use commands::{run_backoff, run_config, run_probe, run_simulate};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "studysync")]
#[command(about = "studysync: retry, circuit breaking and room sync tooling", long_about = None)]
pub struct Cli {
    /// Read configuration from this file instead of the XDG config path.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// HEAD-probe one or more URLs concurrently with retries and circuit breaking.
    Probe {
        /// URLs to probe.
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
        /// Override the configured retry count.
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Override the configured per-attempt timeout.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Exit successfully as long as at least one probe succeeded.
        #[arg(long)]
        allow_partial: bool,
    },

    /// Print the backoff schedule of the configured retry policy.
    Backoff {
        /// Number of attempts to show.
        #[arg(long, default_value = "8", value_name = "N")]
        attempts: u32,
    },

    /// Print the config file path and the effective configuration.
    Config,

    /// Run a room over an in-memory server, forcing link drops.
    Simulate {
        /// How many times the server drops the link.
        #[arg(long, default_value = "2", value_name = "N")]
        drops: u32,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg: SyncConfig = match &cli.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Probe {
                urls,
                max_retries,
                timeout_ms,
                allow_partial,
            } => {
                let overrides = RetryOverrides {
                    max_retries,
                    timeout_ms,
                    ..RetryOverrides::default()
                };
                run_probe(&cfg, &urls, &overrides, allow_partial).await?;
            }
            CliCommand::Backoff { attempts } => run_backoff(&cfg, attempts)?,
            CliCommand::Config => run_config(&cfg, cli.config.as_deref())?,
            CliCommand::Simulate { drops } => run_simulate(&cfg, drops).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
