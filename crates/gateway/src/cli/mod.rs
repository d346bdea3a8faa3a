//! Command-line interface and configuration loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use rtc_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "llmrtc", about = "Real-time voice/vision agent server")]
pub struct Cli {
    /// Path to the TOML config file (default: ./llmrtc.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default).
    Serve,
    /// Inspect or validate configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the config file, falling back to defaults when absent.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(|| Path::new("llmrtc.toml"));
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        return Ok((Config::default(), path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path.to_path_buf()))
}
