use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtc_domain::config::ConfigSeverity;
use rtc_gateway::bootstrap::{self, Bootstrap};
use rtc_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = rtc_gateway::cli::load_config(cli.config.as_deref())?;
            tracing::info!("llmrtc starting");
            let state = bootstrap::build_state(config, Bootstrap::default())?;
            bootstrap::serve(state).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = rtc_gateway::cli::load_config(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("{} ok", config_path.display());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = rtc_gateway::cli::load_config(cli.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("llmrtc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rtc_gateway=debug")),
        )
        .json()
        .init();
}
