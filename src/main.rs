//! galaxy-proxy - Fetch-through cache for Ansible Galaxy
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use galaxy_proxy::cli::args::{ConfigAction, ConfigArgs};
use galaxy_proxy::cli::{Cli, Commands};
use galaxy_proxy::config::{Config, ConfigManager};
use galaxy_proxy::error::ProxyResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ProxyResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // init and path must work even when the existing file is broken
    let config = match &cli.command {
        Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Init { .. } | ConfigAction::Path),
        }) => Config::default(),
        _ => config_manager.load().await?,
    };

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("galaxy_proxy=warn"),
        1 => EnvFilter::new("galaxy_proxy=info"),
        _ => EnvFilter::new("galaxy_proxy=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }

    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Get(args) => galaxy_proxy::cli::commands::get(args, &config).await,
        Commands::List(args) => galaxy_proxy::cli::commands::list(args, &config).await,
        Commands::Config(args) => {
            galaxy_proxy::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
