use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use modsync::cli::{execute, Cli};
use modsync::config::{config_schema, load_config, DEFAULT_CONFIG_PATH};
use modsync::error::SyncError;
use modsync::startup::build_engine;
use modsync::utils::logger::init_logging;

/// Exit status for a command interrupted with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.schema {
        return match config_schema() {
            Ok(schema) => {
                println!("{}", schema);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to render config schema: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(command) = cli.command else {
        eprintln!("No command given; run with --help for usage.");
        return ExitCode::FAILURE;
    };

    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from '{}': {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
    }
    info!("Loaded configuration from '{}'", config_path);

    let engine = match build_engine(Arc::new(config)) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start: {}", e);
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; cancelling");
            trigger.cancel();
        }
    });

    match execute(&engine, command, &cancel).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(SyncError::Cancelled) => {
            eprintln!("Cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
