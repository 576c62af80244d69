//! # Penpot operator
//!
//! Entry point. Loads configuration, initialises tracing, wires the engine to
//! Pebble and the state file, then runs the requested command.
//!
//! ## Exit codes
//!
//! - `0` success, or a ready pass
//! - `1` any error
//! - `2` a pass that is waiting on dependencies
//! - `3` a pass whose services did not become live in time

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use penpot_operator::cli::Cli;
use penpot_operator::commands::{Operator, execute_command};
use penpot_operator::config::OperatorConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = OperatorConfig::load(cli.config.as_deref()).context(
        "Configuration is invalid. Check the config file and PENPOT_OPERATOR_* variables",
    )?;

    init_tracing(config.tracing_level().unwrap_or("info"));
    info!(
        app = %config.app_name,
        ordinal = config.unit_ordinal,
        command = ?cli.command,
        "Penpot operator starting"
    );

    let operator = Operator::from_config(config, cli.state_file)?;
    let code = execute_command(operator, cli.command).await?;
    Ok(ExitCode::from(code))
}

/// Initialize tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
