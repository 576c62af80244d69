//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Penpot operator
#[derive(Parser, Debug)]
#[command(name = "penpot-operator")]
#[command(version)]
#[command(about = "Converges Penpot's services onto their database, cache, storage, mail and login")]
#[command(
    long_about = "Reads dependency facts and membership from a state file, decides whether Penpot can run, and applies the resulting service plan through Pebble."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State file with facts, secrets and membership
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run one reconciliation pass and report the outcome
    ///
    /// Exits 0 when ready, 2 when waiting on dependencies and 3 when the
    /// services did not become live in time.
    Reconcile,

    /// Reconcile continuously, on state file changes and periodically
    Run,

    /// Print the service layer that would be applied
    Plan,

    /// Create a Penpot account and print its generated password
    CreateAccount {
        /// Account email
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        full_name: String,
    },

    /// Delete a Penpot account
    DeleteAccount {
        /// Account email
        #[arg(long)]
        email: String,
    },
}
