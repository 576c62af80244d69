#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Penpot operator
//!
//! Binary glue around [`penpot_reconciler`]: configuration, a JSON state file
//! standing in for the orchestration platform, a file watcher feeding the
//! trigger loop, and the CLI.

pub mod cli;
pub mod commands;
pub mod config;
pub mod state;
pub mod watch;

pub use config::{ConfigError, OperatorConfig};
pub use state::{StateDocument, StateError, StateFile};
pub use watch::StateWatcher;
