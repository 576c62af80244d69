//! Workload adapters for the Penpot reconciliation engine.
//!
//! - [`PebbleSupervisor`] applies plans as Pebble layers, starts and stops
//!   services, and runs one-off commands with `pebble exec`
//! - [`HttpLivenessProbe`] polls the backend's readiness endpoint

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod layer;
pub mod pebble;
pub mod probe;

pub use error::{Error, Result};
pub use layer::{Layer, LayerCheck, LayerService};
pub use pebble::{PebbleConfig, PebbleSupervisor, parse_active_services};
pub use probe::{DEFAULT_LIVENESS_URL, HttpLivenessProbe};
