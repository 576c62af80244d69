//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use penpot_reconciler::{
    AccountActions, PassOutcome, Reconciler, ReconciliationLoop, Trigger,
};
use penpot_workload::{HttpLivenessProbe, Layer, PebbleSupervisor};
use tokio::signal;
use tracing::info;

use crate::cli::Commands;
use crate::config::OperatorConfig;
use crate::state::StateFile;
use crate::watch::StateWatcher;

/// State file used when neither the CLI nor the configuration names one.
pub const DEFAULT_STATE_FILE: &str = "/var/lib/penpot-operator/state.json";

/// Process exit code for a pass outcome.
#[must_use]
pub const fn exit_code(outcome: &PassOutcome) -> u8 {
    match outcome {
        PassOutcome::Ready { .. } => 0,
        PassOutcome::NotReady { .. } => 2,
        PassOutcome::LivenessTimeout { .. } => 3,
    }
}

/// Everything one invocation needs, wired from configuration.
pub struct Operator {
    pub config: OperatorConfig,
    pub state: Arc<StateFile>,
    pub reconciler: Arc<Reconciler>,
    pub pebble: Arc<PebbleSupervisor>,
}

impl Operator {
    /// Wire the engine to the state file, Pebble and the HTTP probe.
    ///
    /// # Errors
    ///
    /// Fails if the state file is unreadable or the engine cannot be built.
    pub fn from_config(config: OperatorConfig, state_file: Option<PathBuf>) -> Result<Self> {
        let path = state_file
            .or_else(|| config.state_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let state = Arc::new(
            StateFile::open(&path, config.app_name.clone(), config.unit_ordinal)
                .with_context(|| format!("Failed to open state file {}", path.display()))?,
        );
        let pebble = Arc::new(PebbleSupervisor::new(config.pebble_config()));
        let probe = HttpLivenessProbe::new(config.liveness_url()?, config.liveness.request_timeout)
            .context("Failed to build liveness probe")?;

        let reconciler = Reconciler::builder()
            .with_facts(state.clone())
            .with_secrets(state.clone())
            .with_peers(state.clone())
            .with_membership(state.clone())
            .with_supervisor(pebble.clone())
            .with_probe(Arc::new(probe))
            .with_config(config.reconciler_config())
            .build()
            .context("Failed to build reconciler")?;

        Ok(Self {
            config,
            state,
            reconciler: Arc::new(reconciler),
            pebble,
        })
    }
}

/// Execute a CLI command and return the process exit code.
///
/// This is the main command dispatcher that routes to the appropriate handler.
///
/// # Errors
///
/// Propagates any handler failure.
pub async fn execute_command(operator: Operator, command: Commands) -> Result<u8> {
    match command {
        Commands::Reconcile => cmd_reconcile(&operator).await,
        Commands::Run => cmd_run(&operator).await.map(|()| 0),
        Commands::Plan => cmd_plan(&operator).await.map(|()| 0),
        Commands::CreateAccount { email, full_name } => {
            cmd_create_account(&operator, &email, &full_name)
                .await
                .map(|()| 0)
        }
        Commands::DeleteAccount { email } => {
            cmd_delete_account(&operator, &email).await.map(|()| 0)
        }
    }
}

/// Run one pass.
async fn cmd_reconcile(operator: &Operator) -> Result<u8> {
    let outcome = operator.reconciler.reconcile(&Trigger::Startup).await?;
    let status = operator.reconciler.status();
    println!("{}: {}", status.name(), status.message());
    Ok(exit_code(&outcome))
}

/// Run the trigger loop until Ctrl+C.
async fn cmd_run(operator: &Operator) -> Result<()> {
    let mut reconciliation = ReconciliationLoop::new(
        operator.reconciler.clone(),
        operator.config.loop_config(),
    );
    let triggers = reconciliation.handle();
    triggers.send(Trigger::Startup)?;
    let _watcher = StateWatcher::spawn(operator.state.clone(), triggers)
        .context("Failed to watch state file")?;

    let stopper = reconciliation.stopper();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping");
        }
        stopper.stop();
    });

    reconciliation.run().await?;
    info!("Reconciliation loop stopped");
    Ok(())
}

/// Print the layer a pass would apply.
async fn cmd_plan(operator: &Operator) -> Result<()> {
    let evaluation = operator.reconciler.evaluate().await;
    let plan = evaluation.plan(&operator.reconciler.config().plan)?;
    print!("{}", Layer::from(&plan).to_yaml()?);
    Ok(())
}

async fn cmd_create_account(operator: &Operator, email: &str, full_name: &str) -> Result<()> {
    let password = actions(operator).create_account(email, full_name).await?;
    println!("{password}");
    Ok(())
}

async fn cmd_delete_account(operator: &Operator, email: &str) -> Result<()> {
    actions(operator).delete_account(email).await?;
    println!("deleted {email}");
    Ok(())
}

fn actions(operator: &Operator) -> AccountActions {
    AccountActions::new(operator.reconciler.clone(), operator.pebble.clone())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::time::Duration;

    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&PassOutcome::Ready { exporter_local: true }), 0);
        assert_eq!(exit_code(&PassOutcome::NotReady { unsatisfied: vec![] }), 2);
        assert_eq!(
            exit_code(&PassOutcome::LivenessTimeout {
                waited: Duration::from_secs(300)
            }),
            3
        );
    }

    #[tokio::test]
    async fn test_reconcile_without_pebble_waits() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = OperatorConfig {
            internal_resolver: Some("10.0.0.10".to_string()),
            supervisor: crate::config::SupervisorSettings {
                pebble_bin: dir.path().join("missing-pebble"),
                ..Default::default()
            },
            ..Default::default()
        };
        let operator =
            Operator::from_config(config, Some(dir.path().join("state.json"))).unwrap();

        let code = execute_command(operator, Commands::Reconcile).await.unwrap();

        assert_eq!(code, 2);
    }
}
