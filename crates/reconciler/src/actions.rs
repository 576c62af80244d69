//! Account actions against the running backend.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::interfaces::{ExecOutput, ExecRequest, WorkloadExec};
use crate::plan::BACKEND;
use crate::reconciler::Reconciler;
use crate::secret::random_token;

const BACKEND_DIR: &str = "/opt/penpot/backend/";
const PASSWORD_BYTES: usize = 16;

/// Creates and deletes Penpot user profiles.
///
/// Both actions re-evaluate readiness and require the backend service to be
/// running. They never touch the service plan.
pub struct AccountActions {
    reconciler: Arc<Reconciler>,
    exec: Arc<dyn WorkloadExec>,
}

impl AccountActions {
    /// Create the actions over a reconciler and a workload exec.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, exec: Arc<dyn WorkloadExec>) -> Self {
        Self { reconciler, exec }
    }

    /// Create a profile and return its generated password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] or [`Error::BackendNotRunning`] when the
    /// backend cannot take the request, and [`Error::ActionFailed`] when the
    /// management command exits non-zero.
    pub async fn create_account(&self, email: &str, full_name: &str) -> Result<String> {
        self.ensure_backend().await?;
        let password = random_token(PASSWORD_BYTES);
        let request = ExecRequest::new(
            [
                "python3",
                "manage.py",
                "create-profile",
                "--email",
                email,
                "--fullname",
                full_name,
            ],
            BACKEND_DIR,
        )
        .with_stdin(password.clone());
        self.run("create-profile", &request).await?;
        info!(email, "Created user profile");
        Ok(password)
    }

    /// Delete a profile.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_account`].
    pub async fn delete_account(&self, email: &str) -> Result<()> {
        self.ensure_backend().await?;
        let request = ExecRequest::new(
            ["python3", "manage.py", "delete-profile", "--email", email],
            BACKEND_DIR,
        );
        self.run("delete-profile", &request).await?;
        info!(email, "Deleted user profile");
        Ok(())
    }

    async fn ensure_backend(&self) -> Result<()> {
        let evaluation = self.reconciler.evaluate().await;
        if !evaluation.report.is_ready() {
            return Err(Error::not_ready(evaluation.report.unsatisfied()));
        }
        if !self.reconciler.supervisor().running().await?.contains(BACKEND) {
            return Err(Error::BackendNotRunning);
        }
        Ok(())
    }

    async fn run(&self, action: &str, request: &ExecRequest) -> Result<ExecOutput> {
        let output = self.exec.exec(request).await?;
        if output.success() {
            return Ok(output);
        }
        let reason = output
            .exit_code
            .map_or_else(|| "killed by signal".to_string(), |code| format!("exit status {code}"));
        warn!(action, reason = %reason, stderr = %output.stderr, "Account action failed");
        Err(Error::action_failed(
            action,
            reason,
            output.stdout,
            output.stderr,
        ))
    }
}
