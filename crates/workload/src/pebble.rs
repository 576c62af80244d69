//! Supervisor and exec runner backed by the Pebble CLI.
//!
//! Every operation shells out to `pebble` with piped output and a bounded
//! runtime. The child is killed if the deadline passes.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use penpot_reconciler::{ExecOutput, ExecRequest, ServicePlan, Supervisor, WorkloadExec};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layer::Layer;

/// Configuration for the Pebble CLI.
#[derive(Debug, Clone)]
pub struct PebbleConfig {
    /// Path to the `pebble` binary.
    pub bin: PathBuf,
    /// Label the plan's layer is combined under.
    pub layer_label: String,
    /// Pebble state directory, exported as `PEBBLE` when set.
    pub pebble_dir: Option<PathBuf>,
    /// Upper bound for any single CLI call.
    pub command_timeout: Duration,
}

impl Default for PebbleConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("pebble"),
            layer_label: "penpot".to_string(),
            pebble_dir: None,
            command_timeout: Duration::from_secs(60),
        }
    }
}

impl PebbleConfig {
    /// Set the binary path.
    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Set the layer label.
    #[must_use]
    pub fn with_layer_label(mut self, label: impl Into<String>) -> Self {
        self.layer_label = label.into();
        self
    }

    /// Set the Pebble state directory.
    #[must_use]
    pub fn with_pebble_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pebble_dir = Some(dir.into());
        self
    }

    /// Set the per-command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Drives services through `pebble`.
#[derive(Debug, Clone)]
pub struct PebbleSupervisor {
    config: PebbleConfig,
}

impl PebbleSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub const fn new(config: PebbleConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PebbleConfig {
        &self.config
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.config.bin.display(), args.join(" "))
    }

    /// Run the CLI and capture its output regardless of exit status.
    async fn output(&self, args: &[String], stdin: Option<&str>) -> Result<Output> {
        let command_line = self.describe(args);
        debug!(command = %command_line, "Running pebble");

        let mut command = Command::new(&self.config.bin);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.pebble_dir {
            command.env("PEBBLE", dir);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::spawn(self.config.bin.display().to_string(), e.to_string())
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                command: command_line,
                timeout: self.config.command_timeout,
            })?
            .map_err(Error::from)
    }

    /// Run the CLI and fail on a non-zero exit.
    async fn checked(&self, args: &[String]) -> Result<String> {
        let output = self.output(args, None).await?;
        if !output.status.success() {
            return Err(Error::command_failed(
                self.describe(args),
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn services(&self) -> Result<BTreeSet<String>> {
        let stdout = self.checked(&["services".to_string()]).await?;
        Ok(parse_active_services(&stdout))
    }

    async fn combine_layer(&self, plan: &ServicePlan) -> Result<()> {
        let yaml = Layer::from(plan).to_yaml()?;
        let file = tempfile::Builder::new()
            .prefix("penpot-layer-")
            .suffix(".yaml")
            .tempfile()?;
        tokio::fs::write(file.path(), yaml).await?;

        let args = vec![
            "add".to_string(),
            "--combine".to_string(),
            self.config.layer_label.clone(),
            file.path().display().to_string(),
        ];
        self.checked(&args).await?;
        info!(label = %self.config.layer_label, services = plan.services.len(), "Combined layer");
        Ok(())
    }
}

/// Names of the services in the `active` state of a `pebble services` table.
///
/// The first line is a header; columns are `Service Startup Current Since`.
#[must_use]
pub fn parse_active_services(table: &str) -> BTreeSet<String> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let name = columns.next()?;
            let current = columns.nth(1)?;
            (current == "active").then(|| name.to_string())
        })
        .collect()
}

#[async_trait]
impl Supervisor for PebbleSupervisor {
    async fn can_connect(&self) -> bool {
        match self.checked(&["services".to_string()]).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Pebble not reachable");
                false
            }
        }
    }

    async fn apply_plan(&self, plan: &ServicePlan) -> penpot_reconciler::Result<()> {
        self.combine_layer(plan)
            .await
            .map_err(|e| penpot_reconciler::Error::apply_failed(e.to_string()))
    }

    async fn start(&self, service: &str) -> penpot_reconciler::Result<()> {
        if self.services().await?.contains(service) {
            return Ok(());
        }
        self.checked(&["start".to_string(), service.to_string()])
            .await?;
        info!(service, "Started service");
        Ok(())
    }

    async fn stop(&self, service: &str) -> penpot_reconciler::Result<()> {
        if !self.services().await?.contains(service) {
            return Ok(());
        }
        self.checked(&["stop".to_string(), service.to_string()])
            .await?;
        info!(service, "Stopped service");
        Ok(())
    }

    async fn running(&self) -> penpot_reconciler::Result<BTreeSet<String>> {
        Ok(self.services().await?)
    }
}

#[async_trait]
impl WorkloadExec for PebbleSupervisor {
    async fn exec(&self, request: &ExecRequest) -> penpot_reconciler::Result<ExecOutput> {
        let args = ["exec".to_string(), "-w".to_string(), request.working_dir.clone()]
            .into_iter()
            .chain(std::iter::once("--".to_string()))
            .chain(request.command.iter().cloned())
            .collect::<Vec<_>>();

        let output = self.output(&args, request.stdin.as_deref()).await?;
        if !output.status.success() {
            warn!(command = ?request.command, status = %output.status, "Workload command failed");
        }
        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_parse_active_services() {
        let table = "\
Service   Startup   Current   Since
backend   disabled  active    today at 10:00 UTC
exporter  disabled  inactive  -
frontend  disabled  active    today at 10:01 UTC
";
        let active = parse_active_services(table);
        assert_eq!(
            active,
            BTreeSet::from(["backend".to_string(), "frontend".to_string()])
        );
    }

    #[test]
    fn test_parse_tolerates_empty_and_short_lines() {
        assert!(parse_active_services("").is_empty());
        assert!(parse_active_services("Service Startup Current Since\nbroken\n").is_empty());
    }

    #[cfg(unix)]
    mod cli {
        #![allow(clippy::unwrap_used)]

        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use penpot_reconciler::plan::Override;
        use penpot_reconciler::{EnvMap, Service};
        use tempfile::TempDir;

        use super::*;

        /// Shell stand-in for `pebble` that keeps its state beside itself.
        const FAKE_PEBBLE: &str = r#"#!/bin/sh
state="$(dirname "$0")"
echo "$*" >> "$state/calls"
case "$1" in
  services)
    echo "Service  Startup  Current  Since"
    for s in backend exporter frontend; do
      if grep -qx "$s" "$state/running" 2>/dev/null; then
        echo "$s  disabled  active  today"
      else
        echo "$s  disabled  inactive  -"
      fi
    done ;;
  add) cp "$4" "$state/layer.yaml" ;;
  start) echo "$2" >> "$state/running" ;;
  stop)
    grep -vx "$2" "$state/running" > "$state/running.tmp"
    mv "$state/running.tmp" "$state/running" ;;
  exec)
    shift 4
    if [ "$1" = "fail" ]; then echo "oops" >&2; exit 3; fi
    cat ;;
esac
"#;

        fn fake_pebble() -> (TempDir, PebbleSupervisor) {
            let dir = TempDir::new().unwrap();
            let bin = dir.path().join("pebble");
            std::fs::write(&bin, FAKE_PEBBLE).unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
            let supervisor = PebbleSupervisor::new(
                PebbleConfig::default()
                    .with_bin(bin)
                    .with_command_timeout(Duration::from_secs(10)),
            );
            (dir, supervisor)
        }

        fn calls(dir: &Path) -> Vec<String> {
            std::fs::read_to_string(dir.join("calls"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        #[tokio::test]
        async fn test_start_is_noop_when_running() {
            let (dir, supervisor) = fake_pebble();

            supervisor.start("backend").await.unwrap();
            supervisor.start("backend").await.unwrap();

            let starts = calls(dir.path())
                .into_iter()
                .filter(|c| c.starts_with("start"))
                .count();
            assert_eq!(starts, 1);
            assert!(supervisor.running().await.unwrap().contains("backend"));
        }

        #[tokio::test]
        async fn test_stop_is_noop_when_stopped() {
            let (dir, supervisor) = fake_pebble();

            supervisor.stop("exporter").await.unwrap();
            assert!(!calls(dir.path()).iter().any(|c| c.starts_with("stop")));

            supervisor.start("exporter").await.unwrap();
            supervisor.stop("exporter").await.unwrap();
            assert!(supervisor.running().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_apply_plan_combines_layer() {
            let (dir, supervisor) = fake_pebble();
            let plan = ServicePlan {
                summary: "penpot services".to_string(),
                description: "penpot services".to_string(),
                services: [(
                    "backend".to_string(),
                    Service {
                        override_policy: Override::Replace,
                        summary: "penpot backend".to_string(),
                        command: "/opt/penpot/backend/run.sh".to_string(),
                        working_dir: "/opt/penpot/backend/".to_string(),
                        after: Vec::new(),
                        environment: EnvMap::new(),
                        health_check: None,
                    },
                )]
                .into(),
            };

            supervisor.apply_plan(&plan).await.unwrap();

            let applied = std::fs::read_to_string(dir.path().join("layer.yaml")).unwrap();
            let layer: Layer = serde_yaml::from_str(&applied).unwrap();
            assert_eq!(layer, Layer::from(&plan));
            assert!(calls(dir.path())
                .iter()
                .any(|c| c.starts_with("add --combine penpot ")));
        }

        #[tokio::test]
        async fn test_exec_passes_stdin_and_reports_exit_code() {
            let (_dir, supervisor) = fake_pebble();

            let echoed = supervisor
                .exec(&ExecRequest::new(["cat"], "/opt/penpot/backend/").with_stdin("s3cret"))
                .await
                .unwrap();
            assert!(echoed.success());
            assert_eq!(echoed.stdout, "s3cret");

            let failed = supervisor
                .exec(&ExecRequest::new(["fail"], "/"))
                .await
                .unwrap();
            assert_eq!(failed.exit_code, Some(3));
            assert_eq!(failed.stderr.trim(), "oops");
        }

        #[tokio::test]
        async fn test_missing_binary_is_unreachable() {
            let supervisor = PebbleSupervisor::new(
                PebbleConfig::default().with_bin("/nonexistent/pebble"),
            );
            assert!(!supervisor.can_connect().await);
            assert!(supervisor.running().await.is_err());
        }
    }
}
