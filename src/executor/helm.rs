// ABOUTME: Atomic-capable backend driving `helm upgrade --atomic`.
// ABOUTME: A reported failure means Helm already reverted; a killed process does not.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::DeployResult;
use super::command::{CommandError, CommandSpec, ProcessRunner};
use crate::staging::StagedArtifact;
use crate::types::ReleaseName;

/// Extra time allowed past Helm's own `--timeout` before the process is killed.
pub const PROCESS_GRACE: Duration = Duration::from_secs(60);

/// Upgrades one Helm release.
#[derive(Clone)]
pub struct HelmBackend {
    program: String,
    release: ReleaseName,
    namespace: String,
    timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl HelmBackend {
    pub fn new(
        release: ReleaseName,
        namespace: impl Into<String>,
        timeout: Duration,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            program: "helm".to_string(),
            release,
            namespace: namespace.into(),
            timeout,
            runner,
        }
    }

    /// Use a different helm binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn release(&self) -> &ReleaseName {
        &self.release
    }

    fn helm_timeout(&self) -> String {
        format!("{}s", self.timeout.as_secs().max(1))
    }

    fn process_timeout(&self) -> Duration {
        self.timeout + PROCESS_GRACE
    }

    /// `helm upgrade` invocation for a staged chart.
    pub fn upgrade_command(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program, self.process_timeout())
            .args(["upgrade", self.release.as_str()])
            .path_arg(staged.root())
            .args(["--install", "--namespace", self.namespace.as_str(), "--create-namespace"]);

        if let Some(values) = staged.values_file() {
            spec = spec.arg("--values").path_arg(values);
        }
        for (key, value) in overrides {
            spec = spec.arg("--set").arg(format!("{key}={value}"));
        }

        spec.args(["--atomic", "--wait", "--timeout"])
            .arg(self.helm_timeout())
            .args(["--output", "json"])
    }

    /// `helm rollback` invocation; without a revision Helm picks the prior one.
    pub fn rollback_command(&self, revision: Option<u32>) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program, self.process_timeout())
            .args(["rollback", self.release.as_str()]);
        if let Some(revision) = revision {
            spec = spec.arg(revision.to_string());
        }
        spec.args(["--namespace", self.namespace.as_str(), "--wait", "--timeout"])
            .arg(self.helm_timeout())
    }

    fn list_command(&self) -> CommandSpec {
        CommandSpec::new(&self.program, Duration::from_secs(30))
            .args(["list", "--namespace", self.namespace.as_str(), "--filter"])
            .arg(format!("^{}$", self.release))
            .args(["--output", "json"])
    }

    pub async fn deploy(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> DeployResult {
        let spec = self.upgrade_command(staged, overrides);
        info!(release = %self.release, version = staged.version(), "helm upgrade");

        match self.runner.run(&spec).await {
            Err(e) => self.command_failure("upgrade", e),
            Ok(output) if !output.success() => DeployResult::clean_failure(format!(
                "helm upgrade failed and was rolled back: {}",
                output.diagnostic()
            )),
            Ok(output) => {
                let revision = match parse_upgrade_revision(&output.stdout) {
                    Some(revision) => Some(revision),
                    None => self.current_revision().await,
                };
                DeployResult::success(
                    revision,
                    format!("release {} upgraded to {}", self.release, staged.version()),
                )
            }
        }
    }

    pub async fn rollback_to_revision(&self, revision: Option<u32>) -> DeployResult {
        let spec = self.rollback_command(revision);
        info!(release = %self.release, revision = ?revision, "helm rollback");

        match self.runner.run(&spec).await {
            Err(e) => self.command_failure("rollback", e),
            Ok(output) if !output.success() => DeployResult::clean_failure(format!(
                "helm rollback failed: {}",
                output.diagnostic()
            )),
            Ok(_) => {
                let current = self.current_revision().await;
                let target = revision
                    .map(|r| format!("revision {r}"))
                    .unwrap_or_else(|| "the previous revision".to_string());
                DeployResult::success(
                    current,
                    format!("release {} rolled back to {}", self.release, target),
                )
            }
        }
    }

    /// Revision Helm reports for the release right now.
    pub async fn current_revision(&self) -> Option<u32> {
        match self.runner.run(&self.list_command()).await {
            Ok(output) if output.success() => parse_list_revision(&output.stdout),
            Ok(output) => {
                warn!("helm list failed: {}", output.diagnostic());
                None
            }
            Err(e) => {
                warn!("helm list failed: {}", e);
                None
            }
        }
    }

    fn command_failure(&self, action: &str, err: CommandError) -> DeployResult {
        if err.process_started() {
            // Killed mid-flight: Helm never got to report, let alone revert.
            DeployResult::partial_failure(format!(
                "helm {action} for {} did not complete: {err}",
                self.release
            ))
        } else {
            DeployResult::clean_failure(format!("helm {action} not started: {err}"))
        }
    }
}

fn revision_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Revision from `helm upgrade --output json` (`{"version": 3, ...}`).
pub fn parse_upgrade_revision(stdout: &str) -> Option<u32> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    value.get("version").and_then(revision_value)
}

/// Revision from `helm list --output json` (`[{"revision": "3", ...}]`).
pub fn parse_list_revision(stdout: &str) -> Option<u32> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    value.get(0)?.get("revision").and_then(revision_value)
}
