// ABOUTME: Non-atomic backend driving `docker compose pull` and `up`.
// ABOUTME: A failed `up` may leave old and new containers mixed.

use nonempty::NonEmpty;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::DeployResult;
use super::command::{CommandSpec, ProcessRunner};
use crate::staging::StagedArtifact;
use crate::types::ProjectName;

/// Reconciles one Compose project.
#[derive(Clone)]
pub struct ComposeBackend {
    command: NonEmpty<String>,
    project: ProjectName,
    pull_timeout: Duration,
    up_timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl ComposeBackend {
    pub fn new(
        project: ProjectName,
        command: NonEmpty<String>,
        pull_timeout: Duration,
        up_timeout: Duration,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            command,
            project,
            pull_timeout,
            up_timeout,
            runner,
        }
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    fn base_command(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(self.command.head.clone(), timeout)
            .args(self.command.tail.iter().cloned())
            .current_dir(staged.root())
            .envs(overrides);

        if let Some(file) = staged.compose_file() {
            spec = spec.arg("-f").path_arg(file);
        }
        spec = spec.args(["-p", self.project.as_str()]);
        if let Some(env_file) = staged.env_file() {
            spec = spec.arg("--env-file").path_arg(env_file);
        }
        spec
    }

    pub fn pull_command(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> CommandSpec {
        self.base_command(staged, overrides, self.pull_timeout)
            .arg("pull")
    }

    pub fn up_command(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> CommandSpec {
        self.base_command(staged, overrides, self.up_timeout)
            .args(["up", "--detach", "--remove-orphans"])
    }

    pub async fn deploy(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> DeployResult {
        info!(project = %self.project, version = staged.version(), "compose pull");
        match self.runner.run(&self.pull_command(staged, overrides)).await {
            Err(e) => {
                return DeployResult::clean_failure(format!("compose pull failed: {e}"));
            }
            Ok(output) if !output.success() => {
                return DeployResult::clean_failure(format!(
                    "compose pull failed: {}",
                    output.diagnostic()
                ));
            }
            Ok(_) => {}
        }

        info!(project = %self.project, version = staged.version(), "compose up");
        match self.runner.run(&self.up_command(staged, overrides)).await {
            Err(e) if !e.process_started() => {
                DeployResult::clean_failure(format!("compose up not started: {e}"))
            }
            Err(e) => DeployResult::partial_failure(format!(
                "compose up did not complete, containers may be mixed: {e}"
            )),
            Ok(output) if !output.success() => DeployResult::partial_failure(format!(
                "compose up failed, containers may be mixed: {}",
                output.diagnostic()
            )),
            Ok(_) => DeployResult::success(
                None,
                format!("project {} running {}", self.project, staged.version()),
            ),
        }
    }

    /// Compose keeps no revision history to return to.
    pub fn rollback_to_revision(&self, revision: Option<u32>) -> DeployResult {
        let wanted = revision
            .map(|r| format!("revision {r}"))
            .unwrap_or_else(|| "the previous revision".to_string());
        DeployResult::clean_failure(format!(
            "compose cannot roll back to {wanted}; redeploy a retained artifact instead"
        ))
    }
}
