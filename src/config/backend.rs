// ABOUTME: Backend section of the config, tagged by `kind: helm | compose`.
// ABOUTME: Builds the matching executor backend around a process runner.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::deserialize::deserialize_command;
use crate::domain::BackendKind;
use crate::executor::{Backend, ComposeBackend, HelmBackend, ProcessRunner};
use crate::types::{ProjectName, ReleaseName};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Helm(HelmConfig),
    Compose(ComposeConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelmConfig {
    pub release: ReleaseName,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Passed to `helm --timeout`; the process gets a grace period on top.
    #[serde(default = "default_helm_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_helm_binary")]
    pub binary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeConfig {
    pub project: ProjectName,
    #[serde(default = "default_compose_command", deserialize_with = "deserialize_command")]
    pub command: NonEmpty<String>,
    #[serde(default = "default_pull_timeout", with = "humantime_serde")]
    pub pull_timeout: Duration,
    #[serde(default = "default_up_timeout", with = "humantime_serde")]
    pub up_timeout: Duration,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_helm_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

fn default_compose_command() -> NonEmpty<String> {
    NonEmpty {
        head: "docker".to_string(),
        tail: vec!["compose".to_string()],
    }
}

fn default_pull_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_up_timeout() -> Duration {
    Duration::from_secs(300)
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Helm(_) => BackendKind::Helm,
            BackendConfig::Compose(_) => BackendKind::Compose,
        }
    }

    /// Shortest timeout the backend is configured with.
    pub fn timeout(&self) -> Duration {
        match self {
            BackendConfig::Helm(helm) => helm.timeout,
            BackendConfig::Compose(compose) => compose.pull_timeout.min(compose.up_timeout),
        }
    }

    pub fn build(&self, runner: Arc<dyn ProcessRunner>) -> Backend {
        match self {
            BackendConfig::Helm(helm) => Backend::Helm(
                HelmBackend::new(helm.release.clone(), &helm.namespace, helm.timeout, runner)
                    .with_program(&helm.binary),
            ),
            BackendConfig::Compose(compose) => Backend::Compose(ComposeBackend::new(
                compose.project.clone(),
                compose.command.clone(),
                compose.pull_timeout,
                compose.up_timeout,
                runner,
            )),
        }
    }
}
