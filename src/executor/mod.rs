// ABOUTME: Deployment executor over the Helm and Compose backends.
// ABOUTME: Promotes artifact flags after a successful run and never after a failed one.

mod command;
mod compose;
mod helm;

pub use command::{CommandError, CommandOutput, CommandSpec, ProcessRunner, SystemRunner};
pub use compose::ComposeBackend;
pub use helm::{HelmBackend, PROCESS_GRACE, parse_list_revision, parse_upgrade_revision};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{BackendKind, FailureMode, Promotion};
use crate::staging::StagedArtifact;
use crate::store::ArtifactStore;
use crate::types::ArtifactId;

/// Whether a backend run succeeded, and if not, how it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    Success,
    Failed(FailureMode),
}

/// Outcome of one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployResult {
    pub status: DeployStatus,
    /// Backend revision after the run, when the backend has one.
    pub backend_revision: Option<u32>,
    pub message: String,
}

impl DeployResult {
    pub fn success(backend_revision: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Success,
            backend_revision,
            message: message.into(),
        }
    }

    pub fn clean_failure(message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Failed(FailureMode::Clean),
            backend_revision: None,
            message: message.into(),
        }
    }

    pub fn partial_failure(message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Failed(FailureMode::Partial),
            backend_revision: None,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeployStatus::Success
    }

    pub fn failure_mode(&self) -> Option<FailureMode> {
        match self.status {
            DeployStatus::Success => None,
            DeployStatus::Failed(mode) => Some(mode),
        }
    }
}

/// What a rollback should return to.
#[derive(Debug, Clone, Copy)]
pub enum RollbackTarget<'a> {
    /// Backend history. `restores` names the artifact that becomes current
    /// again if the rollback succeeds.
    Revision {
        revision: Option<u32>,
        restores: Option<ArtifactId>,
    },
    /// Redeploy a retained artifact.
    Release(&'a StagedArtifact),
}

/// Result of flipping artifact flags after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The run failed, or there was no artifact to promote.
    NotAttempted,
    Promoted(Promotion),
    /// The run succeeded but the flags could not be updated.
    Failed(String),
}

/// A backend run plus the flag update that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub result: DeployResult,
    pub promotion: PromotionOutcome,
}

impl Execution {
    fn unpromoted(result: DeployResult) -> Self {
        Self {
            result,
            promotion: PromotionOutcome::NotAttempted,
        }
    }
}

/// The configured deployment backend.
#[derive(Clone)]
pub enum Backend {
    Helm(HelmBackend),
    Compose(ComposeBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Helm(_) => BackendKind::Helm,
            Backend::Compose(_) => BackendKind::Compose,
        }
    }

    pub async fn deploy(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> DeployResult {
        match self {
            Backend::Helm(helm) => helm.deploy(staged, overrides).await,
            Backend::Compose(compose) => compose.deploy(staged, overrides).await,
        }
    }

    pub async fn rollback(
        &self,
        target: RollbackTarget<'_>,
        overrides: &BTreeMap<String, String>,
    ) -> DeployResult {
        match (self, target) {
            (Backend::Helm(helm), RollbackTarget::Revision { revision, .. }) => {
                helm.rollback_to_revision(revision).await
            }
            (Backend::Compose(compose), RollbackTarget::Revision { revision, .. }) => {
                compose.rollback_to_revision(revision)
            }
            (backend, RollbackTarget::Release(staged)) => backend.deploy(staged, overrides).await,
        }
    }
}

/// Runs backend operations and keeps artifact flags in step with them.
#[derive(Clone)]
pub struct Executor {
    backend: Backend,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Executor {
    pub fn new(backend: Backend, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { backend, artifacts }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub async fn deploy(
        &self,
        staged: &StagedArtifact,
        overrides: &BTreeMap<String, String>,
    ) -> Execution {
        if let Some(mismatch) = self.kind_mismatch(staged) {
            return Execution::unpromoted(mismatch);
        }
        let result = self.backend.deploy(staged, overrides).await;
        self.promote_after(result, Some(staged.artifact_id())).await
    }

    pub async fn rollback(
        &self,
        target: RollbackTarget<'_>,
        overrides: &BTreeMap<String, String>,
    ) -> Execution {
        let restores = match target {
            RollbackTarget::Revision { restores, .. } => restores,
            RollbackTarget::Release(staged) => {
                if let Some(mismatch) = self.kind_mismatch(staged) {
                    return Execution::unpromoted(mismatch);
                }
                Some(staged.artifact_id())
            }
        };
        let result = self.backend.rollback(target, overrides).await;
        self.promote_after(result, restores).await
    }

    fn kind_mismatch(&self, staged: &StagedArtifact) -> Option<DeployResult> {
        (staged.backend_kind() != self.kind()).then(|| {
            DeployResult::clean_failure(format!(
                "artifact {} targets {}, agent runs {}",
                staged.artifact_id(),
                staged.backend_kind(),
                self.kind()
            ))
        })
    }

    async fn promote_after(&self, result: DeployResult, artifact: Option<ArtifactId>) -> Execution {
        let Some(artifact) = artifact.filter(|_| result.is_success()) else {
            return Execution::unpromoted(result);
        };

        let promotion = match self.artifacts.promote(self.kind(), &artifact).await {
            Ok(promotion) => {
                info!(
                    artifact = %artifact,
                    previous = ?promotion.previous.map(|p| p.to_string()),
                    changed = promotion.changed,
                    "artifact promoted"
                );
                PromotionOutcome::Promoted(promotion)
            }
            Err(e) => {
                error!(artifact = %artifact, "failed to update artifact flags: {}", e);
                PromotionOutcome::Failed(e.to_string())
            }
        };

        Execution { result, promotion }
    }
}
