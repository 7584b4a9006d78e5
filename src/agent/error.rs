// ABOUTME: Errors that end a task before its backend ever runs.
// ABOUTME: Each one fails the task cleanly; the live system is untouched.

use crate::domain::BackendKind;
use crate::staging::StageError;
use crate::store::StoreError;
use crate::types::ArtifactId;

/// Reasons a claimed task could not be prepared for execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Deploy task with no artifact to deploy.
    #[error("deploy task has no artifact reference")]
    MissingArtifactRef,

    #[error("artifact {0} not found")]
    ArtifactNotFound(ArtifactId),

    /// Rollback with no artifact reference and nothing to fall back to.
    #[error("no previous {0} artifact to roll back to")]
    NoPreviousArtifact(BackendKind),

    #[error("artifact {artifact} targets {artifact_kind}, agent runs {agent_kind}")]
    BackendMismatch {
        artifact: ArtifactId,
        artifact_kind: BackendKind,
        agent_kind: BackendKind,
    },

    #[error("staging failed: {0}")]
    Stage(#[from] StageError),

    /// The blocking staging job panicked or was cancelled.
    #[error("staging interrupted: {0}")]
    StageInterrupted(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, TaskError::Stage(e) if e.is_integrity())
    }
}
