// ABOUTME: Transitions of one task run through Claimed, Prepared, Executed and Settled.
// ABOUTME: Each method consumes the run and returns the next state.

use std::collections::BTreeMap;
use tracing::error;

use crate::diagnostics::{Diagnostics, Warning};
use crate::domain::{
    Artifact, BackendKind, FailureMode, Outcome, Resolution, TaskKind, TaskResult,
};
use crate::executor::{Execution, Executor, PromotionOutcome, RollbackTarget};
use crate::lease::{HeartbeatExtender, HeartbeatReport, Lease, LeaseManager};
use crate::maintenance::MaintenanceController;
use crate::staging::{StagedArtifact, Stager};
use crate::store::ArtifactStore;
use crate::types::ArtifactId;

use super::error::TaskError;
use super::state::{Claimed, Executed, Plan, Prepared, Settled};

/// Result type for transitions that fail the task on error.
pub type TransitionResult<T, S> = Result<TaskRun<T>, (TaskRun<S>, TaskError)>;

/// One claimed task moving through the pipeline, parameterized by its state.
///
/// The run owns the lease, so whoever holds the run is the only code able to
/// resolve the task.
#[derive(Debug)]
pub struct TaskRun<S> {
    pub(crate) lease: Lease,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) version: Option<String>,
    pub(crate) state: S,
}

impl<S> TaskRun<S> {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn kind(&self) -> TaskKind {
        self.lease.task().kind
    }

    /// Version of the artifact this run targets, once known.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn transition<T>(self, state: T) -> TaskRun<T> {
        TaskRun {
            lease: self.lease,
            diagnostics: self.diagnostics,
            version: self.version,
            state,
        }
    }
}

// =============================================================================
// Claimed -> Prepared
// =============================================================================

impl TaskRun<Claimed> {
    pub fn new(lease: Lease) -> Self {
        TaskRun {
            lease,
            diagnostics: Diagnostics::default(),
            version: None,
            state: Claimed,
        }
    }

    /// Resolve what the task targets and stage it.
    ///
    /// Nothing outside the staging directory is touched here, so every error
    /// is a clean failure.
    pub async fn prepare(
        mut self,
        artifacts: &dyn ArtifactStore,
        stager: &Stager,
        backend: BackendKind,
    ) -> TransitionResult<Prepared, Claimed> {
        match self.resolve_plan(artifacts, stager, backend).await {
            Ok(plan) => Ok(self.transition(Prepared { plan })),
            Err(e) => Err((self, e)),
        }
    }

    async fn resolve_plan(
        &mut self,
        artifacts: &dyn ArtifactStore,
        stager: &Stager,
        backend: BackendKind,
    ) -> Result<Plan, TaskError> {
        let task = self.lease.task();
        let (kind, artifact_ref, target_revision) =
            (task.kind, task.artifact_ref, task.target_revision);

        match (kind, artifact_ref) {
            (TaskKind::Deploy, None) => Err(TaskError::MissingArtifactRef),
            (TaskKind::Deploy, Some(id)) => {
                let artifact = self.fetch(artifacts, id, backend).await?;
                Ok(Plan::Deploy(stage(stager, artifact).await?))
            }
            (TaskKind::Rollback, Some(id)) => {
                let artifact = self.fetch(artifacts, id, backend).await?;
                Ok(Plan::Redeploy(stage(stager, artifact).await?))
            }
            (TaskKind::Rollback, None) => {
                let previous = artifacts.previous_artifact(backend).await?;
                if backend.is_atomic() {
                    // An explicit revision may not match the previous artifact.
                    let restores = previous.filter(|_| target_revision.is_none());
                    self.version = restores.as_ref().map(|a| a.version.clone());
                    return Ok(Plan::Revision {
                        revision: target_revision,
                        restores: restores.map(|a| a.id),
                    });
                }
                let previous = previous.ok_or(TaskError::NoPreviousArtifact(backend))?;
                self.version = Some(previous.version.clone());
                Ok(Plan::Redeploy(stage(stager, previous).await?))
            }
        }
    }

    async fn fetch(
        &mut self,
        artifacts: &dyn ArtifactStore,
        id: ArtifactId,
        backend: BackendKind,
    ) -> Result<Artifact, TaskError> {
        let artifact = artifacts
            .get_artifact(&id)
            .await?
            .ok_or(TaskError::ArtifactNotFound(id))?;
        self.version = Some(artifact.version.clone());

        if artifact.backend_kind != backend {
            return Err(TaskError::BackendMismatch {
                artifact: id,
                artifact_kind: artifact.backend_kind,
                agent_kind: backend,
            });
        }
        Ok(artifact)
    }

    /// Fail the task without running anything.
    pub fn fail(self, error: TaskError) -> TaskRun<Settled> {
        let message = error.to_string();
        error!(
            task_id = %self.lease.id(),
            integrity = error.is_integrity(),
            "task failed before execution: {}",
            message
        );

        let mut result = TaskResult::new(Outcome::for_task(self.kind(), false), message.clone());
        result.release_version = self.version.clone();
        result.failure_mode = Some(FailureMode::Clean);
        result.warnings = self.diagnostics.messages();

        self.transition(Settled {
            resolution: Resolution::Failed {
                result,
                error: message,
            },
            staged: None,
            heartbeat: None,
        })
    }
}

async fn stage(stager: &Stager, artifact: Artifact) -> Result<StagedArtifact, TaskError> {
    let stager = stager.clone();
    let staged = tokio::task::spawn_blocking(move || stager.stage(&artifact))
        .await
        .map_err(|e| TaskError::StageInterrupted(e.to_string()))??;
    Ok(staged)
}

// =============================================================================
// Prepared -> Executed
// =============================================================================

impl TaskRun<Prepared> {
    pub fn plan(&self) -> &Plan {
        &self.state.plan
    }

    /// Run the backend inside the maintenance window with the lease kept alive.
    pub async fn execute(
        self,
        leases: &LeaseManager,
        executor: &Executor,
        maintenance: &MaintenanceController,
        heartbeat: &HeartbeatExtender,
    ) -> TaskRun<Executed> {
        let TaskRun {
            lease,
            mut diagnostics,
            version,
            state: Prepared { plan },
        } = self;

        maintenance.enable(&mut diagnostics).await;
        let beats = heartbeat.start(leases.handle(&lease));

        let (execution, staged) = dispatch(executor, plan, &lease.task().overrides).await;

        let report = beats.stop().await;
        record_heartbeat(&report, &mut diagnostics);
        maintenance.disable(&mut diagnostics).await;

        TaskRun {
            lease,
            diagnostics,
            version,
            state: Executed {
                execution,
                staged,
                heartbeat: report,
            },
        }
    }
}

async fn dispatch(
    executor: &Executor,
    plan: Plan,
    overrides: &BTreeMap<String, String>,
) -> (Execution, Option<StagedArtifact>) {
    match plan {
        Plan::Deploy(staged) => {
            let execution = executor.deploy(&staged, overrides).await;
            (execution, Some(staged))
        }
        Plan::Redeploy(staged) => {
            let execution = executor
                .rollback(RollbackTarget::Release(&staged), overrides)
                .await;
            (execution, Some(staged))
        }
        Plan::Revision { revision, restores } => {
            let execution = executor
                .rollback(RollbackTarget::Revision { revision, restores }, overrides)
                .await;
            (execution, None)
        }
    }
}

fn record_heartbeat(report: &HeartbeatReport, diagnostics: &mut Diagnostics) {
    if report.failures > 0 {
        diagnostics.warn(Warning::heartbeat(format!(
            "{} of {} heartbeats failed, last error: {}",
            report.failures,
            report.sent + report.failures,
            report.last_error.as_deref().unwrap_or("unknown")
        )));
    }
    if report.lease_lost {
        diagnostics.warn(Warning::lease_lost(
            "store no longer recognized this worker as the lease owner",
        ));
    }
}

// =============================================================================
// Executed -> Settled
// =============================================================================

impl TaskRun<Executed> {
    pub fn execution(&self) -> &Execution {
        &self.state.execution
    }

    /// Turn the backend result into the task's terminal resolution.
    pub fn settle(self) -> TaskRun<Settled> {
        let kind = self.kind();
        let TaskRun {
            lease,
            diagnostics,
            version,
            state:
                Executed {
                    execution: Execution { result, promotion },
                    staged,
                    heartbeat,
                },
        } = self;

        let flag_error = match promotion {
            PromotionOutcome::Failed(e) => Some(e),
            PromotionOutcome::NotAttempted | PromotionOutcome::Promoted(_) => None,
        };
        let succeeded = result.is_success() && flag_error.is_none();
        let message = match &flag_error {
            Some(e) => format!("{}, but artifact flags were not updated: {e}", result.message),
            None => result.message.clone(),
        };

        let mut task_result = TaskResult::new(Outcome::for_task(kind, succeeded), message.clone());
        task_result.release_version = version.clone();
        task_result.backend_revision = result.backend_revision;
        task_result.failure_mode = result.failure_mode();
        task_result.requires_manual_intervention =
            result.failure_mode() == Some(FailureMode::Partial) || flag_error.is_some();
        task_result.warnings = diagnostics.messages();

        let resolution = if succeeded {
            Resolution::Completed(task_result)
        } else {
            Resolution::Failed {
                result: task_result,
                error: message,
            }
        };

        TaskRun {
            lease,
            diagnostics,
            version,
            state: Settled {
                resolution,
                staged,
                heartbeat: Some(heartbeat),
            },
        }
    }
}

impl TaskRun<Settled> {
    pub fn resolution(&self) -> &Resolution {
        &self.state.resolution
    }
}
