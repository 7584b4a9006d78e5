// ABOUTME: The agent poll loop: claim one task, carry it through the pipeline, repeat.
// ABOUTME: Tasks run strictly one at a time; shutdown waits for the task in flight.

mod error;
mod run;
mod state;

pub use error::TaskError;
pub use run::{TaskRun, TransitionResult};
pub use state::{Claimed, Executed, Plan, Prepared, Settled};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::diagnostics::{Diagnostics, Warning};
use crate::domain::{Resolution, TaskKind, TaskResult, TaskStatus};
use crate::executor::{Executor, SystemRunner};
use crate::lease::{
    HeartbeatExtender, HeartbeatReport, Lease, LeaseManager, LeaseSweeper, ResolveOutcome,
};
use crate::maintenance::MaintenanceController;
use crate::notify::{LogNotifier, Notification, Notifiers};
use crate::staging::Stager;
use crate::store::{ArtifactStore, StoreError};
use crate::types::TaskId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to one claimed task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub result: TaskResult,
    pub error: Option<String>,
    pub resolve: ResolveOutcome,
    pub heartbeat: Option<HeartbeatReport>,
    /// Every warning, including those raised after the task was resolved.
    pub warnings: Vec<String>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// A deployment agent bound to one worker identity and one backend.
pub struct Agent {
    leases: LeaseManager,
    artifacts: Arc<dyn ArtifactStore>,
    stager: Stager,
    executor: Executor,
    maintenance: MaintenanceController,
    heartbeat: HeartbeatExtender,
    sweeper: Option<LeaseSweeper>,
    notifiers: Notifiers,
    poll_interval: Duration,
}

impl Agent {
    pub fn new(
        leases: LeaseManager,
        artifacts: Arc<dyn ArtifactStore>,
        stager: Stager,
        executor: Executor,
    ) -> Self {
        Self {
            leases,
            artifacts,
            stager,
            executor,
            maintenance: MaintenanceController::disabled(Arc::new(SystemRunner)),
            heartbeat: HeartbeatExtender::new(DEFAULT_HEARTBEAT_INTERVAL),
            sweeper: None,
            notifiers: Notifiers::new().with(Arc::new(LogNotifier)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceController) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatExtender) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sweep expired leases whenever a poll finds nothing to do.
    pub fn with_sweeper(mut self, sweeper: LeaseSweeper) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    pub fn with_notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Poll until `shutdown` flips to true. Returns the number of tasks handled.
    ///
    /// Store errors are logged and retried on the next poll.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut processed = 0;
        info!(
            worker = %self.leases.worker(),
            backend = %self.executor.kind(),
            poll_secs = self.poll_interval.as_secs(),
            "agent started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                // More work may be queued behind it.
                Ok(Some(_)) => {
                    processed += 1;
                    continue;
                }
                Ok(None) => self.idle().await,
                Err(e) => error!("poll failed: {}", e),
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(processed, "agent stopped");
        processed
    }

    /// One poll: claim a task and carry it to its end, if there is one.
    pub async fn run_once(&self) -> Result<Option<TaskReport>, StoreError> {
        if let Err(e) = self.leases.store().record_poll(self.leases.worker()).await {
            warn!("failed to record poll: {}", e);
        }
        let Some(lease) = self.leases.claim_next().await? else {
            debug!("no task ready");
            return Ok(None);
        };
        self.process(lease).await.map(Some)
    }

    /// Sweep expired leases if this agent is configured to.
    pub async fn idle(&self) {
        if let Some(sweeper) = &self.sweeper
            && let Err(e) = sweeper.sweep_once().await
        {
            warn!("lease sweep failed: {}", e);
        }
    }

    /// Run a claimed task through the whole pipeline.
    pub async fn process(&self, lease: Lease) -> Result<TaskReport, StoreError> {
        let run = TaskRun::new(lease);
        let settled = match run
            .prepare(self.artifacts.as_ref(), &self.stager, self.executor.kind())
            .await
        {
            Ok(prepared) => prepared
                .execute(
                    &self.leases,
                    &self.executor,
                    &self.maintenance,
                    &self.heartbeat,
                )
                .await
                .settle(),
            Err((claimed, error)) => claimed.fail(error),
        };
        self.finish(settled).await
    }

    /// Resolve the lease, wipe staged files, then notify.
    async fn finish(&self, run: TaskRun<Settled>) -> Result<TaskReport, StoreError> {
        let TaskRun {
            lease,
            mut diagnostics,
            state:
                Settled {
                    resolution,
                    staged,
                    heartbeat,
                },
            ..
        } = run;
        let task_id = lease.id();
        let kind = lease.task().kind;

        let resolved = self.leases.resolve(lease, resolution.clone()).await;

        if let Some(staged) = staged {
            cleanup(staged, &mut diagnostics).await;
        }
        let resolve = resolved?;

        let report = report(task_id, kind, resolution, resolve, heartbeat, &diagnostics);
        let notification = Notification::new(
            task_id,
            kind,
            self.leases.worker().clone(),
            &report.result,
            report.error.clone(),
        );
        self.notifiers.notify_all(&notification).await;

        Ok(report)
    }
}

async fn cleanup(staged: crate::staging::StagedArtifact, diagnostics: &mut Diagnostics) {
    let dir = staged.dir().to_path_buf();
    match tokio::task::spawn_blocking(move || staged.cleanup()).await {
        Ok(Ok(())) => debug!(dir = %dir.display(), "staged files removed"),
        Ok(Err(e)) => diagnostics.warn(Warning::cleanup(format!(
            "failed to remove {}: {e}",
            dir.display()
        ))),
        Err(e) => diagnostics.warn(Warning::cleanup(format!(
            "cleanup of {} interrupted: {e}",
            dir.display()
        ))),
    }
}

fn report(
    task_id: TaskId,
    kind: TaskKind,
    resolution: Resolution,
    resolve: ResolveOutcome,
    heartbeat: Option<HeartbeatReport>,
    diagnostics: &Diagnostics,
) -> TaskReport {
    let status = resolution.status();
    let (result, error) = match resolution {
        Resolution::Completed(result) => (result, None),
        Resolution::Failed { result, error } => (result, Some(error)),
    };
    TaskReport {
        task_id,
        kind,
        status,
        result,
        error,
        resolve,
        heartbeat,
        warnings: diagnostics.messages(),
    }
}
