// ABOUTME: Task leases: claiming, renewing and resolving queue entries.
// ABOUTME: Resolution consumes the lease so one worker can only resolve once.

mod heartbeat;
mod sweeper;

pub use heartbeat::{HeartbeatExtender, HeartbeatHandle, HeartbeatReport};
pub use sweeper::LeaseSweeper;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Resolution, Task};
use crate::store::{StoreError, TaskStore};
use crate::types::{TaskId, WorkerId};

/// Result of renewing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Extended,
    /// The task was resolved, swept or claimed by someone else.
    LeaseLost,
}

/// Result of resolving a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    /// The task was no longer ours; nothing was written.
    NotOwned,
}

/// Exclusive ownership of one in-progress task.
///
/// Deliberately not `Clone`: [`LeaseManager::resolve`] takes it by value.
#[derive(Debug)]
#[must_use = "a lease must be resolved or it will be swept as expired"]
pub struct Lease {
    task: Task,
}

impl Lease {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }
}

/// Cloneable capability to renew one lease, handed to the heartbeat task.
#[derive(Clone)]
pub struct LeaseHandle {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    worker: WorkerId,
}

impl LeaseHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Stamp a heartbeat for this lease.
    pub async fn beat(&self) -> Result<HeartbeatStatus, StoreError> {
        if self.store.heartbeat(&self.task_id, &self.worker).await? {
            debug!(task_id = %self.task_id, "heartbeat sent");
            Ok(HeartbeatStatus::Extended)
        } else {
            warn!(task_id = %self.task_id, worker = %self.worker, "lease may be lost");
            Ok(HeartbeatStatus::LeaseLost)
        }
    }
}

/// Claims and resolves tasks on behalf of one worker.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn TaskStore>,
    worker: WorkerId,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn TaskStore>, worker: WorkerId) -> Self {
        Self { store, worker }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Claim the earliest eligible pending task, if any.
    ///
    /// Losing a race to another worker is not an error; it yields `None`.
    pub async fn claim_next(&self) -> Result<Option<Lease>, StoreError> {
        let claimed = self.store.claim_next(&self.worker).await?;
        if let Some(task) = &claimed {
            info!(
                task_id = %task.id,
                kind = %task.kind,
                worker = %self.worker,
                "claimed task"
            );
        }
        Ok(claimed.map(|task| Lease { task }))
    }

    /// Renewal capability for `lease`.
    pub fn handle(&self, lease: &Lease) -> LeaseHandle {
        LeaseHandle {
            store: Arc::clone(&self.store),
            task_id: lease.id(),
            worker: self.worker.clone(),
        }
    }

    pub async fn heartbeat(&self, lease: &Lease) -> Result<HeartbeatStatus, StoreError> {
        self.handle(lease).beat().await
    }

    /// Move the task to its terminal state.
    ///
    /// When the task was swept or is owned by another worker this is a
    /// logged no-op returning [`ResolveOutcome::NotOwned`].
    pub async fn resolve(
        &self,
        lease: Lease,
        resolution: Resolution,
    ) -> Result<ResolveOutcome, StoreError> {
        let id = lease.id();
        if self.store.resolve(&id, &self.worker, &resolution).await? {
            info!(task_id = %id, status = %resolution.status(), "task resolved");
            Ok(ResolveOutcome::Resolved)
        } else {
            warn!(
                task_id = %id,
                worker = %self.worker,
                "task no longer owned by this worker, resolution dropped"
            );
            Ok(ResolveOutcome::NotOwned)
        }
    }
}
