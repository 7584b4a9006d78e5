// ABOUTME: Storage traits for the durable task queue and artifact flags.
// ABOUTME: Implemented by an in-memory store and a Postgres store.

mod error;
mod memory;
mod postgres;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{Artifact, BackendKind, Promotion, Resolution, Task};
use crate::types::{ArtifactId, TaskId, WorkerId};

/// Error recorded on tasks failed by a sweep.
pub const LEASE_EXPIRED: &str = "lease expired";

/// The shared task queue.
///
/// Every state change is conditional on the stored row, so two agents racing
/// against the same store never both succeed.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Atomically claim the earliest eligible pending task for `worker`.
    ///
    /// Returns `None` when nothing is eligible or another worker won the race.
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Task>, StoreError>;

    /// Stamp a heartbeat. Returns false when `worker` no longer owns an
    /// in-progress lease on the task.
    async fn heartbeat(&self, id: &TaskId, worker: &WorkerId) -> Result<bool, StoreError>;

    /// Move an owned in-progress task to its terminal state. Returns false,
    /// leaving the row untouched, when `worker` is not the owner.
    async fn resolve(
        &self,
        id: &TaskId,
        worker: &WorkerId,
        resolution: &Resolution,
    ) -> Result<bool, StoreError>;

    /// Fail every in-progress task whose last sign of life is older than
    /// `lease_timeout`. Returns the ids that were failed.
    async fn sweep_expired(&self, lease_timeout: Duration) -> Result<Vec<TaskId>, StoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Record that `worker` polled the queue.
    async fn record_poll(&self, _worker: &WorkerId) -> Result<(), StoreError> {
        Ok(())
    }

    /// Mirror the maintenance toggle for the control plane.
    async fn set_maintenance_mode(&self, _enabled: bool) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Read access to release artifacts plus the flag flip after a deploy.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get_artifact(&self, id: &ArtifactId) -> Result<Option<Artifact>, StoreError>;

    async fn current_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError>;

    async fn previous_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError>;

    /// Make `id` the current artifact for `kind` and the old current one
    /// previous, in one transaction.
    ///
    /// Promoting the artifact that is already current changes nothing.
    async fn promote(&self, kind: BackendKind, id: &ArtifactId) -> Result<Promotion, StoreError>;
}
