// ABOUTME: In-process task and artifact store guarded by a single mutex.
// ABOUTME: Same lease semantics as Postgres; time comes from an injectable clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use parking_lot::Mutex;
use std::time::Duration;

use super::{ArtifactStore, LEASE_EXPIRED, StoreError, TaskStore};
use crate::domain::{Artifact, BackendKind, Promotion, Resolution, Task, TaskStatus};
use crate::types::{ArtifactId, TaskId, WorkerId};

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    artifacts: Vec<Artifact>,
    maintenance_mode: bool,
    last_poll: Option<(WorkerId, DateTime<Utc>)>,
}

/// Store kept entirely in memory.
///
/// Each operation runs inside one critical section, which gives the same
/// at-most-one-claim guarantee as the row lock in [`super::PgStore`].
pub struct InMemoryStore<C = DefaultClock> {
    state: Mutex<State>,
    clock: C,
}

impl InMemoryStore<DefaultClock> {
    pub fn new() -> Self {
        Self::with_clock(DefaultClock)
    }
}

impl Default for InMemoryStore<DefaultClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Send + Sync> InMemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    pub fn insert_task(&self, task: Task) -> TaskId {
        let id = task.id;
        self.state.lock().tasks.push(task);
        id
    }

    pub fn insert_artifact(&self, artifact: Artifact) -> ArtifactId {
        let id = artifact.id;
        self.state.lock().artifacts.push(artifact);
        id
    }

    /// Snapshot of a task.
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.state.lock().tasks.iter().find(|t| t.id == *id).cloned()
    }

    /// Snapshot of an artifact.
    pub fn artifact(&self, id: &ArtifactId) -> Option<Artifact> {
        self.state
            .lock()
            .artifacts
            .iter()
            .find(|a| a.id == *id)
            .cloned()
    }

    /// Snapshot of every artifact, in insertion order.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.state.lock().artifacts.clone()
    }

    pub fn maintenance_mode(&self) -> bool {
        self.state.lock().maintenance_mode
    }

    pub fn last_poll(&self) -> Option<(WorkerId, DateTime<Utc>)> {
        self.state.lock().last_poll.clone()
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TaskStore for InMemoryStore<C> {
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Task>, StoreError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();

        // min_by_key keeps the first of equal keys, so ties go to insertion order.
        let next = state
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Pending && t.not_before <= now)
            .min_by_key(|t| t.not_before);

        Ok(next.map(|task| {
            task.status = TaskStatus::InProgress;
            task.claimed_at = Some(now);
            task.claimed_by = Some(worker.clone());
            task.last_heartbeat_at = None;
            task.clone()
        }))
    }

    async fn heartbeat(&self, id: &TaskId, worker: &WorkerId) -> Result<bool, StoreError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();
        match state.tasks.iter_mut().find(|t| t.id == *id) {
            Some(task) if task.is_owned_by(worker) => {
                task.last_heartbeat_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve(
        &self,
        id: &TaskId,
        worker: &WorkerId,
        resolution: &Resolution,
    ) -> Result<bool, StoreError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();
        match state.tasks.iter_mut().find(|t| t.id == *id) {
            Some(task) if task.is_owned_by(worker) => {
                task.status = resolution.status();
                task.finished_at = Some(now);
                task.result = Some(resolution.result().clone());
                task.error = resolution.error().map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_expired(&self, lease_timeout: Duration) -> Result<Vec<TaskId>, StoreError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();
        let mut swept = Vec::new();

        for task in state
            .tasks
            .iter_mut()
            .filter(|t| t.is_expired(now, lease_timeout))
        {
            task.status = TaskStatus::Failed;
            task.finished_at = Some(now);
            task.error = Some(LEASE_EXPIRED.to_string());
            swept.push(task.id);
        }

        Ok(swept)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.task(id))
    }

    async fn record_poll(&self, worker: &WorkerId) -> Result<(), StoreError> {
        let now = self.clock.utc();
        self.state.lock().last_poll = Some((worker.clone(), now));
        Ok(())
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> Result<(), StoreError> {
        self.state.lock().maintenance_mode = enabled;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> ArtifactStore for InMemoryStore<C> {
    async fn get_artifact(&self, id: &ArtifactId) -> Result<Option<Artifact>, StoreError> {
        Ok(self.artifact(id))
    }

    async fn current_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .artifacts
            .iter()
            .find(|a| a.backend_kind == kind && a.is_current)
            .cloned())
    }

    async fn previous_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .artifacts
            .iter()
            .find(|a| a.backend_kind == kind && a.is_previous)
            .cloned())
    }

    async fn promote(&self, kind: BackendKind, id: &ArtifactId) -> Result<Promotion, StoreError> {
        let mut state = self.state.lock();

        let target = state
            .artifacts
            .iter()
            .find(|a| a.id == *id && a.backend_kind == kind)
            .ok_or(StoreError::ArtifactNotFound { id: *id, kind })?;

        if target.is_current {
            let previous = state
                .artifacts
                .iter()
                .find(|a| a.backend_kind == kind && a.is_previous)
                .map(|a| a.id);
            return Ok(Promotion {
                current: *id,
                previous,
                changed: false,
            });
        }

        let old_current = state
            .artifacts
            .iter()
            .find(|a| a.backend_kind == kind && a.is_current)
            .map(|a| a.id);

        for artifact in state.artifacts.iter_mut().filter(|a| a.backend_kind == kind) {
            if artifact.id == *id {
                artifact.is_current = true;
                artifact.is_previous = false;
            } else if Some(artifact.id) == old_current {
                artifact.is_current = false;
                artifact.is_previous = true;
            } else {
                artifact.is_previous = false;
            }
        }

        Ok(Promotion {
            current: *id,
            previous: old_current,
            changed: true,
        })
    }
}
