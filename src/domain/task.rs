// ABOUTME: Task records, their lifecycle states and terminal outcomes.
// ABOUTME: Mirrors the agent_task row shared with the control plane.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{ArtifactId, TaskId, WorkerId};

/// What a task asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Deploy,
    Rollback,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Deploy => "deploy",
            TaskKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(TaskKind::Deploy),
            "rollback" => Ok(TaskKind::Rollback),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Lease state of a task: `Pending → InProgress → {Completed, Failed}`.
///
/// Persisted with the control plane's spelling, so `InProgress` is stored as
/// `inProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "inProgress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "inProgress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A unit of work in the shared queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub artifact_ref: Option<ArtifactId>,
    /// Backend revision a rollback should return to, when known.
    pub target_revision: Option<u32>,
    /// Key/value overrides handed to the backend (`--set` for Helm,
    /// environment variables for Compose).
    pub overrides: BTreeMap<String, String>,
    pub not_before: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<WorkerId>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task eligible from `not_before`.
    pub fn new(kind: TaskKind, not_before: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            kind,
            status: TaskStatus::Pending,
            artifact_ref: None,
            target_revision: None,
            overrides: BTreeMap::new(),
            not_before,
            claimed_at: None,
            claimed_by: None,
            last_heartbeat_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    pub fn deploy(artifact: ArtifactId, not_before: DateTime<Utc>) -> Self {
        Self::new(TaskKind::Deploy, not_before).with_artifact(artifact)
    }

    pub fn rollback(not_before: DateTime<Utc>) -> Self {
        Self::new(TaskKind::Rollback, not_before)
    }

    pub fn with_artifact(mut self, artifact: ArtifactId) -> Self {
        self.artifact_ref = Some(artifact);
        self
    }

    pub fn with_target_revision(mut self, revision: u32) -> Self {
        self.target_revision = Some(revision);
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// The latest moment the lease was known to be alive.
    pub fn lease_anchor(&self) -> Option<DateTime<Utc>> {
        match (self.claimed_at, self.last_heartbeat_at) {
            (Some(claimed), Some(beat)) => Some(claimed.max(beat)),
            (claimed, beat) => claimed.or(beat),
        }
    }

    /// Whether an in-progress lease has gone longer than `timeout` without
    /// a sign of life.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        match self.lease_anchor() {
            Some(anchor) => now - anchor > timeout,
            None => false,
        }
    }

    /// Whether `worker` currently owns this task's lease.
    pub fn is_owned_by(&self, worker: &WorkerId) -> bool {
        self.status == TaskStatus::InProgress && self.claimed_by.as_ref() == Some(worker)
    }
}

/// Outcome reported to the control plane and to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "SUCCESS")]
    DeploySucceeded,
    #[serde(rename = "FAILED")]
    DeployFailed,
    #[serde(rename = "ROLLBACK_SUCCESS")]
    RollbackSucceeded,
    #[serde(rename = "ROLLBACK_FAILED")]
    RollbackFailed,
}

impl Outcome {
    pub fn for_task(kind: TaskKind, succeeded: bool) -> Self {
        match (kind, succeeded) {
            (TaskKind::Deploy, true) => Outcome::DeploySucceeded,
            (TaskKind::Deploy, false) => Outcome::DeployFailed,
            (TaskKind::Rollback, true) => Outcome::RollbackSucceeded,
            (TaskKind::Rollback, false) => Outcome::RollbackFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::DeploySucceeded | Outcome::RollbackSucceeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::DeploySucceeded => "SUCCESS",
            Outcome::DeployFailed => "FAILED",
            Outcome::RollbackSucceeded => "ROLLBACK_SUCCESS",
            Outcome::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed backend run left the live system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Nothing changed, or the backend reverted itself.
    Clean,
    /// The live system may mix old and new components.
    Partial,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Clean => f.write_str("clean"),
            FailureMode::Partial => f.write_str("partial"),
        }
    }
}

/// Structured payload stored in the task's `result` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_revision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<FailureMode>,
    #[serde(default)]
    pub requires_manual_intervention: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TaskResult {
    pub fn new(status: Outcome, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            release_version: None,
            backend_revision: None,
            failure_mode: None,
            requires_manual_intervention: false,
            warnings: Vec::new(),
        }
    }
}

/// Terminal transition requested by the lease holder.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(TaskResult),
    Failed { result: TaskResult, error: String },
}

impl Resolution {
    pub fn status(&self) -> TaskStatus {
        match self {
            Resolution::Completed(_) => TaskStatus::Completed,
            Resolution::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn result(&self) -> &TaskResult {
        match self {
            Resolution::Completed(result) | Resolution::Failed { result, .. } => result,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Resolution::Completed(_) => None,
            Resolution::Failed { error, .. } => Some(error),
        }
    }
}
