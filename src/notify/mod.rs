// ABOUTME: Notification sinks informed of every terminal task outcome.
// ABOUTME: Sink failures are logged and never change the task's result.

mod hook;

pub use hook::HookNotifier;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{Outcome, TaskKind, TaskResult};
use crate::executor::CommandError;
use crate::types::{TaskId, WorkerId};

/// Errors a notification sink can report.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification hook could not run: {0}")]
    Hook(#[from] CommandError),

    #[error("notification hook exited with {code:?}: {message}")]
    HookFailed { code: Option<i32>, message: String },
}

/// Terminal outcome of one task, as told to operators.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub worker: WorkerId,
    pub outcome: Outcome,
    pub version: Option<String>,
    pub backend_revision: Option<u32>,
    pub message: String,
    pub error: Option<String>,
    pub requires_manual_intervention: bool,
}

impl Notification {
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        worker: WorkerId,
        result: &TaskResult,
        error: Option<String>,
    ) -> Self {
        Self {
            task_id,
            kind,
            worker,
            outcome: result.status,
            version: result.release_version.clone(),
            backend_revision: result.backend_revision,
            message: result.message.clone(),
            error,
            requires_manual_intervention: result.requires_manual_intervention,
        }
    }

    /// Environment passed to hook scripts.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("DRYDOCK_STATUS".to_string(), self.outcome.to_string());
        env.insert("DRYDOCK_TASK_ID".to_string(), self.task_id.to_string());
        env.insert("DRYDOCK_TASK_KIND".to_string(), self.kind.to_string());
        env.insert("DRYDOCK_WORKER".to_string(), self.worker.to_string());
        env.insert("DRYDOCK_MESSAGE".to_string(), self.message.clone());
        env.insert(
            "DRYDOCK_MANUAL_INTERVENTION".to_string(),
            self.requires_manual_intervention.to_string(),
        );
        if let Some(ref version) = self.version {
            env.insert("DRYDOCK_VERSION".to_string(), version.clone());
        }
        if let Some(revision) = self.backend_revision {
            env.insert("DRYDOCK_REVISION".to_string(), revision.to_string());
        }
        if let Some(ref error) = self.error {
            env.insert("DRYDOCK_ERROR".to_string(), error.clone());
        }
        env
    }
}

/// A destination for task outcomes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes outcomes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let version = n.version.as_deref().unwrap_or("-");
        if n.requires_manual_intervention {
            error!(
                task_id = %n.task_id,
                status = %n.outcome,
                version,
                "task needs manual intervention: {}",
                n.message
            );
        } else if n.outcome.is_success() {
            info!(
                task_id = %n.task_id,
                status = %n.outcome,
                version,
                revision = ?n.backend_revision,
                "{}",
                n.message
            );
        } else {
            warn!(
                task_id = %n.task_id,
                status = %n.outcome,
                version,
                error = n.error.as_deref().unwrap_or("-"),
                "{}",
                n.message
            );
        }
        Ok(())
    }
}

/// Fans a notification out to every configured sink.
#[derive(Clone, Default)]
pub struct Notifiers {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to all sinks concurrently. Failures are logged and returned.
    pub async fn notify_all(&self, notification: &Notification) -> Vec<NotifyError> {
        let results = join_all(self.sinks.iter().map(|sink| sink.notify(notification))).await;
        results
            .into_iter()
            .filter_map(Result::err)
            .inspect(|e| warn!(task_id = %notification.task_id, "notification failed: {}", e))
            .collect()
    }
}
