// ABOUTME: Notification sink that runs an operator script per task outcome.
// ABOUTME: The outcome is passed to the script through DRYDOCK_* environment variables.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{Notification, Notifier, NotifyError};
use crate::executor::{CommandSpec, ProcessRunner};

/// Runs a script with the outcome in its environment.
#[derive(Clone)]
pub struct HookNotifier {
    script: PathBuf,
    timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl HookNotifier {
    pub fn new(script: impl Into<PathBuf>, timeout: Duration, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            script: script.into(),
            timeout,
            runner,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// The invocation for `notification`.
    pub fn command(&self, notification: &Notification) -> CommandSpec {
        CommandSpec::new(self.script.to_string_lossy(), self.timeout)
            .envs(&notification.to_env())
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!("Running notification hook: {}", self.script.display());

        let output = self.runner.run(&self.command(notification)).await?;
        if !output.success() {
            return Err(NotifyError::HookFailed {
                code: output.code,
                message: output.diagnostic().to_string(),
            });
        }

        tracing::debug!("notification hook completed successfully");
        Ok(())
    }
}
