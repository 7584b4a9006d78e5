// ABOUTME: Best-effort maintenance mode: a flag file read by the front proxy.
// ABOUTME: Toggle failures become warnings; a deployment never waits on them.

use nonempty::NonEmpty;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostics, Warning};
use crate::executor::{CommandSpec, ProcessRunner};
use crate::store::TaskStore;

const FLAG_CONTENTS: &str = "maintenance\n";

/// Errors from one maintenance toggle step.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("failed to update maintenance flag {}: {source}", path.display())]
    Flag { path: PathBuf, source: io::Error },

    #[error("proxy reload failed: {0}")]
    Reload(String),
}

/// Engages and disengages maintenance mode around a deployment.
#[derive(Clone)]
pub struct MaintenanceController {
    enabled: bool,
    flag_path: PathBuf,
    reload_command: Option<NonEmpty<String>>,
    reload_timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
    store: Option<Arc<dyn TaskStore>>,
}

impl MaintenanceController {
    pub fn new(flag_path: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            enabled: true,
            flag_path: flag_path.into(),
            reload_command: None,
            reload_timeout: Duration::from_secs(30),
            runner,
            store: None,
        }
    }

    /// A controller that does nothing.
    pub fn disabled(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            enabled: false,
            ..Self::new(PathBuf::new(), runner)
        }
    }

    /// Run `command` after every toggle, for example `nginx -s reload`.
    pub fn with_reload(mut self, command: NonEmpty<String>, timeout: Duration) -> Self {
        self.reload_command = Some(command);
        self.reload_timeout = timeout;
        self
    }

    /// Mirror the toggle to the control plane through `store`.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag_path
    }

    pub fn is_engaged(&self) -> bool {
        self.enabled && self.flag_path.exists()
    }

    pub async fn enable(&self, diagnostics: &mut Diagnostics) {
        self.toggle(true, diagnostics).await;
    }

    pub async fn disable(&self, diagnostics: &mut Diagnostics) {
        self.toggle(false, diagnostics).await;
    }

    async fn toggle(&self, on: bool, diagnostics: &mut Diagnostics) {
        if !self.enabled {
            return;
        }
        let state = if on { "on" } else { "off" };

        match self.write_flag(on).await {
            Ok(()) => info!(flag = %self.flag_path.display(), "maintenance mode {}", state),
            Err(e) => diagnostics.warn(Warning::maintenance(e.to_string())),
        }

        if let Err(e) = self.reload().await {
            diagnostics.warn(Warning::maintenance(e.to_string()));
        }

        if let Some(store) = &self.store
            && let Err(e) = store.set_maintenance_mode(on).await
        {
            diagnostics.warn(Warning::status_mirror(format!(
                "failed to record maintenance mode {state}: {e}"
            )));
        }
    }

    async fn write_flag(&self, on: bool) -> Result<(), MaintenanceError> {
        let flag_error = |source| MaintenanceError::Flag {
            path: self.flag_path.clone(),
            source,
        };

        if on {
            if let Some(parent) = self.flag_path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await.map_err(flag_error)?;
            }
            tokio::fs::write(&self.flag_path, FLAG_CONTENTS)
                .await
                .map_err(flag_error)
        } else {
            match tokio::fs::remove_file(&self.flag_path).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other.map_err(flag_error),
            }
        }
    }

    async fn reload(&self) -> Result<(), MaintenanceError> {
        let Some(command) = &self.reload_command else {
            return Ok(());
        };

        let spec = CommandSpec::new(command.head.clone(), self.reload_timeout)
            .args(command.tail.iter().cloned());
        debug!(command = %spec, "reloading proxy");

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| MaintenanceError::Reload(e.to_string()))?;
        if !output.success() {
            return Err(MaintenanceError::Reload(output.diagnostic().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::WarningKind;
    use crate::executor::SystemRunner;

    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("nested/maintenance-mode");
        let controller = MaintenanceController::new(&flag, Arc::new(SystemRunner));
        let mut diag = Diagnostics::default();

        controller.enable(&mut diag).await;
        controller.enable(&mut diag).await;
        assert!(flag.is_file());
        assert!(controller.is_engaged());

        controller.disable(&mut diag).await;
        controller.disable(&mut diag).await;
        assert!(!flag.exists());
        assert!(!diag.has_warnings());
    }

    #[tokio::test]
    async fn unwritable_flag_becomes_warning() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let controller =
            MaintenanceController::new(blocker.join("flag"), Arc::new(SystemRunner));
        let mut diag = Diagnostics::default();

        controller.enable(&mut diag).await;

        assert!(diag.has(WarningKind::MaintenanceToggle));
    }

    #[tokio::test]
    async fn failing_reload_becomes_warning() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            MaintenanceController::new(dir.path().join("flag"), Arc::new(SystemRunner))
                .with_reload(
                    NonEmpty::from_vec(vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()])
                        .unwrap(),
                    Duration::from_secs(5),
                );
        let mut diag = Diagnostics::default();

        controller.enable(&mut diag).await;

        assert!(dir.path().join("flag").is_file());
        assert_eq!(diag.warnings().len(), 1);
        assert!(diag.has(WarningKind::MaintenanceToggle));
    }

    #[tokio::test]
    async fn disabled_controller_touches_nothing() {
        let controller = MaintenanceController::disabled(Arc::new(SystemRunner));
        let mut diag = Diagnostics::default();

        controller.enable(&mut diag).await;

        assert!(!controller.is_engaged());
        assert!(!diag.has_warnings());
    }
}
