// ABOUTME: Diagnostics accumulator for non-fatal warnings during a task run.
// ABOUTME: Collected warnings are attached to the task result instead of failing it.

/// Collects non-fatal warnings during one task run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    /// Warning messages, for the task result payload.
    pub fn messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }
}

/// A non-fatal warning collected during a task run.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a maintenance toggle warning.
    pub fn maintenance(message: impl Into<String>) -> Self {
        Self::new(WarningKind::MaintenanceToggle, message)
    }

    /// Create a heartbeat failure warning.
    pub fn heartbeat(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Heartbeat, message)
    }

    /// Create a lease lost warning.
    pub fn lease_lost(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LeaseLost, message)
    }

    /// Create a staging cleanup warning.
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Cleanup, message)
    }

    /// Create a control-plane mirroring warning.
    pub fn status_mirror(message: impl Into<String>) -> Self {
        Self::new(WarningKind::StatusMirror, message)
    }
}

/// Categories of warnings that can occur during a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Maintenance flag or proxy reload could not be applied.
    MaintenanceToggle,
    /// One or more heartbeats failed to reach the store.
    Heartbeat,
    /// The store stopped recognizing this worker as the lease owner.
    LeaseLost,
    /// Staged files could not be removed.
    Cleanup,
    /// Maintenance state could not be mirrored to the store.
    StatusMirror,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::maintenance("nginx reload failed"));
        diag.warn(Warning::heartbeat("connection reset"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
        assert!(diag.has(WarningKind::Heartbeat));
        assert!(!diag.has(WarningKind::LeaseLost));
        assert_eq!(
            diag.messages(),
            vec!["nginx reload failed".to_string(), "connection reset".to_string()]
        );
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        assert_eq!(
            Warning::maintenance("x").kind,
            WarningKind::MaintenanceToggle
        );
        assert_eq!(Warning::lease_lost("x").kind, WarningKind::LeaseLost);
        assert_eq!(Warning::cleanup("x").kind, WarningKind::Cleanup);
        assert_eq!(Warning::status_mirror("x").kind, WarningKind::StatusMirror);
    }
}
