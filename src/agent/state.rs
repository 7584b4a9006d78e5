// ABOUTME: Task run state types for the type state pattern.
// ABOUTME: Each state carries exactly what the next transition needs.

use crate::domain::Resolution;
use crate::executor::Execution;
use crate::lease::HeartbeatReport;
use crate::staging::StagedArtifact;
use crate::types::ArtifactId;

/// Lease held, nothing prepared yet.
/// Available actions: `prepare()`, `fail()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Claimed;

/// Target resolved and, unless on the revision path, staged.
/// Available actions: `execute()`
#[derive(Debug)]
pub struct Prepared {
    pub(crate) plan: Plan,
}

/// Backend run finished; maintenance is off and the heartbeat stopped.
/// Available actions: `settle()`
#[derive(Debug)]
pub struct Executed {
    pub(crate) execution: Execution,
    pub(crate) staged: Option<StagedArtifact>,
    pub(crate) heartbeat: HeartbeatReport,
}

/// Terminal resolution decided; staged files still on disk.
/// Available actions: `Agent::finish()`
#[derive(Debug)]
pub struct Settled {
    pub(crate) resolution: Resolution,
    pub(crate) staged: Option<StagedArtifact>,
    pub(crate) heartbeat: Option<HeartbeatReport>,
}

/// What a prepared task will ask of the executor.
#[derive(Debug)]
pub enum Plan {
    /// Deploy a freshly staged artifact.
    Deploy(StagedArtifact),
    /// Roll back by redeploying a retained artifact.
    Redeploy(StagedArtifact),
    /// Roll back through backend history; nothing staged.
    Revision {
        revision: Option<u32>,
        restores: Option<ArtifactId>,
    },
}
