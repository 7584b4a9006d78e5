// ABOUTME: Persistent records shared with the control plane.
// ABOUTME: Tasks, artifacts, outcomes and flag promotions.

mod artifact;
mod task;

pub use artifact::{
    Artifact, BackendKind, ENV_DOCUMENT, Promotion, VALUES_DOCUMENT, sha256_hex,
};
pub use task::{FailureMode, Outcome, Resolution, Task, TaskKind, TaskResult, TaskStatus};
