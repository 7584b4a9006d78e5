// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod id;
mod project_name;
mod release_name;
mod worker;

pub use id::{ArtifactId, Id, TaskId};
pub use project_name::{ProjectName, ProjectNameError};
pub use release_name::{ReleaseName, ReleaseNameError};
pub use worker::WorkerId;
