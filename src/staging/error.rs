// ABOUTME: Staging error types with SNAFU pattern.
// ABOUTME: Separates integrity failures from I/O and layout problems.

use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Errors raised while materializing an artifact on local disk.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StageError {
    #[snafu(display("artifact checksum mismatch: expected {expected}, got {actual}"))]
    Integrity { expected: String, actual: String },

    #[snafu(display("failed to prepare staging directory {}: {source}", path.display()))]
    Workspace { path: PathBuf, source: io::Error },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write { path: PathBuf, source: io::Error },

    #[snafu(display("failed to extract artifact bundle: {source}"))]
    Extract { source: io::Error },

    #[snafu(display("archive entry escapes staging directory: {}", entry.display()))]
    UnsafeEntry { entry: PathBuf },

    #[snafu(display("artifact bundle does not contain {expected}"))]
    Layout { expected: &'static str },

    #[snafu(display("invalid side document name: {name:?}"))]
    SideDocumentName { name: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// Payload bytes do not match the recorded checksum.
    Integrity,
    /// Local filesystem trouble.
    Io,
    /// The bundle itself is malformed or unexpected.
    Bundle,
}

impl StageError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> StageErrorKind {
        match self {
            StageError::Integrity { .. } => StageErrorKind::Integrity,
            StageError::Workspace { .. } | StageError::Write { .. } => StageErrorKind::Io,
            StageError::Extract { .. }
            | StageError::UnsafeEntry { .. }
            | StageError::Layout { .. }
            | StageError::SideDocumentName { .. } => StageErrorKind::Bundle,
        }
    }

    pub fn is_integrity(&self) -> bool {
        self.kind() == StageErrorKind::Integrity
    }
}
