// ABOUTME: Release artifacts and the backend kinds they target.
// ABOUTME: Mirrors the release_artifact row including current/previous flags.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::ArtifactId;

/// Side document names with a well-known staged location.
pub const VALUES_DOCUMENT: &str = "values";
pub const ENV_DOCUMENT: &str = "env";

/// Deployment backend an artifact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Helm chart, upgraded with `--atomic`.
    Helm,
    /// Docker Compose bundle, no built-in revert.
    Compose,
}

impl BackendKind {
    /// Whether a failed run of this backend restores the prior live state.
    pub fn is_atomic(&self) -> bool {
        matches!(self, BackendKind::Helm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Helm => "helm",
            BackendKind::Compose => "compose",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helm" => Ok(BackendKind::Helm),
            "compose" => Ok(BackendKind::Compose),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// An immutable release bundle plus its side documents.
#[derive(Clone, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub version: String,
    pub backend_kind: BackendKind,
    pub payload: Vec<u8>,
    pub side_documents: BTreeMap<String, String>,
    /// Hex SHA-256 of `payload`, optionally prefixed with `sha256:`.
    pub checksum: String,
    pub is_current: bool,
    pub is_previous: bool,
}

impl Artifact {
    /// Build an artifact whose checksum matches its payload.
    pub fn new(version: impl Into<String>, backend_kind: BackendKind, payload: Vec<u8>) -> Self {
        let checksum = sha256_hex(&payload);
        Self {
            id: ArtifactId::generate(),
            version: version.into(),
            backend_kind,
            payload,
            side_documents: BTreeMap::new(),
            checksum,
            is_current: false,
            is_previous: false,
        }
    }

    pub fn with_side_document(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.side_documents.insert(name.into(), content.into());
        self
    }

    pub fn side_document(&self, name: &str) -> Option<&str> {
        self.side_documents.get(name).map(String::as_str)
    }
}

// Payloads can be many megabytes; keep them out of debug output.
impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("backend_kind", &self.backend_kind)
            .field("payload_len", &self.payload.len())
            .field("side_documents", &self.side_documents.keys().collect::<Vec<_>>())
            .field("checksum", &self.checksum)
            .field("is_current", &self.is_current)
            .field("is_previous", &self.is_previous)
            .finish()
    }
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Result of flipping the current/previous flags for one backend kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub current: ArtifactId,
    pub previous: Option<ArtifactId>,
    /// False when the artifact was already current and nothing was touched.
    pub changed: bool,
}
