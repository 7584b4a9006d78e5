// ABOUTME: Worker identity used to own task leases.
// ABOUTME: Combines hostname, process id and a per-instance suffix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one agent instance, recorded on every lease it holds.
///
/// Formatted as `<hostname>:<pid>:<instance>`. The random instance suffix keeps
/// two agents in one process (as in tests) from sharing an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Identity for the current process.
    pub fn current() -> Self {
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        let instance = Uuid::new_v4().simple().to_string();
        Self(format!("{}:{}:{}", host, std::process::id(), &instance[..8]))
    }

    /// Wrap an identity read back from the store.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hostname portion of the identity.
    pub fn host(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_identity_includes_host_and_pid() {
        let id = WorkerId::current();
        let parts: Vec<_> = id.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(!id.host().is_empty());
        assert_eq!(parts[1], std::process::id().to_string());
    }

    #[test]
    fn two_instances_in_one_process_differ() {
        assert_ne!(WorkerId::current(), WorkerId::current());
    }
}
