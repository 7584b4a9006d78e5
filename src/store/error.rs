// ABOUTME: Error types for the task and artifact stores.
// ABOUTME: Keeps backend-specific errors behind string payloads.

use crate::domain::BackendKind;
use crate::types::ArtifactId;

/// Errors from task and artifact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the store.
    #[error("failed to connect to store: {0}")]
    Connection(String),

    /// A query was rejected or failed mid-flight.
    #[error("store query failed: {0}")]
    Query(String),

    /// A stored row could not be mapped to a domain record.
    #[error("malformed {table} row: {message}")]
    Decode {
        table: &'static str,
        message: String,
    },

    /// The artifact does not exist for the requested backend kind.
    #[error("artifact {id} not found for backend {kind}")]
    ArtifactNotFound { id: ArtifactId, kind: BackendKind },
}

impl StoreError {
    pub(crate) fn decode(table: &'static str, message: impl ToString) -> Self {
        StoreError::Decode {
            table,
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}
