// ABOUTME: Expiry sweep that fails in-progress tasks whose leases lapsed.
// ABOUTME: Runs once, on a watch loop, or folded into an agent's idle polls.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::{StoreError, TaskStore};
use crate::types::TaskId;

/// Fails every in-progress task silent for longer than the lease timeout.
#[derive(Clone)]
pub struct LeaseSweeper {
    store: Arc<dyn TaskStore>,
    lease_timeout: Duration,
}

impl LeaseSweeper {
    pub fn new(store: Arc<dyn TaskStore>, lease_timeout: Duration) -> Self {
        Self {
            store,
            lease_timeout,
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub async fn sweep_once(&self) -> Result<Vec<TaskId>, StoreError> {
        let swept = self.store.sweep_expired(self.lease_timeout).await?;
        if swept.is_empty() {
            debug!("no expired leases");
        }
        for id in &swept {
            info!(task_id = %id, "lease expired, task failed");
        }
        Ok(swept)
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    ///
    /// Store errors are logged and retried on the next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut total = 0;
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(swept) => total += swept.len(),
                    Err(e) => warn!("lease sweep failed: {}", e),
                },
            }
        }

        total
    }
}
