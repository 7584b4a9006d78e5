// ABOUTME: Background task that renews a lease while a deployment runs.
// ABOUTME: stop() joins the task so no heartbeat can follow the task's resolution.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{HeartbeatStatus, LeaseHandle};

/// Spawns heartbeat tasks on a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatExtender {
    interval: Duration,
}

impl HeartbeatExtender {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start renewing `lease`. The first heartbeat goes out one interval
    /// after start, since claiming already stamped the lease.
    pub fn start(&self, lease: LeaseHandle) -> HeartbeatHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(beat_loop(lease, self.interval, stop_rx));
        HeartbeatHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// What the heartbeat task observed during its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Heartbeats the store accepted.
    pub sent: u32,
    /// Heartbeats that failed with a store error.
    pub failures: u32,
    /// The store reported the lease as no longer ours.
    pub lease_lost: bool,
    /// Message of the last store error, if any.
    pub last_error: Option<String>,
}

/// Owner of a running heartbeat task.
///
/// Dropping the handle without calling [`HeartbeatHandle::stop`] aborts the
/// task, which covers cancellation of the surrounding pipeline.
#[must_use = "dropping the handle stops the heartbeat immediately"]
pub struct HeartbeatHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<HeartbeatReport>>,
}

impl HeartbeatHandle {
    /// Signal the heartbeat task and wait for it to exit.
    ///
    /// A heartbeat already in flight is allowed to finish; none is sent after
    /// this returns.
    pub async fn stop(mut self) -> HeartbeatReport {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        let Some(join) = self.join.take() else {
            return HeartbeatReport::default();
        };

        match join.await {
            Ok(report) => report,
            Err(e) => {
                warn!("heartbeat task ended abnormally: {}", e);
                HeartbeatReport {
                    last_error: Some(e.to_string()),
                    ..HeartbeatReport::default()
                }
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

async fn beat_loop(
    lease: LeaseHandle,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> HeartbeatReport {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = HeartbeatReport::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => match lease.beat().await {
                Ok(HeartbeatStatus::Extended) => report.sent += 1,
                Ok(HeartbeatStatus::LeaseLost) => {
                    // Ownership never comes back; idle until told to stop.
                    report.lease_lost = true;
                    let _ = (&mut stop_rx).await;
                    break;
                }
                Err(e) => {
                    warn!(task_id = %lease.task_id(), "heartbeat failed: {}", e);
                    report.failures += 1;
                    report.last_error = Some(e.to_string());
                }
            },
        }
    }

    debug!(
        task_id = %lease.task_id(),
        sent = report.sent,
        failures = report.failures,
        "heartbeat stopped"
    );
    report
}
