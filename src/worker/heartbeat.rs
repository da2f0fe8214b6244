use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::WorkerId;
use crate::worker::client::QueueClient;

/// Periodically tells the queue server that this worker is alive, so long
/// running buckets do not make it look silent.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Runs until `cancel` fires. Failed reports are logged and retried on
    /// the next tick.
    pub async fn run(
        &self,
        client: Arc<dyn QueueClient>,
        worker_id: WorkerId,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Registration already counted as a heartbeat.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = client.report_alive(&worker_id).await {
                        tracing::warn!(worker_id = %worker_id, error = %e, "Failed to report aliveness");
                    }
                }
            }
        }
    }
}
