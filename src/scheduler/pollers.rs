use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::scheduler::aliveness::WorkerAlivenessTracker;
use crate::scheduler::container::MultipleQueuesContainer;
use crate::scheduler::enqueuer::StuckBucketsReenqueuer;

/// Runs `tick` every `period` until `cancel` fires. Ticks never overlap: a
/// slow tick delays the next one instead of running beside it.
async fn run_periodically<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(poller = name, period_ms = period.as_millis() as u64, "Poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => tick().await,
        }
    }

    tracing::debug!(poller = name, "Poller stopped");
}

/// Marks workers silent once their heartbeat times out.
pub fn spawn_aliveness_poller(
    aliveness: Arc<RwLock<WorkerAlivenessTracker>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodically("aliveness", period, cancel, move || {
        let aliveness = aliveness.clone();
        async move {
            aliveness.write().await.mark_silent_workers();
        }
    }))
}

/// Reenqueues buckets stuck with silent, blocked or unknown workers,
/// independent of worker traffic.
pub fn spawn_stuck_buckets_poller(
    reenqueuer: StuckBucketsReenqueuer,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodically("stuck_buckets", period, cancel, move || {
        let reenqueuer = reenqueuer.clone();
        async move {
            reenqueuer.reenqueue_stuck_buckets().await;
        }
    }))
}

pub fn spawn_metrics_poller(
    aliveness: Arc<RwLock<WorkerAlivenessTracker>>,
    container: Arc<MultipleQueuesContainer>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodically("metrics", period, cancel, move || {
        let aliveness = aliveness.clone();
        let container = container.clone();
        async move {
            let counts = aliveness.read().await.counts();
            let queue_state = container.running_queue_state().await;
            let jobs = container.ongoing_job_ids().await.len();
            tracing::info!(
                alive_workers = counts.alive,
                silent_workers = counts.silent,
                blocked_workers = counts.blocked,
                running_jobs = jobs,
                enqueued_buckets = queue_state.enqueued_bucket_count,
                dequeued_buckets = queue_state.dequeued_bucket_count,
                enqueued_tests = queue_state.enqueued_tests,
                dequeued_tests = queue_state.dequeued_tests,
                "Queue metrics"
            );
        }
    }))
}

/// Cancels `shutdown` once the queue has had no outstanding work for
/// `idle_period`.
pub fn spawn_idle_termination(
    container: Arc<MultipleQueuesContainer>,
    idle_period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(idle_period.min(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut idle_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !container.running_queue_state().await.is_depleted() {
                idle_since = None;
                continue;
            }

            let idle_for = idle_since.get_or_insert_with(Instant::now).elapsed();
            if idle_for >= idle_period {
                tracing::info!(
                    idle_secs = idle_for.as_secs(),
                    "Queue has been idle for the termination period, shutting down"
                );
                shutdown.cancel();
                break;
            }
        }
    })
}
