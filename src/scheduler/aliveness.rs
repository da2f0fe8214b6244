use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{QueueError, Result};
use crate::models::{BucketId, StuckBucketReason, WorkerId};

/// Externally visible aliveness of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkerAliveness {
    NotRegistered,
    #[serde(rename_all = "camelCase")]
    Alive {
        bucket_ids_being_processed: BTreeSet<BucketId>,
    },
    #[serde(rename_all = "camelCase")]
    Silent { last_alive_at: DateTime<Utc> },
    Blocked,
}

impl WorkerAliveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, WorkerAliveness::Alive { .. })
    }
}

/// Worker state tracking
#[derive(Debug, Clone)]
struct WorkerState {
    silent: bool,
    disabled: bool,
    last_seen: Instant,
    last_seen_at: DateTime<Utc>,
    buckets_being_processed: BTreeSet<BucketId>,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            silent: false,
            disabled: false,
            last_seen: Instant::now(),
            last_seen_at: Utc::now(),
            buckets_being_processed: BTreeSet::new(),
        }
    }

    fn refresh(&mut self) {
        self.last_seen = Instant::now();
        self.last_seen_at = Utc::now();
    }

    fn aliveness(&self) -> WorkerAliveness {
        if self.disabled {
            WorkerAliveness::Blocked
        } else if self.silent {
            WorkerAliveness::Silent {
                last_alive_at: self.last_seen_at,
            }
        } else {
            WorkerAliveness::Alive {
                bucket_ids_being_processed: self.buckets_being_processed.clone(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlivenessCounts {
    pub alive: usize,
    pub silent: usize,
    pub blocked: usize,
}

/// Heartbeat state machine for every worker that ever registered.
///
/// Transitions: registration makes a worker alive; any request from it
/// refreshes it (and revives it if silent); the poller marks it silent once
/// `alive_timeout` elapses without a refresh. `disable_worker` blocks it from
/// any state until `enable_worker`.
#[derive(Debug)]
pub struct WorkerAlivenessTracker {
    workers: HashMap<WorkerId, WorkerState>,
    alive_timeout: Duration,
}

impl WorkerAlivenessTracker {
    pub fn new(alive_timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            alive_timeout,
        }
    }

    /// Registers a worker, or re-registers it after a restart. Buckets it was
    /// processing before are forgotten, so the stuck-bucket sweep reclaims
    /// them. An operator block survives re-registration.
    pub fn register_worker(&mut self, worker_id: WorkerId) {
        let state = self.workers.entry(worker_id.clone()).or_insert_with(WorkerState::new);
        state.refresh();
        state.silent = false;
        state.buckets_being_processed.clear();
        tracing::info!(worker_id = %worker_id, "Worker registered");
    }

    pub fn is_registered(&self, worker_id: &WorkerId) -> bool {
        self.workers.contains_key(worker_id)
    }

    /// Implicit heartbeat: every request from a worker lands here.
    pub fn mark_alive(&mut self, worker_id: &WorkerId) -> Result<()> {
        let state = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| QueueError::WorkerNotRegistered(worker_id.clone()))?;
        state.refresh();
        if state.silent {
            state.silent = false;
            tracing::info!(worker_id = %worker_id, "Silent worker is alive again");
        }
        Ok(())
    }

    pub fn disable_worker(&mut self, worker_id: &WorkerId) -> Result<()> {
        let state = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| QueueError::WorkerNotRegistered(worker_id.clone()))?;
        state.disabled = true;
        tracing::info!(worker_id = %worker_id, "Worker disabled");
        Ok(())
    }

    pub fn enable_worker(&mut self, worker_id: &WorkerId) -> Result<()> {
        let state = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| QueueError::WorkerNotRegistered(worker_id.clone()))?;
        state.disabled = false;
        tracing::info!(worker_id = %worker_id, "Worker enabled");
        Ok(())
    }

    pub fn set_bucket_processing(&mut self, worker_id: &WorkerId, bucket_id: &BucketId) {
        if let Some(state) = self.workers.get_mut(worker_id) {
            state.buckets_being_processed.insert(bucket_id.clone());
        }
    }

    pub fn bucket_processed(&mut self, worker_id: &WorkerId, bucket_id: &BucketId) {
        if let Some(state) = self.workers.get_mut(worker_id) {
            state.buckets_being_processed.remove(bucket_id);
        }
    }

    /// Marks every worker whose last heartbeat is older than the timeout as
    /// silent. Returns the workers that became silent during this call.
    pub fn mark_silent_workers(&mut self) -> Vec<WorkerId> {
        let timeout = self.alive_timeout;
        let mut newly_silent = Vec::new();
        for (worker_id, state) in self.workers.iter_mut() {
            if !state.silent && state.last_seen.elapsed() >= timeout {
                state.silent = true;
                tracing::warn!(
                    worker_id = %worker_id,
                    last_alive_at = %state.last_seen_at,
                    in_flight = state.buckets_being_processed.len(),
                    "Worker went silent"
                );
                newly_silent.push(worker_id.clone());
            }
        }
        newly_silent.sort();
        newly_silent
    }

    pub fn aliveness(&self, worker_id: &WorkerId) -> WorkerAliveness {
        self.workers
            .get(worker_id)
            .map(WorkerState::aliveness)
            .unwrap_or(WorkerAliveness::NotRegistered)
    }

    /// Alive and not blocked.
    pub fn can_pull(&self, worker_id: &WorkerId) -> bool {
        self.aliveness(worker_id).is_alive()
    }

    /// Why a bucket dequeued by `worker_id` should be reclaimed, if it should.
    pub fn stuck_reason(&self, worker_id: &WorkerId, bucket_id: &BucketId) -> Option<StuckBucketReason> {
        match self.aliveness(worker_id) {
            WorkerAliveness::NotRegistered => Some(StuckBucketReason::WorkerIsInvalid),
            WorkerAliveness::Blocked => Some(StuckBucketReason::WorkerIsBlocked),
            WorkerAliveness::Silent { .. } => Some(StuckBucketReason::BucketLost),
            WorkerAliveness::Alive {
                bucket_ids_being_processed,
            } => {
                if bucket_ids_being_processed.contains(bucket_id) {
                    None
                } else {
                    Some(StuckBucketReason::BucketLost)
                }
            }
        }
    }

    pub fn has_any_alive_worker(&self) -> bool {
        self.workers.values().any(|w| w.aliveness().is_alive())
    }

    pub fn alive_workers(&self) -> Vec<WorkerId> {
        let mut alive: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.aliveness().is_alive())
            .map(|(id, _)| id.clone())
            .collect();
        alive.sort();
        alive
    }

    /// Every known worker with its aliveness, ordered by worker id.
    pub fn all_workers(&self) -> Vec<(WorkerId, WorkerAliveness)> {
        let mut workers: Vec<(WorkerId, WorkerAliveness)> = self
            .workers
            .iter()
            .map(|(id, w)| (id.clone(), w.aliveness()))
            .collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        workers
    }

    pub fn counts(&self) -> AlivenessCounts {
        let mut counts = AlivenessCounts::default();
        for state in self.workers.values() {
            match state.aliveness() {
                WorkerAliveness::Alive { .. } => counts.alive += 1,
                WorkerAliveness::Silent { .. } => counts.silent += 1,
                WorkerAliveness::Blocked => counts.blocked += 1,
                WorkerAliveness::NotRegistered => {}
            }
        }
        counts
    }
}
