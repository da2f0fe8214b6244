use std::collections::BTreeSet;

use crate::models::WorkerId;

/// Decides which registered workers this queue may pull work to.
///
/// Workers can be shared between several queue servers. While sharing is
/// enabled only the workers handed to this queue via
/// [`set_workers_to_utilize`](Self::set_workers_to_utilize) receive buckets.
/// With sharing disabled every worker does.
#[derive(Debug, Default)]
pub struct WorkerUtilization {
    sharing_enabled: bool,
    workers_to_utilize: BTreeSet<WorkerId>,
}

impl WorkerUtilization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharing_enabled(&self) -> bool {
        self.sharing_enabled
    }

    pub fn toggle_sharing(&mut self, enabled: bool) {
        if self.sharing_enabled != enabled {
            tracing::info!(enabled, "Worker sharing toggled");
        }
        self.sharing_enabled = enabled;
    }

    pub fn set_workers_to_utilize(&mut self, workers: BTreeSet<WorkerId>) {
        tracing::info!(count = workers.len(), "Workers to utilize updated");
        self.workers_to_utilize = workers;
    }

    pub fn workers_to_utilize(&self) -> &BTreeSet<WorkerId> {
        &self.workers_to_utilize
    }

    pub fn is_permitted(&self, worker_id: &WorkerId) -> bool {
        !self.sharing_enabled || self.workers_to_utilize.contains(worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_worker_is_permitted_without_sharing() {
        let utilization = WorkerUtilization::new();
        assert!(!utilization.sharing_enabled());
        assert!(utilization.is_permitted(&WorkerId::from("any")));
    }

    #[test]
    fn sharing_restricts_to_utilized_workers() {
        let mut utilization = WorkerUtilization::new();
        utilization.set_workers_to_utilize([WorkerId::from("w1")].into_iter().collect());
        utilization.toggle_sharing(true);

        assert!(utilization.is_permitted(&WorkerId::from("w1")));
        assert!(!utilization.is_permitted(&WorkerId::from("w2")));

        utilization.toggle_sharing(false);
        assert!(utilization.is_permitted(&WorkerId::from("w2")));
    }
}
