use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::models::{
    WorkerCapability, WorkerCapabilityConstraint, WorkerCapabilityRequirement, WorkerId,
};

/// True when every requirement is satisfied by `capabilities`.
///
/// An empty requirement set matches any worker.
pub fn requirements_satisfied(
    requirements: &BTreeSet<WorkerCapabilityRequirement>,
    capabilities: &BTreeSet<WorkerCapability>,
) -> bool {
    requirements.iter().all(|requirement| {
        let value = capabilities
            .iter()
            .find(|c| c.name == requirement.capability_name)
            .map(|c| c.value.as_str());
        constraint_satisfied(&requirement.constraint, value)
    })
}

fn constraint_satisfied(constraint: &WorkerCapabilityConstraint, value: Option<&str>) -> bool {
    use WorkerCapabilityConstraint::*;

    match constraint {
        Present => value.is_some(),
        Absent => value.is_none(),
        Equal(expected) => value == Some(expected.as_str()),
        NotEqual(expected) => value != Some(expected.as_str()),
        LessThan(bound) => {
            value.is_some_and(|v| compare_versions(v, bound) == Ordering::Less)
        }
        GreaterThan(bound) => {
            value.is_some_and(|v| compare_versions(v, bound) == Ordering::Greater)
        }
        All(constraints) => constraints.iter().all(|c| constraint_satisfied(c, value)),
        Any(constraints) => constraints.iter().any(|c| constraint_satisfied(c, value)),
    }
}

/// Compares dotted numeric versions component-wise (`14.10 > 14.9`, `15 == 15.0`).
/// Falls back to lexicographic order when either side has a non-numeric component.
fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let parse = |s: &str| -> Option<Vec<u64>> {
        s.split('.').map(|part| part.trim().parse().ok()).collect()
    };

    match (parse(lhs), parse(rhs)) {
        (Some(mut l), Some(mut r)) => {
            let len = l.len().max(r.len());
            l.resize(len, 0);
            r.resize(len, 0);
            l.cmp(&r)
        }
        _ => lhs.cmp(rhs),
    }
}

/// Capabilities declared by each worker at registration.
#[derive(Debug, Default)]
pub struct WorkerCapabilitiesStorage {
    capabilities: HashMap<WorkerId, BTreeSet<WorkerCapability>>,
}

impl WorkerCapabilitiesStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever the worker declared before.
    pub fn set(&mut self, worker_id: WorkerId, capabilities: BTreeSet<WorkerCapability>) {
        self.capabilities.insert(worker_id, capabilities);
    }

    /// Capabilities of `worker_id`; empty for unknown workers.
    pub fn get(&self, worker_id: &WorkerId) -> BTreeSet<WorkerCapability> {
        self.capabilities.get(worker_id).cloned().unwrap_or_default()
    }
}
