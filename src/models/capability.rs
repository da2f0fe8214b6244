use std::fmt;

use serde::{Deserialize, Serialize};

/// A named value a worker declares at registration, e.g. `xcode = 15.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerCapability {
    pub name: String,
    pub value: String,
}

impl WorkerCapability {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for WorkerCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Predicate over the value of a single capability.
///
/// Ordering comparisons treat values as dotted versions (`14.3.1`), falling
/// back to plain string comparison when either side is not numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum WorkerCapabilityConstraint {
    Present,
    Absent,
    Equal(String),
    NotEqual(String),
    LessThan(String),
    GreaterThan(String),
    All(Vec<WorkerCapabilityConstraint>),
    Any(Vec<WorkerCapabilityConstraint>),
}

/// What a bucket needs from a worker: one constraint on one capability name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCapabilityRequirement {
    pub capability_name: String,
    pub constraint: WorkerCapabilityConstraint,
}

impl WorkerCapabilityRequirement {
    pub fn new(capability_name: impl Into<String>, constraint: WorkerCapabilityConstraint) -> Self {
        Self {
            capability_name: capability_name.into(),
            constraint,
        }
    }
}
