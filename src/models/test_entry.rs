use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::capability::WorkerCapabilityRequirement;

/// A single test, addressed by class and method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntry {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub case_id: Option<u64>,
}

impl TestEntry {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            tags: Vec::new(),
            case_id: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_case_id(mut self, case_id: u64) -> Self {
        self.case_id = Some(case_id);
        self
    }

    /// `ClassName/methodName`, the form test runners accept on the command line.
    pub fn test_name(&self) -> String {
        format!("{}/{}", self.class_name, self.method_name)
    }
}

impl fmt::Display for TestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_name, self.method_name)
    }
}

/// A test entry together with where and on what kind of worker it must run.
/// Input of the split strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntryConfiguration {
    pub test_entry: TestEntry,
    pub test_destination: String,
    #[serde(default)]
    pub requirements: BTreeSet<WorkerCapabilityRequirement>,
}

impl TestEntryConfiguration {
    pub fn new(test_entry: TestEntry, test_destination: impl Into<String>) -> Self {
        Self {
            test_entry,
            test_destination: test_destination.into(),
            requirements: BTreeSet::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: WorkerCapabilityRequirement) -> Self {
        self.requirements.insert(requirement);
        self
    }
}
