use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::bucket::Bucket;
use crate::models::ids::BucketId;
use crate::models::test_entry::TestEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Crashed,
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, TestOutcome::Passed)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Failed => write!(f, "failed"),
            TestOutcome::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntryResult {
    pub test_entry: TestEntry,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub message: Option<String>,
    /// Where the runner left logs, screenshots and similar output.
    #[serde(default)]
    pub artifacts: Option<String>,
}

impl TestEntryResult {
    pub fn new(test_entry: TestEntry, outcome: TestOutcome) -> Self {
        Self {
            test_entry,
            outcome,
            duration_secs: 0.0,
            message: None,
            artifacts: None,
        }
    }

    pub fn passed(test_entry: TestEntry) -> Self {
        Self::new(test_entry, TestOutcome::Passed)
    }

    pub fn failed(test_entry: TestEntry) -> Self {
        Self::new(test_entry, TestOutcome::Failed)
    }

    pub fn crashed(test_entry: TestEntry, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(test_entry, TestOutcome::Crashed)
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }
}

/// Outcome of running the entries of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingResult {
    pub bucket_id: BucketId,
    pub test_destination: String,
    pub results: Vec<TestEntryResult>,
}

impl TestingResult {
    pub fn new(bucket: &Bucket, results: Vec<TestEntryResult>) -> Self {
        Self {
            bucket_id: bucket.bucket_id.clone(),
            test_destination: bucket.test_destination.clone(),
            results,
        }
    }

    /// Every entry of `bucket` crashed with `message`. Used when the execution
    /// adapter itself fails.
    pub fn all_crashed(bucket: &Bucket, message: &str) -> Self {
        let results = bucket
            .entries
            .iter()
            .map(|entry| TestEntryResult::crashed(entry.clone(), message))
            .collect();
        Self::new(bucket, results)
    }

    pub fn result_for(&self, test_entry: &TestEntry) -> Option<&TestEntryResult> {
        self.results.iter().find(|r| &r.test_entry == test_entry)
    }
}
