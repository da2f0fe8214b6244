use std::collections::HashMap;

use crate::models::{BucketId, TestEntry, TestOutcome, WorkerId};

/// One recorded run of a test entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAttempt {
    pub worker_id: WorkerId,
    pub bucket_id: BucketId,
    pub outcome: TestOutcome,
}

#[derive(Debug, Default)]
struct EntryHistory {
    attempts: Vec<TestAttempt>,
    final_outcome: Option<TestOutcome>,
}

impl EntryHistory {
    fn failure_count(&self) -> u32 {
        self.attempts.iter().filter(|a| a.outcome.is_failure()).count() as u32
    }
}

/// Attempt ledger per bucket lineage and test entry. Decides whether a failed
/// entry gets another run or is reported as a final failure.
///
/// The same test scheduled on two destinations lives in two lineages and is
/// tracked independently. Records are append-only and a final outcome, once
/// set, never changes.
#[derive(Debug)]
pub struct TestHistoryTracker {
    max_retries: u32,
    entries: HashMap<(BucketId, TestEntry), EntryHistory>,
}

impl TestHistoryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            entries: HashMap::new(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn get(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> Option<&EntryHistory> {
        self.entries.get(&(lineage_id.clone(), test_entry.clone()))
    }

    fn get_or_default(
        &mut self,
        lineage_id: &BucketId,
        test_entry: &TestEntry,
    ) -> &mut EntryHistory {
        self.entries
            .entry((lineage_id.clone(), test_entry.clone()))
            .or_default()
    }

    /// Records an attempt and returns the total number of attempts for the
    /// entry within its lineage.
    pub fn register_attempt(
        &mut self,
        lineage_id: &BucketId,
        test_entry: &TestEntry,
        worker_id: &WorkerId,
        bucket_id: &BucketId,
        outcome: TestOutcome,
    ) -> u32 {
        let history = self.get_or_default(lineage_id, test_entry);
        history.attempts.push(TestAttempt {
            worker_id: worker_id.clone(),
            bucket_id: bucket_id.clone(),
            outcome,
        });
        history.attempts.len() as u32
    }

    pub fn attempt_count(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> u32 {
        self.get(lineage_id, test_entry)
            .map(|h| h.attempts.len() as u32)
            .unwrap_or(0)
    }

    pub fn failure_count(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> u32 {
        self.get(lineage_id, test_entry)
            .map(EntryHistory::failure_count)
            .unwrap_or(0)
    }

    /// True when the entry has failed, is not final yet, and has not used up
    /// its retries. `max_retries = N` allows N + 1 failing attempts in total.
    pub fn retry_eligible(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> bool {
        match self.get(lineage_id, test_entry) {
            Some(history) if history.final_outcome.is_none() => {
                let failures = history.failure_count();
                failures > 0 && failures <= self.max_retries
            }
            _ => false,
        }
    }

    /// Marks the entry final. Returns false, leaving the recorded outcome
    /// untouched, if it was already final.
    pub fn finalize(
        &mut self,
        lineage_id: &BucketId,
        test_entry: &TestEntry,
        outcome: TestOutcome,
    ) -> bool {
        let history = self.get_or_default(lineage_id, test_entry);
        if history.final_outcome.is_some() {
            return false;
        }
        history.final_outcome = Some(outcome);
        true
    }

    pub fn final_outcome(
        &self,
        lineage_id: &BucketId,
        test_entry: &TestEntry,
    ) -> Option<TestOutcome> {
        self.get(lineage_id, test_entry).and_then(|h| h.final_outcome)
    }

    pub fn is_final(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> bool {
        self.final_outcome(lineage_id, test_entry).is_some()
    }

    /// Whether `worker_id` has a failing attempt of this entry on record.
    pub fn failed_by(
        &self,
        lineage_id: &BucketId,
        test_entry: &TestEntry,
        worker_id: &WorkerId,
    ) -> bool {
        self.get(lineage_id, test_entry).is_some_and(|h| {
            h.attempts
                .iter()
                .any(|a| a.outcome.is_failure() && &a.worker_id == worker_id)
        })
    }

    pub fn attempts(&self, lineage_id: &BucketId, test_entry: &TestEntry) -> &[TestAttempt] {
        self.get(lineage_id, test_entry)
            .map(|h| h.attempts.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TestEntry {
        TestEntry::new("LoginTests", "testLogin")
    }

    fn worker(id: &str) -> WorkerId {
        WorkerId::from(id)
    }

    fn lineage() -> BucketId {
        BucketId::from("lineage-1")
    }

    #[test]
    fn unknown_entry_has_no_history() {
        let tracker = TestHistoryTracker::new(2);
        assert_eq!(tracker.attempt_count(&lineage(), &entry()), 0);
        assert!(!tracker.retry_eligible(&lineage(), &entry()));
        assert!(!tracker.is_final(&lineage(), &entry()));
    }

    #[test]
    fn failed_entry_is_retried_until_budget_is_used() {
        let mut tracker = TestHistoryTracker::new(2);
        let (l, e) = (lineage(), entry());
        let bucket = BucketId::generate();

        tracker.register_attempt(&l, &e, &worker("w1"), &bucket, TestOutcome::Failed);
        assert!(tracker.retry_eligible(&l, &e));

        tracker.register_attempt(&l, &e, &worker("w2"), &bucket, TestOutcome::Crashed);
        assert!(tracker.retry_eligible(&l, &e));

        let attempts = tracker.register_attempt(&l, &e, &worker("w1"), &bucket, TestOutcome::Failed);
        assert_eq!(attempts, 3);
        assert!(!tracker.retry_eligible(&l, &e));
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let mut tracker = TestHistoryTracker::new(0);
        tracker.register_attempt(&lineage(), &entry(), &worker("w1"), &BucketId::generate(), TestOutcome::Failed);
        assert!(!tracker.retry_eligible(&lineage(), &entry()));
    }

    #[test]
    fn passing_attempt_is_not_retry_eligible() {
        let mut tracker = TestHistoryTracker::new(3);
        tracker.register_attempt(&lineage(), &entry(), &worker("w1"), &BucketId::generate(), TestOutcome::Passed);
        assert!(!tracker.retry_eligible(&lineage(), &entry()));
    }

    #[test]
    fn final_outcome_is_sticky() {
        let mut tracker = TestHistoryTracker::new(1);
        let (l, e) = (lineage(), entry());
        let bucket = BucketId::generate();
        tracker.register_attempt(&l, &e, &worker("w1"), &bucket, TestOutcome::Failed);

        assert!(tracker.finalize(&l, &e, TestOutcome::Failed));
        assert!(!tracker.retry_eligible(&l, &e));

        // A late duplicate result is recorded but does not change the verdict.
        tracker.register_attempt(&l, &e, &worker("w2"), &bucket, TestOutcome::Passed);
        assert!(!tracker.finalize(&l, &e, TestOutcome::Passed));
        assert_eq!(tracker.final_outcome(&l, &e), Some(TestOutcome::Failed));
        assert_eq!(tracker.attempt_count(&l, &e), 2);
    }

    #[test]
    fn lineages_do_not_share_history() {
        let mut tracker = TestHistoryTracker::new(0);
        let (ios14, ios15) = (BucketId::from("ios14"), BucketId::from("ios15"));

        tracker.register_attempt(&ios14, &entry(), &worker("w1"), &ios14, TestOutcome::Passed);
        assert!(tracker.finalize(&ios14, &entry(), TestOutcome::Passed));

        assert!(!tracker.is_final(&ios15, &entry()));
        tracker.register_attempt(&ios15, &entry(), &worker("w1"), &ios15, TestOutcome::Failed);
        assert!(tracker.finalize(&ios15, &entry(), TestOutcome::Failed));
        assert_eq!(tracker.attempt_count(&ios15, &entry()), 1);
        assert!(!tracker.failed_by(&ios14, &entry(), &worker("w1")));
    }

    #[test]
    fn tracks_which_workers_failed_an_entry() {
        let mut tracker = TestHistoryTracker::new(5);
        let (l, e) = (lineage(), entry());
        let bucket = BucketId::generate();
        tracker.register_attempt(&l, &e, &worker("w1"), &bucket, TestOutcome::Failed);
        tracker.register_attempt(&l, &e, &worker("w2"), &bucket, TestOutcome::Passed);

        assert!(tracker.failed_by(&l, &e, &worker("w1")));
        assert!(!tracker.failed_by(&l, &e, &worker("w2")));
        assert!(!tracker.failed_by(&l, &e, &worker("w3")));
        assert_eq!(tracker.attempts(&l, &e).len(), 2);
    }
}
