use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{Bucket, TestEntry, TestEntryConfiguration, ToolResources, WorkerCapabilityRequirement};

/// What a split strategy may take into account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSplitInfo {
    pub number_of_workers: usize,
    pub tool_resources: ToolResources,
}

/// Partitions test entry configurations into buckets.
///
/// Implementations must only put entries sharing a test destination and a
/// requirement set into the same bucket, and must not return empty buckets.
pub trait BucketSplitter: Send + Sync {
    fn generate(
        &self,
        configurations: &[TestEntryConfiguration],
        split_info: &BucketSplitInfo,
    ) -> Vec<Bucket>;
}

/// Built-in split strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScheduleStrategy {
    /// One entry per bucket.
    Individual,
    /// Roughly one bucket per worker for each group.
    #[default]
    EquallyDivided,
    /// Buckets of at most `size` entries.
    FixedBucketSize { size: usize },
}

impl ScheduleStrategy {
    fn chunk_size(&self, group_len: usize, number_of_workers: usize) -> usize {
        match self {
            ScheduleStrategy::Individual => 1,
            ScheduleStrategy::EquallyDivided => group_len.div_ceil(number_of_workers.max(1)),
            ScheduleStrategy::FixedBucketSize { size } => *size,
        }
        .max(1)
    }
}

impl BucketSplitter for ScheduleStrategy {
    fn generate(
        &self,
        configurations: &[TestEntryConfiguration],
        split_info: &BucketSplitInfo,
    ) -> Vec<Bucket> {
        homogeneous_groups(configurations)
            .into_iter()
            .flat_map(|group| {
                let size = self.chunk_size(group.entries.len(), split_info.number_of_workers);
                group
                    .entries
                    .chunks(size)
                    .map(|chunk| {
                        Bucket::new(
                            chunk.to_vec(),
                            group.test_destination.clone(),
                            group.requirements.clone(),
                            split_info.tool_resources.clone(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

struct Group {
    test_destination: String,
    requirements: BTreeSet<WorkerCapabilityRequirement>,
    entries: Vec<TestEntry>,
}

/// Groups entries by destination and requirements, keeping the order in
/// which groups and entries first appear.
fn homogeneous_groups(configurations: &[TestEntryConfiguration]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for configuration in configurations {
        let existing = groups.iter_mut().find(|g| {
            g.test_destination == configuration.test_destination
                && g.requirements == configuration.requirements
        });
        match existing {
            Some(group) => group.entries.push(configuration.test_entry.clone()),
            None => groups.push(Group {
                test_destination: configuration.test_destination.clone(),
                requirements: configuration.requirements.clone(),
                entries: vec![configuration.test_entry.clone()],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkerCapabilityConstraint;

    fn configurations(count: usize, destination: &str) -> Vec<TestEntryConfiguration> {
        (0..count)
            .map(|i| {
                TestEntryConfiguration::new(
                    TestEntry::new("SuiteTests", format!("test{i}")),
                    destination,
                )
            })
            .collect()
    }

    fn split_info(workers: usize) -> BucketSplitInfo {
        BucketSplitInfo {
            number_of_workers: workers,
            tool_resources: ToolResources::new(),
        }
    }

    #[test]
    fn individual_creates_one_bucket_per_entry() {
        let buckets = ScheduleStrategy::Individual.generate(&configurations(3, "sim"), &split_info(2));
        assert_eq!(buckets.len(), 3);
        assert!(buckets.iter().all(|b| b.entries.len() == 1));
    }

    #[test]
    fn equally_divided_spreads_over_workers() {
        let buckets =
            ScheduleStrategy::EquallyDivided.generate(&configurations(10, "sim"), &split_info(3));
        let sizes: Vec<usize> = buckets.iter().map(|b| b.entries.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn equally_divided_with_no_workers_makes_a_single_bucket() {
        let buckets =
            ScheduleStrategy::EquallyDivided.generate(&configurations(5, "sim"), &split_info(0));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].entries.len(), 5);
    }

    #[test]
    fn fixed_size_chunks_entries() {
        let strategy = ScheduleStrategy::FixedBucketSize { size: 2 };
        let buckets = strategy.generate(&configurations(5, "sim"), &split_info(10));
        let sizes: Vec<usize> = buckets.iter().map(|b| b.entries.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn buckets_never_mix_destinations_or_requirements() {
        let mut input = configurations(2, "sim-a");
        input.extend(configurations(2, "sim-b"));
        input.push(
            TestEntryConfiguration::new(TestEntry::new("GpuTests", "testRender"), "sim-a")
                .with_requirement(WorkerCapabilityRequirement::new(
                    "gpu",
                    WorkerCapabilityConstraint::Present,
                )),
        );

        let buckets = ScheduleStrategy::FixedBucketSize { size: 10 }.generate(&input, &split_info(1));
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].test_destination, "sim-a");
        assert_eq!(buckets[0].entries.len(), 2);
        assert_eq!(buckets[1].test_destination, "sim-b");
        assert_eq!(buckets[2].requirements.len(), 1);
    }

    #[test]
    fn empty_input_yields_no_buckets() {
        assert!(ScheduleStrategy::Individual.generate(&[], &split_info(1)).is_empty());
    }

    #[test]
    fn strategy_parses_from_json() {
        let strategy: ScheduleStrategy =
            serde_json::from_str(r#"{"type":"fixedBucketSize","size":5}"#).unwrap();
        assert_eq!(strategy, ScheduleStrategy::FixedBucketSize { size: 5 });
    }
}
