use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::models::{ToolResources, WorkerId};

/// Per-worker settings handed back to the worker when it registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfiguration {
    /// How many buckets the worker executes at the same time.
    pub number_of_parallel_buckets: u32,
    /// How often the worker reports that it is alive while executing buckets.
    pub report_alive_interval_secs: u64,
}

impl Default for WorkerConfiguration {
    fn default() -> Self {
        Self {
            number_of_parallel_buckets: 1,
            report_alive_interval_secs: 20,
        }
    }
}

impl WorkerConfiguration {
    pub fn report_alive_interval(&self) -> Duration {
        Duration::from_secs(self.report_alive_interval_secs)
    }
}

/// When the queue server shuts itself down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "caseId", rename_all = "camelCase")]
pub enum TerminationPolicy {
    /// Run until a signal arrives.
    #[default]
    StayAlive,
    /// Exit once there has been no running, non-depleted job for `period_secs`.
    AfterBeingIdle {
        #[serde(rename = "periodSecs")]
        period_secs: u64,
    },
}

/// Queue server configuration, usually read from a JSON file.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueServerConfig {
    /// How long a worker should wait before polling again when there is no work for it.
    pub check_again_time_interval_secs: u64,
    /// A worker that has not been seen for this long is considered silent.
    pub worker_alive_timeout_secs: u64,
    pub aliveness_polling_interval_secs: u64,
    pub stuck_buckets_polling_interval_secs: u64,
    pub aliveness_metric_report_interval_secs: u64,
    /// Extra attempts a failing test gets after the first one.
    pub number_of_retries: u32,
    /// How many deleted jobs are kept around for late results and status queries.
    pub max_deleted_jobs: usize,
    pub termination_policy: TerminationPolicy,
    pub default_worker_configuration: WorkerConfiguration,
    pub worker_specific_configurations: HashMap<WorkerId, WorkerConfiguration>,
    /// Attached to every bucket created by this server.
    pub tool_resources: ToolResources,
}

impl Default for QueueServerConfig {
    fn default() -> Self {
        Self {
            check_again_time_interval_secs: 30,
            worker_alive_timeout_secs: 60,
            aliveness_polling_interval_secs: 20,
            stuck_buckets_polling_interval_secs: 5,
            aliveness_metric_report_interval_secs: 30,
            number_of_retries: 1,
            max_deleted_jobs: 20,
            termination_policy: TerminationPolicy::StayAlive,
            default_worker_configuration: WorkerConfiguration::default(),
            worker_specific_configurations: HashMap::new(),
            tool_resources: BTreeMap::new(),
        }
    }
}

impl QueueServerConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("checkAgainTimeIntervalSecs", self.check_again_time_interval_secs),
            ("workerAliveTimeoutSecs", self.worker_alive_timeout_secs),
            ("alivenessPollingIntervalSecs", self.aliveness_polling_interval_secs),
            ("stuckBucketsPollingIntervalSecs", self.stuck_buckets_polling_interval_secs),
            ("alivenessMetricReportIntervalSecs", self.aliveness_metric_report_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(QueueError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        let worker_configs = std::iter::once(&self.default_worker_configuration)
            .chain(self.worker_specific_configurations.values());
        for worker_config in worker_configs {
            if worker_config.number_of_parallel_buckets == 0 {
                return Err(QueueError::InvalidConfig(
                    "numberOfParallelBuckets must be positive".to_string(),
                ));
            }
            if worker_config.report_alive_interval_secs == 0 {
                return Err(QueueError::InvalidConfig(
                    "reportAliveIntervalSecs must be positive".to_string(),
                ));
            }
        }

        if let TerminationPolicy::AfterBeingIdle { period_secs: 0 } = self.termination_policy {
            return Err(QueueError::InvalidConfig(
                "termination period must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn worker_configuration(&self, worker_id: &WorkerId) -> WorkerConfiguration {
        self.worker_specific_configurations
            .get(worker_id)
            .cloned()
            .unwrap_or_else(|| self.default_worker_configuration.clone())
    }

    pub fn with_worker(mut self, worker_id: impl Into<WorkerId>, config: WorkerConfiguration) -> Self {
        self.worker_specific_configurations
            .insert(worker_id.into(), config);
        self
    }

    pub fn check_again_time_interval(&self) -> Duration {
        Duration::from_secs(self.check_again_time_interval_secs)
    }

    pub fn worker_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_alive_timeout_secs)
    }

    pub fn aliveness_polling_interval(&self) -> Duration {
        Duration::from_secs(self.aliveness_polling_interval_secs)
    }

    pub fn stuck_buckets_polling_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_buckets_polling_interval_secs)
    }

    pub fn aliveness_metric_report_interval(&self) -> Duration {
        Duration::from_secs(self.aliveness_metric_report_interval_secs)
    }
}
