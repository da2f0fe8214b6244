use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::{Bucket, TestEntry, TestEntryResult, TestOutcome, TestingResult};

/// Runs the tests of a bucket on this machine.
///
/// Failures of the executor itself are reported inside the returned result
/// as crashed entries. They are never errors of the queue.
#[async_trait]
pub trait BucketExecutor: Send + Sync {
    async fn execute(&self, bucket: &Bucket) -> TestingResult;
}

/// Runs an external program once per test entry:
/// `program args... <ClassName>/<methodName>`.
///
/// Exit status 0 means passed, any other exit status means failed. A program
/// that cannot be spawned, is killed by a signal or exceeds the timeout
/// yields a crashed entry.
#[derive(Debug, Clone)]
pub struct ProcessBucketExecutor {
    program: String,
    args: Vec<String>,
    test_timeout: Duration,
}

impl ProcessBucketExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, test_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            test_timeout,
        }
    }

    async fn run_entry(&self, bucket: &Bucket, entry: &TestEntry) -> TestEntryResult {
        let started = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(entry.test_name())
            .env("TESTPOOL_TEST_DESTINATION", &bucket.test_destination)
            .env("TESTPOOL_BUCKET_ID", bucket.bucket_id.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &bucket.tool_resources {
            command.env(format!("TESTPOOL_RESOURCE_{}", name.to_uppercase()), value);
        }

        let output = tokio::time::timeout(self.test_timeout, command.output()).await;
        let duration = started.elapsed().as_secs_f64();

        let result = match output {
            Err(_) => TestEntryResult::crashed(
                entry.clone(),
                format!("timed out after {}s", self.test_timeout.as_secs()),
            ),
            Ok(Err(e)) => {
                tracing::error!(test = %entry, program = %self.program, error = %e, "Failed to spawn test runner");
                TestEntryResult::crashed(entry.clone(), e.to_string())
            }
            Ok(Ok(output)) => Self::process_output(entry, output),
        };

        tracing::info!(
            test = %entry,
            bucket_id = %bucket.bucket_id,
            outcome = %result.outcome,
            "Test finished"
        );
        result.with_duration(duration)
    }

    fn process_output(entry: &TestEntry, output: std::process::Output) -> TestEntryResult {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let (outcome, message) = match output.status.code() {
            Some(0) => (TestOutcome::Passed, None),
            Some(code) => (
                TestOutcome::Failed,
                Some(if stderr.is_empty() {
                    format!("exit code {code}")
                } else {
                    stderr
                }),
            ),
            None => (TestOutcome::Crashed, Some("terminated by signal".to_string())),
        };

        let mut result = TestEntryResult::new(entry.clone(), outcome);
        result.message = message;
        result.artifacts = if stdout.is_empty() { None } else { Some(stdout) };
        result
    }
}

#[async_trait]
impl BucketExecutor for ProcessBucketExecutor {
    async fn execute(&self, bucket: &Bucket) -> TestingResult {
        tracing::info!(
            bucket_id = %bucket.bucket_id,
            tests = bucket.entries.len(),
            destination = %bucket.test_destination,
            "Executing bucket"
        );
        let mut results = Vec::with_capacity(bucket.entries.len());
        for entry in &bucket.entries {
            results.push(self.run_entry(bucket, entry).await);
        }
        TestingResult::new(bucket, results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::ToolResources;

    fn bucket(entries: Vec<TestEntry>) -> Bucket {
        Bucket::new(entries, "local", BTreeSet::new(), ToolResources::new())
    }

    fn sh(script: &str) -> ProcessBucketExecutor {
        ProcessBucketExecutor::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "runner".to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn exit_status_decides_outcome() {
        // `$1` is the test name passed by the executor.
        let executor = sh(r#"case "$1" in *testOk) exit 0;; *) echo boom >&2; exit 3;; esac"#);
        let bucket = bucket(vec![
            TestEntry::new("Suite", "testOk"),
            TestEntry::new("Suite", "testBroken"),
        ]);

        let result = executor.execute(&bucket).await;

        assert_eq!(result.bucket_id, bucket.bucket_id);
        assert_eq!(result.results[0].outcome, TestOutcome::Passed);
        assert_eq!(result.results[1].outcome, TestOutcome::Failed);
        assert_eq!(result.results[1].message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn missing_program_crashes_entries() {
        let executor = ProcessBucketExecutor::new(
            "/nonexistent/testpool-runner",
            vec![],
            Duration::from_secs(5),
        );
        let bucket = bucket(vec![TestEntry::new("Suite", "testA")]);

        let result = executor.execute(&bucket).await;
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].outcome, TestOutcome::Crashed);
    }

    #[tokio::test]
    async fn slow_test_times_out_as_crashed() {
        let executor = ProcessBucketExecutor::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let bucket = bucket(vec![TestEntry::new("Suite", "testSlow")]);

        let result = executor.execute(&bucket).await;
        assert_eq!(result.results[0].outcome, TestOutcome::Crashed);
    }
}
