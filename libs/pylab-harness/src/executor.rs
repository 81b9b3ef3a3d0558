/// Harness Orchestrator
///
/// **Responsibility:**
/// Drive one run through pool → synthesizer → sandbox → decoder and fold
/// every failure into a `RunResult`. Never returns an error to its caller.
///
/// This module is the glue layer - it knows nothing about:
/// - How the program is built (synthesizer's job)
/// - How the process is confined (sandbox's job)
/// - How output is interpreted (decoder's job)
use crate::decoder;
use crate::error::HarnessError;
use crate::pool::ExecutionPool;
use crate::sandbox::ProcessSandbox;
use crate::synthesizer;
use pylab_common::config::HarnessConfig;
use pylab_common::exercises::Exercise;
use pylab_common::types::{RunResult, Submission, TestCase};
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub struct Harness {
    sandbox: ProcessSandbox,
    pool: ExecutionPool,
    default_timeout: Duration,
}

impl Harness {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            sandbox: ProcessSandbox::new(config),
            pool: ExecutionPool::new(
                config.max_concurrent_runs,
                config.max_queued_runs,
                config.queue_timeout(),
            ),
            default_timeout: config.default_timeout(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Grade `code` with the default timeout and the last-defined-function
    /// entry point
    pub async fn run_submission(
        &self,
        code: &str,
        tests: &[TestCase],
        data_files: &[String],
    ) -> RunResult {
        let submission = Submission::new(code).with_data_files(data_files.to_vec());
        self.run(&submission, tests, self.default_timeout).await
    }

    /// Grade `code` against an exercise, honouring its entry point, data
    /// files and timeout override
    pub async fn run_exercise(&self, exercise: &Exercise, code: &str) -> RunResult {
        let timeout = exercise.timeout().unwrap_or(self.default_timeout);
        self.run(&exercise.submission(code), &exercise.tests, timeout).await
    }

    #[instrument(
        skip(self, submission, tests),
        fields(run_id = tracing::field::Empty, test_count = tests.len())
    )]
    pub async fn run(
        &self,
        submission: &Submission,
        tests: &[TestCase],
        timeout: Duration,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        match self.try_run(run_id, submission, tests, timeout).await {
            Ok(result) => {
                info!(
                    success = result.success,
                    passed = result.passed_count(),
                    total = result.tests.len(),
                    error = ?result.error,
                    "Run completed"
                );
                result
            }
            Err(HarnessError::Internal(e)) => {
                error!(error = ?e, "Internal harness failure");
                HarnessError::Internal(e).into_run_result()
            }
            Err(e) => {
                warn!(error = %e, "Run aborted");
                e.into_run_result()
            }
        }
    }

    async fn try_run(
        &self,
        run_id: Uuid,
        submission: &Submission,
        tests: &[TestCase],
        timeout: Duration,
    ) -> Result<RunResult, HarnessError> {
        let _slot = self.pool.acquire().await?;

        let program = synthesizer::synthesize(submission, tests)?;
        info!(
            entry_point = ?program.entry_point,
            source_size = submission.code.len(),
            data_files = submission.data_files.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Executing submission"
        );

        let outcome = self
            .sandbox
            .execute(run_id, &program, &submission.data_files, timeout)
            .await?;

        decoder::decode(&outcome, tests.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_slot_harness(work_root: &std::path::Path) -> Harness {
        let config = HarnessConfig {
            work_root: work_root.to_path_buf(),
            data_dir: work_root.to_path_buf(),
            max_concurrent_runs: 1,
            max_queued_runs: 0,
            ..HarnessConfig::default()
        };
        Harness::new(&config)
    }

    #[tokio::test]
    async fn test_full_pool_yields_capacity_result() {
        let work = tempfile::tempdir().unwrap();
        let harness = single_slot_harness(work.path());
        let tests = [TestCase {
            input: vec![json!(1)],
            expected: json!(1),
            description: None,
            hidden: false,
        }];

        let held = harness.pool().acquire().await.unwrap();
        let result = harness
            .run_submission("def f(x):\n    return x\n", &tests, &[])
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("execution capacity exceeded"));
        assert!(result.tests.is_empty());
        assert_eq!(result.traceback, None);
        // nothing was spawned for the rejected run
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);

        drop(held);
        assert_eq!(harness.pool().available(), 1);
        assert_eq!(harness.pool().waiting(), 0);
    }
}
