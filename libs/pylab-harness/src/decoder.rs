/// Result Decoder
///
/// Turns a `SandboxOutcome` into a `RunResult`. Every path is terminal, no
/// retries:
///
/// | outcome                          | result                         |
/// |----------------------------------|--------------------------------|
/// | timed out                        | `timeout exceeded`             |
/// | exit code != 0 / killed          | `execution failed` + stderr    |
/// | exit 0, empty stdout             | `no output produced`           |
/// | exit 0, stdout not a `RunResult` | `malformed output` + stdout    |
/// | exit 0, valid payload            | payload as emitted             |
///
/// A payload that parses but breaks the result invariants (test count,
/// derived `success`) is malformed too: the driver never produces one, so
/// it came from the submission writing to stdout.
use crate::error::HarnessError;
use crate::sandbox::SandboxOutcome;
use pylab_common::types::RunResult;

/// Check a parsed payload against the run that produced it
fn is_consistent(result: &RunResult, expected_tests: usize) -> bool {
    let shape_ok = if result.is_harness_failure() {
        result.tests.is_empty()
    } else {
        result.tests.len() == expected_tests
    };
    shape_ok && result.success == result.derived_success()
}

pub fn decode(outcome: &SandboxOutcome, expected_tests: usize) -> Result<RunResult, HarnessError> {
    if outcome.timed_out {
        return Err(HarnessError::TimeoutExceeded);
    }

    if outcome.exit_code != Some(0) {
        return Err(HarnessError::ExecutionFailed {
            stderr: outcome.stderr.trim().to_string(),
        });
    }

    let stdout = outcome.stdout.trim();
    if stdout.is_empty() {
        return Err(HarnessError::NoOutput);
    }

    let malformed = || HarnessError::MalformedOutput {
        raw: outcome.stdout.clone(),
    };

    let result: RunResult = serde_json::from_str(stdout).map_err(|e| {
        tracing::debug!(error = %e, "Driver payload did not parse");
        malformed()
    })?;

    if !is_consistent(&result, expected_tests) {
        tracing::warn!(
            tests = result.tests.len(),
            expected_tests,
            success = result.success,
            "Driver payload violates result invariants"
        );
        return Err(malformed());
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exited(code: i32, stdout: &str, stderr: &str) -> SandboxOutcome {
        SandboxOutcome {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
            execution_time_ms: 12,
        }
    }

    fn payload(success: bool, passed: &[bool], error: Option<&str>) -> String {
        let tests: Vec<_> = passed
            .iter()
            .map(|p| {
                json!({
                    "passed": p, "input": [2, 3], "expected": 5,
                    "actual": if *p { json!(5) } else { json!(6) },
                    "error": null, "traceback": null, "description": null, "hidden": false
                })
            })
            .collect();
        json!({"success": success, "tests": tests, "error": error, "traceback": null}).to_string()
    }

    fn decode_err(outcome: &SandboxOutcome, expected: usize) -> RunResult {
        decode(outcome, expected).unwrap_err().into_run_result()
    }

    #[test]
    fn test_timeout() {
        let outcome = SandboxOutcome {
            exit_code: None,
            stdout: payload(true, &[true], None),
            stderr: String::new(),
            timed_out: true,
            execution_time_ms: 1000,
        };
        let result = decode_err(&outcome, 1);
        assert_eq!(result.error.as_deref(), Some("timeout exceeded"));
        assert!(result.tests.is_empty());
        assert_eq!(result.traceback, None);
    }

    #[test]
    fn test_non_zero_exit_surfaces_stderr() {
        let stderr = "  File \"program.py\", line 2\n    def f(:\nSyntaxError: invalid syntax\n";
        let result = decode_err(&exited(1, "", stderr), 3);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("execution failed"));
        assert!(result.traceback.unwrap().ends_with("SyntaxError: invalid syntax"));
    }

    #[test]
    fn test_killed_process_is_execution_failure() {
        let outcome = SandboxOutcome {
            exit_code: None,
            stdout: String::new(),
            stderr: "[process killed: segmentation fault]".to_string(),
            timed_out: false,
            execution_time_ms: 3,
        };
        let result = decode_err(&outcome, 1);
        assert_eq!(result.error.as_deref(), Some("execution failed"));
    }

    #[test]
    fn test_empty_stdout() {
        let result = decode_err(&exited(0, " \n", ""), 1);
        assert_eq!(result.error.as_deref(), Some("no output produced"));
    }

    #[test]
    fn test_unparsable_stdout_attached() {
        let result = decode_err(&exited(0, "hello\n{\"success\": true}", ""), 1);
        assert_eq!(result.error.as_deref(), Some("malformed output"));
        assert_eq!(result.traceback.as_deref(), Some("hello\n{\"success\": true}"));
    }

    #[test]
    fn test_valid_payload_returned_unchanged() {
        let stdout = payload(false, &[true, false], None);
        let result = decode(&exited(0, &format!("{}\n", stdout), ""), 2).unwrap();
        let expected: RunResult = serde_json::from_str(&stdout).unwrap();
        assert_eq!(result, expected);
        assert!(!result.success);
        assert_eq!(result.tests.len(), 2);
    }

    #[test]
    fn test_entry_point_failure_payload() {
        let stdout = payload(false, &[], Some("no function found"));
        let result = decode(&exited(0, &stdout, ""), 4).unwrap();
        assert_eq!(result.error.as_deref(), Some("no function found"));
        assert!(result.tests.is_empty());
    }

    #[test]
    fn test_forged_success_rejected() {
        // claims success with a failing test
        let result = decode_err(&exited(0, &payload(true, &[true, false], None), ""), 2);
        assert_eq!(result.error.as_deref(), Some("malformed output"));

        // wrong number of tests
        let result = decode_err(&exited(0, &payload(true, &[true], None), ""), 2);
        assert_eq!(result.error.as_deref(), Some("malformed output"));

        // harness error alongside tests
        let result = decode_err(&exited(0, &payload(false, &[false], Some("x")), ""), 1);
        assert_eq!(result.error.as_deref(), Some("malformed output"));
    }
}
