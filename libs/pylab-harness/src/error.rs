use pylab_common::types::RunResult;
use thiserror::Error;

/// Failures that abort a whole run. `Display` is the `error` string the
/// caller sees in the returned `RunResult`.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no function found")]
    NoFunctionFound,

    #[error("function '{0}' not found")]
    FunctionNotFound(String),

    #[error("execution failed")]
    ExecutionFailed { stderr: String },

    #[error("timeout exceeded")]
    TimeoutExceeded,

    #[error("no output produced")]
    NoOutput,

    #[error("malformed output")]
    MalformedOutput { raw: String },

    #[error("execution capacity exceeded")]
    CapacityExceeded,

    #[error("internal harness error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HarnessError {
    /// Diagnostic text attached as the top-level traceback
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            HarnessError::ExecutionFailed { stderr } => Some(stderr.clone()),
            HarnessError::MalformedOutput { raw } => Some(raw.clone()),
            HarnessError::Internal(e) => Some(format!("{:?}", e)),
            _ => None,
        }
    }

    pub fn into_run_result(self) -> RunResult {
        let traceback = self.diagnostic();
        RunResult::failure(self.to_string(), traceback)
    }
}
