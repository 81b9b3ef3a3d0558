use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message shown in place of the error of a hidden test
pub const HIDDEN_TEST_ERROR: &str = "hidden test raised an error";

/// One input/expected-output pair used to grade a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Positional arguments, in call order
    pub input: Vec<Value>,
    pub expected: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl TestCase {
    /// Copy of this test with its data withheld when it is hidden
    pub fn public_view(&self) -> TestCase {
        if !self.hidden {
            return self.clone();
        }

        TestCase {
            input: Vec::new(),
            expected: Value::Null,
            description: self.description.clone(),
            hidden: true,
        }
    }
}

/// How the driver picks the callable under test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EntryPoint {
    /// Last function defined at module level
    #[default]
    LastDefined,
    /// Function declared by the exercise
    Named(String),
}

impl EntryPoint {
    pub fn from_declared(name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.trim().is_empty() => EntryPoint::Named(name.trim().to_string()),
            _ => EntryPoint::LastDefined,
        }
    }
}

/// Learner code plus what it is allowed to see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub code: String,
    #[serde(default)]
    pub data_files: Vec<String>,
    #[serde(default)]
    pub entry_point: EntryPoint,
}

impl Submission {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            data_files: Vec::new(),
            entry_point: EntryPoint::LastDefined,
        }
    }

    pub fn with_data_files(mut self, data_files: Vec<String>) -> Self {
        self.data_files = data_files;
        self
    }

    pub fn with_entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.entry_point = entry_point;
        self
    }
}

/// Verdict for a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub input: Vec<Value>,
    pub expected: Value,
    #[serde(default)]
    pub actual: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Result of one harness run, also the wire format emitted by the test driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub tests: Vec<TestOutcome>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

impl RunResult {
    /// Build a result from per-test outcomes; `success` is derived, never passed in
    pub fn from_outcomes(tests: Vec<TestOutcome>) -> Self {
        let success = tests.iter().all(|t| t.passed);
        Self {
            success,
            tests,
            error: None,
            traceback: None,
        }
    }

    /// Harness-level failure: no per-test outcomes
    pub fn failure(error: impl Into<String>, traceback: Option<String>) -> Self {
        Self {
            success: false,
            tests: Vec::new(),
            error: Some(error.into()),
            traceback,
        }
    }

    pub fn is_harness_failure(&self) -> bool {
        self.error.is_some()
    }

    /// The value `success` must hold for this result to be consistent
    pub fn derived_success(&self) -> bool {
        self.error.is_none() && self.tests.iter().all(|t| t.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.passed).count()
    }

    /// Percentage of passed tests, 0 when there are none
    pub fn score_percent(&self) -> f64 {
        if self.tests.is_empty() {
            return 0.0;
        }
        self.passed_count() as f64 * 100.0 / self.tests.len() as f64
    }

    /// Withhold the data of hidden tests before the result leaves the server
    pub fn redact_hidden(&mut self) {
        for outcome in self.tests.iter_mut().filter(|t| t.hidden) {
            outcome.input.clear();
            outcome.expected = Value::Null;
            outcome.actual = None;
            outcome.traceback = None;
            if outcome.error.is_some() {
                outcome.error = Some(HIDDEN_TEST_ERROR.to_string());
            }
        }
    }
}
