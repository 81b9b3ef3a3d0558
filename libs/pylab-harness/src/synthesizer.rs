/// Test Program Synthesizer
///
/// Builds the program the sandbox runs: a one-line prelude, the submission
/// verbatim, then a driver that calls the entry point once per test case and
/// writes a single JSON `RunResult` to stdout.
///
/// Test cases never appear in the program text. They travel in a separate
/// JSON request that the sandbox writes to the child's stdin; the prelude
/// reads and closes stdin before any submission code runs.
use crate::error::HarnessError;
use anyhow::{bail, Context, Result};
use pylab_common::types::{EntryPoint, Submission, TestCase};
use serde::Serialize;

/// Upper bound on submission size accepted for synthesis
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

/// Single line so tracebacks into the submission are off by exactly one line
const PRELUDE: &str = "import sys as __pylab_sys, json as __pylab_json, copy as __pylab_copy, traceback as __pylab_traceback; \
__pylab_request = __pylab_json.loads(__pylab_sys.stdin.read()); \
__pylab_stdout = __pylab_sys.stdout; \
__pylab_sys.stdin.close()\n";

const DRIVER: &str = r#"

def __pylab_plain(value):
    if isinstance(value, float) and (value != value or value in (float("inf"), float("-inf"))):
        return repr(value)
    if isinstance(value, dict):
        return {key: __pylab_plain(item) for key, item in value.items()}
    if isinstance(value, (list, tuple)):
        return [__pylab_plain(item) for item in value]
    return value


def __pylab_run(request):
    import asyncio, inspect
    results = {"success": True, "tests": [], "error": None, "traceback": None}
    name = request["entry_point"]
    func = globals().get(name) if name is not None else None
    if not callable(func):
        results["success"] = False
        results["error"] = request["missing_entry_point"]
        return results
    for case in request["tests"]:
        outcome = {
            "passed": False,
            "input": case["input"],
            "expected": case["expected"],
            "actual": None,
            "error": None,
            "traceback": None,
            "description": case.get("description"),
            "hidden": case.get("hidden", False),
        }
        try:
            args = __pylab_copy.deepcopy(case["input"])
            actual = func(*args)
            if inspect.iscoroutine(actual):
                actual = asyncio.run(actual)
            plain = __pylab_plain(actual)
            outcome["passed"] = bool(actual == case["expected"])
            outcome["actual"] = plain
        except (Exception, SystemExit) as exc:
            outcome["error"] = str(exc) or type(exc).__name__
            outcome["traceback"] = __pylab_traceback.format_exc()
        if not outcome["passed"]:
            results["success"] = False
        results["tests"].append(outcome)
    return results


__pylab_stdout.write(__pylab_json.dumps(__pylab_run(__pylab_request), default=repr))
__pylab_stdout.flush()
"#;

/// Everything the sandbox needs to run one submission
#[derive(Debug, Clone)]
pub struct SynthesizedProgram {
    pub source: String,
    /// JSON request for the driver, delivered on stdin
    pub stdin_payload: Vec<u8>,
    /// Function the driver will look up, if any
    pub entry_point: Option<String>,
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    entry_point: Option<&'a str>,
    missing_entry_point: String,
    tests: &'a [TestCase],
}

/// Name declared by a `def` or `async def` at column zero, if `line` is one
fn top_level_def_name(line: &str) -> Option<&str> {
    let line = match line.strip_prefix("async") {
        Some(rest) if rest.starts_with(|c: char| c.is_whitespace()) => rest.trim_start(),
        _ => line,
    };
    let rest = line.strip_prefix("def")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }

    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(end);

    if name.is_empty() || name.starts_with(|c: char| c.is_numeric()) {
        return None;
    }
    tail.trim_start().starts_with('(').then_some(name)
}

/// Last function defined at module level. Indented definitions (methods,
/// nested helpers) are ignored.
pub fn find_entry_point(code: &str) -> Option<&str> {
    code.lines().filter_map(top_level_def_name).last()
}

pub fn synthesize(submission: &Submission, tests: &[TestCase]) -> Result<SynthesizedProgram> {
    if submission.code.len() > MAX_SOURCE_CODE_BYTES {
        bail!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        );
    }

    let (entry_point, missing) = match &submission.entry_point {
        EntryPoint::LastDefined => (
            find_entry_point(&submission.code),
            HarnessError::NoFunctionFound,
        ),
        EntryPoint::Named(name) => (
            Some(name.as_str()),
            HarnessError::FunctionNotFound(name.clone()),
        ),
    };

    let request = DriverRequest {
        entry_point,
        missing_entry_point: missing.to_string(),
        tests,
    };
    let stdin_payload =
        serde_json::to_vec(&request).context("Failed to serialize driver request")?;

    let mut source =
        String::with_capacity(PRELUDE.len() + submission.code.len() + DRIVER.len() + 1);
    source.push_str(PRELUDE);
    source.push_str(&submission.code);
    if !submission.code.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(DRIVER);

    Ok(SynthesizedProgram {
        source,
        stdin_payload,
        entry_point: entry_point.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn case(input: Vec<Value>, expected: Value) -> TestCase {
        TestCase {
            input,
            expected,
            description: None,
            hidden: false,
        }
    }

    #[test]
    fn test_last_top_level_function_wins() {
        let code = "def helper(x):\n    return x\n\ndef solve(a, b):\n    return helper(a) + b\n";
        assert_eq!(find_entry_point(code), Some("solve"));
    }

    #[test]
    fn test_nested_and_method_definitions_ignored() {
        let code = r#"
def outer(n):
    def inner(m):
        return m
    return inner(n)

class Helper:
    def method(self):
        return 1
"#;
        assert_eq!(find_entry_point(code), Some("outer"));
    }

    #[test]
    fn test_def_spacing_variants() {
        assert_eq!(find_entry_point("def   spaced  (a):\n    pass"), Some("spaced"));
        assert_eq!(find_entry_point("def\tcalcul_é(a):\n    pass"), Some("calcul_é"));
        assert_eq!(find_entry_point("define = 3\ndefault(x)"), None);
        assert_eq!(find_entry_point("def broken:\n    pass"), None);
        assert_eq!(find_entry_point("async def fetch(a):\n    pass"), Some("fetch"));
        assert_eq!(find_entry_point("asyncdef fetch(a):\n    pass"), None);
    }

    #[test]
    fn test_no_function() {
        assert_eq!(find_entry_point("x = 1\nprint(x)\n"), None);
        assert_eq!(find_entry_point(""), None);
    }

    #[test]
    fn test_program_embeds_submission_verbatim() {
        let code = "def add(a, b):\n    return a + b";
        let program = synthesize(&Submission::new(code), &[]).unwrap();

        assert!(program.source.starts_with(PRELUDE));
        assert!(program.source.contains("def add(a, b):\n    return a + b\n"));
        assert!(program.source.ends_with(DRIVER));
        assert_eq!(program.entry_point.as_deref(), Some("add"));
        // submission starts on the second line
        assert_eq!(program.source.lines().nth(1), Some("def add(a, b):"));
    }

    #[test]
    fn test_tests_travel_outside_the_source() {
        let code = "def f(s):\n    return s  # ''' \"\"\" ]}\n";
        let tests = vec![case(vec![json!("'''); import os #")], json!("x"))];
        let program = synthesize(&Submission::new(code), &tests).unwrap();

        assert!(!program.source.contains("import os #"));

        let request: Value = serde_json::from_slice(&program.stdin_payload).unwrap();
        assert_eq!(request["entry_point"], json!("f"));
        assert_eq!(request["tests"][0]["input"][0], json!("'''); import os #"));
        assert_eq!(request["tests"][0]["expected"], json!("x"));
        assert_eq!(request["tests"][0]["hidden"], json!(false));
    }

    #[test]
    fn test_request_preserves_test_order() {
        let tests: Vec<_> = (0..5).map(|i| case(vec![json!(i)], json!(i * 2))).collect();
        let program = synthesize(&Submission::new("def double(n):\n    return n * 2\n"), &tests).unwrap();

        let request: Value = serde_json::from_slice(&program.stdin_payload).unwrap();
        let inputs: Vec<_> = request["tests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["input"][0].clone())
            .collect();
        assert_eq!(inputs, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_missing_entry_point_messages() {
        let program = synthesize(&Submission::new("x = 1"), &[]).unwrap();
        let request: Value = serde_json::from_slice(&program.stdin_payload).unwrap();
        assert_eq!(request["entry_point"], Value::Null);
        assert_eq!(request["missing_entry_point"], json!("no function found"));

        let named = Submission::new("def other():\n    pass\n")
            .with_entry_point(EntryPoint::Named("somme".to_string()));
        let program = synthesize(&named, &[]).unwrap();
        let request: Value = serde_json::from_slice(&program.stdin_payload).unwrap();
        assert_eq!(request["entry_point"], json!("somme"));
        assert_eq!(request["missing_entry_point"], json!("function 'somme' not found"));
    }

    #[test]
    fn test_oversized_source_rejected() {
        let code = "#".repeat(MAX_SOURCE_CODE_BYTES + 1);
        assert!(synthesize(&Submission::new(code), &[]).is_err());
    }
}
