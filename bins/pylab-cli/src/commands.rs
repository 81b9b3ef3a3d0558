// CLI commands for grading submissions
use anyhow::{bail, Context, Result};
use pylab_common::config::PlatformConfig;
use pylab_common::exercises::ExerciseCatalog;
use pylab_common::types::{EntryPoint, RunResult, Submission, TestCase};
use pylab_harness::Harness;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

fn read_code(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Load an ad hoc test list: a JSON array of test cases
pub fn load_tests(path: &Path) -> Result<Vec<TestCase>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let tests: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test list {}", path.display()))?;
    if tests.is_empty() {
        bail!("Test list {} is empty", path.display());
    }
    debug!(path = %path.display(), count = tests.len(), "Loaded test list");
    Ok(tests)
}

/// Human-readable report of a run
pub fn render_report(result: &RunResult) -> String {
    let mut out = String::new();

    if let Some(error) = &result.error {
        let _ = writeln!(out, "❌ {}", error);
        if let Some(traceback) = &result.traceback {
            let _ = writeln!(out, "\n{}", traceback.trim_end());
        }
        return out;
    }

    for (idx, test) in result.tests.iter().enumerate() {
        let mark = if test.passed { "✓" } else { "✗" };
        let label = test.description.as_deref().unwrap_or("");
        let _ = writeln!(out, "  {} Test {} {}", mark, idx + 1, label);

        if test.passed {
            continue;
        }
        let _ = writeln!(out, "    Input:    {}", serde_json::Value::Array(test.input.clone()));
        let _ = writeln!(out, "    Expected: {}", test.expected);
        match (&test.error, &test.actual) {
            (Some(error), _) => {
                let _ = writeln!(out, "    Error:    {}", error);
            }
            (None, Some(actual)) => {
                let _ = writeln!(out, "    Got:      {}", actual);
            }
            (None, None) => {
                let _ = writeln!(out, "    Got:      None");
            }
        }
    }

    let _ = writeln!(
        out,
        "\n{} {}/{} tests passed ({:.0}%)",
        if result.success { "✅" } else { "❌" },
        result.passed_count(),
        result.tests.len(),
        result.score_percent()
    );
    out
}

fn emit(result: &RunResult, json: bool) -> Result<bool> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", render_report(result));
    }
    Ok(result.success)
}

/// List categories and exercises from the catalog
pub fn list_exercises(config: &PlatformConfig) -> Result<()> {
    let catalog = ExerciseCatalog::load(&config.exercises_dir);

    if catalog.is_empty() {
        println!("No exercises found in {}", config.exercises_dir.display());
        return Ok(());
    }

    for category in catalog.categories() {
        println!("📚 {}", category.name);
        for exercise in &category.exercises {
            println!(
                "  {:<24} {:<40} {} test(s)",
                exercise.id,
                exercise.title,
                exercise.tests.len()
            );
        }
    }
    println!("\n✅ Total: {} exercise(s)", catalog.len());
    Ok(())
}

/// Grade a file against a catalog exercise
pub async fn run_exercise(
    config: &PlatformConfig,
    exercise_id: &str,
    code_path: &Path,
    json: bool,
) -> Result<bool> {
    let catalog = ExerciseCatalog::load(&config.exercises_dir);
    debug!(exercises = catalog.len(), dir = %config.exercises_dir.display(), "Catalog loaded");
    let exercise = catalog
        .get(exercise_id)
        .ok_or_else(|| anyhow::anyhow!("Exercise '{}' not found", exercise_id))?;
    let code = read_code(code_path)?;

    if !json {
        println!("🚀 {} ({} test(s))", exercise.title, exercise.tests.len());
    }

    let harness = Harness::new(&config.harness);
    let result = harness.run_exercise(exercise, &code).await;
    info!(exercise_id, success = result.success, score = result.score_percent(), "Exercise graded");
    emit(&result, json)
}

/// Grade a file against an ad hoc test list
pub async fn check(
    config: &PlatformConfig,
    code_path: &Path,
    tests_path: &Path,
    data_files: Vec<String>,
    entry_point: Option<&str>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<bool> {
    let code = read_code(code_path)?;
    let tests = load_tests(tests_path)?;

    let harness = Harness::new(&config.harness);
    let submission = Submission::new(code)
        .with_data_files(data_files)
        .with_entry_point(EntryPoint::from_declared(entry_point));
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| harness.default_timeout());

    info!(
        code = %code_path.display(),
        tests = tests.len(),
        timeout_ms = timeout.as_millis() as u64,
        "Checking submission"
    );
    let result = harness.run(&submission, &tests, timeout).await;
    emit(&result, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylab_common::types::TestOutcome;
    use serde_json::json;

    fn outcome(passed: bool, actual: Option<serde_json::Value>, error: Option<&str>) -> TestOutcome {
        TestOutcome {
            passed,
            input: vec![json!(2), json!(3)],
            expected: json!(5),
            actual,
            error: error.map(str::to_string),
            traceback: None,
            description: Some("sum".to_string()),
            hidden: false,
        }
    }

    #[test]
    fn test_report_for_mixed_results() {
        let result = RunResult::from_outcomes(vec![
            outcome(true, Some(json!(5)), None),
            outcome(false, Some(json!(6)), None),
            outcome(false, None, Some("division by zero")),
        ]);

        let report = render_report(&result);
        assert!(report.contains("✓ Test 1 sum"));
        assert!(report.contains("✗ Test 2 sum"));
        assert!(report.contains("Input:    [2,3]"));
        assert!(report.contains("Got:      6"));
        assert!(report.contains("Error:    division by zero"));
        assert!(report.contains("1/3 tests passed (33%)"));
    }

    #[test]
    fn test_report_for_harness_failure() {
        let result = RunResult::failure("execution failed", Some("SyntaxError: invalid syntax\n".into()));
        let report = render_report(&result);
        assert!(report.starts_with("❌ execution failed"));
        assert!(report.contains("SyntaxError: invalid syntax"));
    }

    #[test]
    fn test_load_tests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tests.json");
        fs::write(&path, r#"[{"input": [2, 3], "expected": 5, "hidden": true}]"#).unwrap();

        let tests = load_tests(&path).unwrap();
        assert_eq!(tests.len(), 1);
        assert!(tests[0].hidden);

        fs::write(&path, "[]").unwrap();
        assert!(load_tests(&path).is_err());
        fs::write(&path, "{").unwrap();
        assert!(load_tests(&path).is_err());
    }
}
