//! Evaluator - Result Extraction and Scoring
//!
//! **Core Responsibility:**
//! Recover the structured result a harness smuggled through stderr and turn
//! it into a `TestOutcome`, distinguishing payloads from crashes and
//! malformed output.
//!
//! **Critical Properties:**
//! - Knows nothing about process spawning
//! - Pure functions: (raw streams, marker, offsets) -> outcome
//! - Strict structural equality between actual and expected, no numeric
//!   tolerance, no coercion
//! - Never leaks host filesystem layout: temp-file and interpreter paths
//!   are replaced before any diagnostic reaches the caller

use crucible_common::types::{TestCase, TestOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::wrapper::WrapperProgram;

static PY_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"File "(/[^"]*?/)?[^"]*\.py""#).expect("py-file regex is valid")
});

static ABS_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(/(?:[^\s,"':/]+/)+)([^\s,"':/]+)"#).expect("abs-path regex is valid")
});

static USER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"File "<user_code>", line (\d+)"#).expect("user-line regex is valid")
});

/// Locate the marker-delimited payload in stderr.
///
/// Two or more marker-delimited segments mean the first segment is the JSON
/// payload; it is removed from the returned diagnostic text. An unpaired
/// marker (e.g. the process died mid-write) is scrubbed but yields no
/// payload.
pub fn extract_payload(stderr: &str, marker: &str) -> (Option<String>, String) {
    if !stderr.contains(marker) {
        return (None, stderr.to_string());
    }
    let parts: Vec<&str> = stderr.split(marker).collect();
    if parts.len() >= 3 {
        let payload = parts[1].to_string();
        let wrapped = format!("{marker}{payload}{marker}");
        let remaining = stderr.replacen(&wrapped, "", 1);
        (Some(payload), remaining)
    } else {
        (None, stderr.replace(marker, ""))
    }
}

/// Strip host paths from diagnostic text and, for Python tracebacks, reduce
/// the noise to the final error line plus the submission-relative line
/// number (1-based after subtracting the generated prologue).
pub fn sanitize_stderr(stderr: &str, user_code_offset: usize, user_code_lines: usize) -> String {
    if stderr.trim().is_empty() {
        return String::new();
    }
    let sanitized = PY_FILE_RE.replace_all(stderr, r#"File "<user_code>""#);
    let sanitized = ABS_PATH_RE.replace_all(&sanitized, "<sandbox>/${2}");
    let trimmed = sanitized.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() > 1 && lines[0].trim_start().starts_with("Traceback") {
        let error_line = lines.last().map(|l| l.trim()).unwrap_or_default();
        for line in lines.iter().rev() {
            if let Some(caps) = USER_LINE_RE.captures(line) {
                let original: i64 = caps[1].parse().unwrap_or(0);
                let adjusted = original - user_code_offset as i64;
                if adjusted > 0 && adjusted <= user_code_lines as i64 {
                    return format!("{error_line} (line {adjusted})");
                }
            }
        }
        return error_line.to_string();
    }
    trimmed.to_string()
}

/// Interpret a completed run's streams as a `TestOutcome`.
pub fn evaluate_completed(
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
    test: &TestCase,
    test_num: usize,
    program: &WrapperProgram,
) -> TestOutcome {
    let (payload, remaining_stderr) = extract_payload(stderr, &program.marker);
    let diagnostics = sanitize_stderr(
        &remaining_stderr,
        program.user_code_offset,
        program.user_code_lines,
    );

    if exit_code != Some(0) && payload.is_none() {
        // Segfault-class failure or resource-limit kill with no payload.
        debug!(test_num, ?exit_code, "sandbox exited non-zero without a result payload");
        let error = if diagnostics.is_empty() {
            "Process exited with non-zero status".to_string()
        } else {
            diagnostics
        };
        let mut outcome = failure(test, test_num, error);
        outcome.stdout = stdout.trim().to_string();
        return outcome;
    }

    let Some(payload) = payload else {
        return failure(test, test_num, "No result received from execution".to_string());
    };

    let Ok(output) = serde_json::from_str::<Value>(&payload) else {
        return failure(test, test_num, "Failed to parse execution result".to_string());
    };

    if let Some(error) = output.get("error") {
        let mut outcome = failure(test, test_num, error.as_str().unwrap_or_default().to_string());
        outcome.stdout = payload_stdout(&output);
        return outcome;
    }

    let Some(actual) = output.get("result") else {
        return failure(test, test_num, "Failed to parse execution result".to_string());
    };

    let passed = *actual == test.expected;
    TestOutcome {
        test_num,
        input: test.input.clone(),
        expected: test.expected.clone(),
        actual: Some(actual.clone()),
        passed,
        error: None,
        runtime_ms: output.get("runtime_ms").and_then(Value::as_f64),
        stdout: payload_stdout(&output),
    }
}

fn payload_stdout(output: &Value) -> String {
    output
        .get("stdout")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn failure(test: &TestCase, test_num: usize, error: String) -> TestOutcome {
    TestOutcome {
        test_num,
        input: test.input.clone(),
        expected: test.expected.clone(),
        actual: None,
        passed: false,
        error: Some(error),
        runtime_ms: None,
        stdout: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARKER: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    fn test_case(expected: Value) -> TestCase {
        TestCase {
            input: json!({"a": 1, "b": 2}),
            expected,
            function_call: "add(**test_input)".to_string(),
        }
    }

    fn program() -> WrapperProgram {
        WrapperProgram {
            source: String::new(),
            user_code_offset: 30,
            user_code_lines: 2,
            marker: MARKER.to_string(),
        }
    }

    fn wrap(payload: &str) -> String {
        format!("{MARKER}{payload}{MARKER}")
    }

    #[test]
    fn payload_is_extracted_and_removed_from_diagnostics() {
        let stderr = format!("noise before {} noise after", wrap(r#"{"result": 3}"#));
        let (payload, remaining) = extract_payload(&stderr, MARKER);
        assert_eq!(payload.as_deref(), Some(r#"{"result": 3}"#));
        assert_eq!(remaining, "noise before  noise after");
    }

    #[test]
    fn unpaired_marker_yields_no_payload() {
        let stderr = format!("{MARKER}partial write");
        let (payload, remaining) = extract_payload(&stderr, MARKER);
        assert!(payload.is_none());
        assert_eq!(remaining, "partial write");
    }

    #[test]
    fn missing_marker_passes_stderr_through() {
        let (payload, remaining) = extract_payload("plain diagnostics", MARKER);
        assert!(payload.is_none());
        assert_eq!(remaining, "plain diagnostics");
    }

    #[test]
    fn successful_payload_sets_actual_and_runtime() {
        let stderr = wrap(r#"{"result": 3, "runtime_ms": 0.42, "stdout": "debug\n"}"#);
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(3)), 1, &program());
        assert!(outcome.passed);
        assert_eq!(outcome.actual, Some(json!(3)));
        assert_eq!(outcome.runtime_ms, Some(0.42));
        assert_eq!(outcome.stdout, "debug\n");
        assert!(outcome.error.is_none());
    }

    #[test]
    fn wrong_result_fails_without_error() {
        let stderr = wrap(r#"{"result": -1, "runtime_ms": 0.1, "stdout": ""}"#);
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(3)), 1, &program());
        assert!(!outcome.passed);
        assert_eq!(outcome.actual, Some(json!(-1)));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn comparison_is_strict_structural_equality() {
        // No numeric tolerance.
        let stderr = wrap(r#"{"result": 0.30000000000000004, "stdout": ""}"#);
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(0.3)), 1, &program());
        assert!(!outcome.passed);
        // Int vs float differ structurally.
        let stderr = wrap(r#"{"result": 3.0, "stdout": ""}"#);
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(3)), 1, &program());
        assert!(!outcome.passed);
        // Nested structures compare deeply.
        let stderr = wrap(r#"{"result": [[1, 2], [3]], "stdout": ""}"#);
        let outcome = evaluate_completed(
            "",
            &stderr,
            Some(0),
            &test_case(json!([[1, 2], [3]])),
            1,
            &program(),
        );
        assert!(outcome.passed);
    }

    #[test]
    fn error_payload_surfaces_message_and_stdout() {
        let stderr =
            wrap(r#"{"error": "division by zero (line 2)", "stdout": "before crash\n"}"#);
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(3)), 4, &program());
        assert!(!outcome.passed);
        assert_eq!(outcome.error.as_deref(), Some("division by zero (line 2)"));
        assert_eq!(outcome.stdout, "before crash\n");
        assert_eq!(outcome.test_num, 4);
        assert!(outcome.actual.is_none());
        assert!(outcome.runtime_ms.is_none());
    }

    #[test]
    fn unparseable_payload_reports_generic_error() {
        let stderr = wrap("{not json");
        let outcome =
            evaluate_completed("", &stderr, Some(0), &test_case(json!(3)), 1, &program());
        assert_eq!(outcome.error.as_deref(), Some("Failed to parse execution result"));
    }

    #[test]
    fn clean_exit_without_payload_reports_no_result() {
        let outcome = evaluate_completed("", "", Some(0), &test_case(json!(3)), 1, &program());
        assert_eq!(outcome.error.as_deref(), Some("No result received from execution"));
    }

    #[test]
    fn nonzero_exit_without_payload_uses_sanitized_stderr() {
        let stderr = "Traceback (most recent call last):\n  File \"/tmp/crucible-abc.py\", line 31, in <module>\n    boom\nMemoryError";
        let outcome = evaluate_completed("", stderr, Some(1), &test_case(json!(3)), 1, &program());
        let error = outcome.error.unwrap();
        assert!(error.starts_with("MemoryError"));
        assert!(!error.contains("/tmp/"), "host path leaked: {error}");
    }

    #[test]
    fn nonzero_exit_with_empty_stderr_reports_generic_message() {
        let outcome = evaluate_completed("", "", Some(137), &test_case(json!(3)), 1, &program());
        assert_eq!(outcome.error.as_deref(), Some("Process exited with non-zero status"));
    }

    #[test]
    fn sanitize_replaces_temp_paths() {
        let text = "  File \"/tmp/crucible-xyz123.py\", line 40, in <module>";
        let clean = sanitize_stderr(text, 0, 0);
        assert!(clean.contains(r#"File "<user_code>""#));
        assert!(!clean.contains("/tmp/"));
    }

    #[test]
    fn sanitize_collapses_absolute_paths() {
        let clean = sanitize_stderr("error in /usr/lib/python3.11/runpy module", 0, 0);
        assert!(clean.contains("<sandbox>/"));
        assert!(!clean.contains("/usr/lib/"));
    }

    #[test]
    fn traceback_reduced_to_final_line_with_adjusted_line_number() {
        let stderr = "Traceback (most recent call last):\n  File \"/tmp/crucible-x.py\", line 32, in <module>\n    raise ValueError(\"bad\")\nValueError: bad";
        // offset 30, 2 user lines: original line 32 maps to submission line 2
        let clean = sanitize_stderr(stderr, 30, 2);
        assert_eq!(clean, "ValueError: bad (line 2)");
    }

    #[test]
    fn traceback_frames_outside_submission_get_no_line_annotation() {
        let stderr = "Traceback (most recent call last):\n  File \"/tmp/crucible-x.py\", line 5, in <module>\n    boom\nRuntimeError: boom";
        // line 5 is inside the generated prologue, not the submission
        let clean = sanitize_stderr(stderr, 30, 2);
        assert_eq!(clean, "RuntimeError: boom");
    }
}
