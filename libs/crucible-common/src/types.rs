use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single test case from the problem catalog.
///
/// `input` maps parameter names to JSON values, `expected` is compared
/// against the submission's result with strict structural equality, and
/// `function_call` is the catalog-supplied invocation expression
/// (e.g. `"solve(**test_input)"`). The expression is semi-trusted and is
/// validated before it is ever embedded in generated source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    pub expected: Value,
    pub function_call: String,
}

/// A full execution request: one submission plus its ordered test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub test_cases: Vec<TestCase>,
    /// Non-empty requests injection of the data-structure helper library
    /// (linked-list / binary-tree node types and converters).
    #[serde(default)]
    pub helpers: Option<Vec<String>>,
}

/// The per-test verdict, one per requested test case, order preserved.
///
/// Every failure mode (validation, timeout, runtime error, crash,
/// malformed result) lands here as `passed: false` with a populated
/// `error` - the executor never raises for submission-caused failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// 1-based, stable even when trailing tests are skipped.
    pub test_num: usize,
    pub input: Value,
    pub expected: Value,
    pub actual: Option<Value>,
    pub passed: bool,
    pub error: Option<String>,
    pub runtime_ms: Option<f64>,
    pub stdout: String,
}

/// Aggregated result of one `run_tests` call.
///
/// Invariants: `passed + failed == results.len()`, and `results` has the
/// same length as the input test-case list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<TestOutcome>,
}
