//! Test-Suite Orchestrator - Public Entry Point
//!
//! **Responsibility:**
//! Coordinate validator, wrapper synthesizer, process engine, and evaluator
//! to produce one `ExecutionSummary` per call.
//!
//! **Orchestration Rules:**
//! 1. Gate on submission byte size before anything spawns
//! 2. Run tests strictly in order, one isolated subprocess each
//! 3. Bail out after enough consecutive Time Limit Exceeded outcomes,
//!    filling the remaining positions with skipped outcomes
//! 4. Convert every submission-caused failure into a failed outcome;
//!    never raise for them
//!
//! The consecutive-timeout counter is local to a single `run_tests` call -
//! nothing is shared across calls except read-only configuration.

use crucible_common::config::ExecutorConfig;
use crucible_common::types::{ExecutionRequest, ExecutionSummary, TestCase, TestOutcome};
use tracing::{debug, info, warn};

use crate::engine::{ProcessEngine, RunOutcome};
use crate::{evaluator, validator, wrapper};

/// Sandboxed multi-test executor. Holds only configuration; a single
/// instance may serve many concurrent `run_tests` calls.
#[derive(Debug, Clone)]
pub struct CodeExecutor {
    config: ExecutorConfig,
    engine: ProcessEngine,
}

impl CodeExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let engine = ProcessEngine::new(config.clone());
        Self { config, engine }
    }

    pub fn with_defaults() -> Self {
        Self::new(ExecutorConfig::default())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Convenience wrapper over [`run_tests`](Self::run_tests) for the
    /// request/summary boundary.
    pub async fn run_request(&self, request: &ExecutionRequest) -> ExecutionSummary {
        self.run_tests(
            &request.code,
            &request.test_cases,
            request.helpers.as_deref(),
        )
        .await
    }

    /// Run `code` against every test case in order and aggregate the
    /// verdicts. Always returns one outcome per requested test; skipped
    /// tests still produce a failed outcome with stable 1-based numbering.
    pub async fn run_tests(
        &self,
        code: &str,
        test_cases: &[TestCase],
        helpers: Option<&[String]>,
    ) -> ExecutionSummary {
        if code.len() > self.config.max_code_size {
            warn!(
                code_bytes = code.len(),
                max_bytes = self.config.max_code_size,
                "submission rejected before execution: over size ceiling"
            );
            let error = format!(
                "Code exceeds maximum size of {}KB",
                self.config.max_code_size / 1024
            );
            let results: Vec<TestOutcome> = test_cases
                .iter()
                .enumerate()
                .map(|(i, test)| failed_outcome(i + 1, test, error.clone()))
                .collect();
            return summarize(results);
        }

        let include_helpers = helpers.map_or(false, |h| !h.is_empty());
        let mut results: Vec<TestOutcome> = Vec::with_capacity(test_cases.len());
        let mut consecutive_tle: u32 = 0;

        for (i, test) in test_cases.iter().enumerate() {
            let outcome = self
                .run_single_test(code, test, i + 1, include_helpers)
                .await;
            debug!(
                test_num = outcome.test_num,
                passed = outcome.passed,
                error = outcome.error.as_deref().unwrap_or(""),
                "test evaluated"
            );

            let is_tle = outcome
                .error
                .as_deref()
                .map_or(false, |e| e.starts_with("Time Limit Exceeded"));
            consecutive_tle = if is_tle { consecutive_tle + 1 } else { 0 };
            results.push(outcome);

            if consecutive_tle >= self.config.max_consecutive_tle {
                warn!(
                    consecutive_tle,
                    completed = results.len(),
                    total = test_cases.len(),
                    "bailing out: remaining tests skipped"
                );
                let skipped_from = results.len();
                let error = format!(
                    "Skipped — {} consecutive Time Limit Exceeded",
                    self.config.max_consecutive_tle
                );
                for (j, test) in test_cases[skipped_from..].iter().enumerate() {
                    results.push(failed_outcome(skipped_from + j + 1, test, error.clone()));
                }
                break;
            }
        }

        let summary = summarize(results);
        info!(
            passed = summary.passed,
            failed = summary.failed,
            tests = summary.results.len(),
            "suite finished"
        );
        summary
    }

    /// Full per-test pipeline: validate, synthesize, run, evaluate.
    async fn run_single_test(
        &self,
        code: &str,
        test: &TestCase,
        test_num: usize,
        include_helpers: bool,
    ) -> TestOutcome {
        let function_call = match validator::validate(&test.function_call) {
            Ok(expr) => expr,
            Err(e) => {
                // Execution of this test never starts.
                return failed_outcome(test_num, test, e.to_string());
            }
        };

        let program = match wrapper::synthesize(
            code,
            function_call,
            &test.input,
            include_helpers,
            &self.config,
        ) {
            Ok(program) => program,
            Err(e) => return failed_outcome(test_num, test, format!("Execution error: {e:#}")),
        };

        match self.engine.run(&program.source).await {
            Ok(RunOutcome::TimedOut) => failed_outcome(
                test_num,
                test,
                format!("Time Limit Exceeded ({}s)", self.config.timeout_secs),
            ),
            Ok(RunOutcome::Completed {
                stdout,
                stderr,
                exit_code,
            }) => evaluator::evaluate_completed(
                &stdout, &stderr, exit_code, test, test_num, &program,
            ),
            Err(e) => failed_outcome(test_num, test, format!("Execution error: {e:#}")),
        }
    }
}

fn failed_outcome(test_num: usize, test: &TestCase, error: String) -> TestOutcome {
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

fn summarize(results: Vec<TestOutcome>) -> ExecutionSummary {
    let passed = results.iter().filter(|r| r.passed).count();
    ExecutionSummary {
        passed,
        failed: results.len() - passed,
        results,
    }
}
