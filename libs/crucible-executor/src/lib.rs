//! Sandboxed multi-test code execution engine.
//!
//! Given a submission and an ordered list of test cases, runs the code
//! against each test in its own resource-limited subprocess and returns a
//! structured, sanitized verdict per test. The pipeline per test is:
//! validator -> wrapper synthesizer -> process engine -> evaluator, driven
//! by the orchestrator in [`executor`].

pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod validator;
pub mod wrapper;


pub use crucible_common::config::ExecutorConfig;
pub use crucible_common::types::{ExecutionRequest, ExecutionSummary, TestCase, TestOutcome};
pub use executor::CodeExecutor;
