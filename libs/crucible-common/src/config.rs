// Executor configuration: resource ceilings and timeouts shared by the
// wrapper synthesizer and the process engine.
use serde::{Deserialize, Serialize};

/// Maximum submission size in bytes (50 KB).
pub const MAX_CODE_SIZE: usize = 50 * 1024;

/// Memory ceiling the sandboxed process imposes on itself (512 MB).
pub const MEMORY_LIMIT_BYTES: u64 = 512 * 1024 * 1024;

/// CPU-time ceiling in seconds, independent of the wall-clock timeout.
pub const CPU_TIME_LIMIT_SECONDS: u64 = 10;

/// Output file-size ceiling (1 MB) to bound disk-write abuse.
pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

/// Configuration for one `CodeExecutor`. Read-only for the lifetime of the
/// executor; nothing else is shared across `run_tests` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-test wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Submission byte ceiling; larger code is rejected before any spawn.
    pub max_code_size: usize,
    pub memory_limit_bytes: u64,
    pub cpu_time_limit_secs: u64,
    pub max_file_size_bytes: u64,
    /// Consecutive Time Limit Exceeded outcomes before the rest of the
    /// suite is skipped.
    pub max_consecutive_tle: u32,
    /// Grace period in seconds to wait for a killed process to be reaped.
    pub kill_wait_secs: u64,
    /// Interpreter used to run synthesized programs.
    pub python_bin: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_code_size: MAX_CODE_SIZE,
            memory_limit_bytes: MEMORY_LIMIT_BYTES,
            cpu_time_limit_secs: CPU_TIME_LIMIT_SECONDS,
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
            max_consecutive_tle: 3,
            kill_wait_secs: 3,
            python_bin: "python3".to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Defaults with the given per-test timeout.
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment:
    /// `EXECUTOR_TIMEOUT_SECS` and `EXECUTOR_PYTHON_BIN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("EXECUTOR_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.timeout_secs = secs;
            }
        }
        if let Ok(bin) = std::env::var("EXECUTOR_PYTHON_BIN") {
            if !bin.is_empty() {
                config.python_bin = bin;
            }
        }
        config
    }
}
