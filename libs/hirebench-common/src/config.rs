// Execution limits shared by the engine and its callers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 512 * 1024;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 100 * 1024;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub execution_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    /// Cap applied to stdout and stderr independently.
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub memory_limit_mb: u64,
    /// Extra time allowed after a forced kill for pipes to drain.
    pub kill_grace_ms: u64,
    /// Parent directory for per-run workspaces.
    pub workspace_root: PathBuf,
    /// The only PATH a sandboxed child sees.
    pub sandbox_path: String,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            workspace_root: std::env::temp_dir(),
            sandbox_path: DEFAULT_SANDBOX_PATH.to_string(),
        }
    }
}

impl ExecutionLimits {
    /// Defaults overridden by `HIREBENCH_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut limits = Self::default();

        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = number("HIREBENCH_EXEC_TIMEOUT_MS") {
            limits.execution_timeout_ms = v;
        }
        if let Some(v) = number("HIREBENCH_COMPILE_TIMEOUT_MS") {
            limits.compile_timeout_ms = v;
        }
        if let Some(v) = number("HIREBENCH_MAX_OUTPUT_BYTES") {
            limits.max_output_bytes = v as usize;
        }
        if let Some(v) = number("HIREBENCH_MAX_SOURCE_BYTES") {
            limits.max_source_bytes = v as usize;
        }
        if let Some(v) = number("HIREBENCH_MEMORY_LIMIT_MB") {
            limits.memory_limit_mb = v;
        }
        if let Some(v) = number("HIREBENCH_KILL_GRACE_MS") {
            limits.kill_grace_ms = v;
        }
        if let Some(root) = lookup("HIREBENCH_WORKSPACE_ROOT").filter(|v| !v.is_empty()) {
            limits.workspace_root = PathBuf::from(root);
        }
        if let Some(path) = lookup("HIREBENCH_SANDBOX_PATH").filter(|v| !v.is_empty()) {
            limits.sandbox_path = path;
        }

        limits
    }

    pub fn with_execution_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.execution_timeout_ms = timeout_ms;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.execution_timeout_ms, 5000);
        assert_eq!(limits.compile_timeout_ms, 10000);
        assert_eq!(limits.max_output_bytes, 524288);
        assert_eq!(limits.max_source_bytes, 102400);
        assert_eq!(limits.memory_limit_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn test_memory_limit_bytes_saturates() {
        let limits = ExecutionLimits {
            memory_limit_mb: u64::MAX / 2,
            ..ExecutionLimits::default()
        };
        assert_eq!(limits.memory_limit_bytes(), u64::MAX);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HIREBENCH_EXEC_TIMEOUT_MS", "2000"),
            ("HIREBENCH_MAX_OUTPUT_BYTES", "1024"),
            ("HIREBENCH_MEMORY_LIMIT_MB", "not-a-number"),
            ("HIREBENCH_WORKSPACE_ROOT", "/var/tmp/hb"),
        ]
        .into_iter()
        .collect();

        let limits = ExecutionLimits::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(limits.execution_timeout_ms, 2000);
        assert_eq!(limits.max_output_bytes, 1024);
        assert_eq!(limits.memory_limit_mb, DEFAULT_MEMORY_LIMIT_MB);
        assert_eq!(limits.workspace_root, PathBuf::from("/var/tmp/hb"));
        assert_eq!(limits.compile_timeout_ms, DEFAULT_COMPILE_TIMEOUT_MS);
    }
}
