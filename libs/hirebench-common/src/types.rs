use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Languages a submission can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
    Rust,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
        Language::Rust,
    ];

    /// Parse a language identifier, accepting the usual aliases.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "cpp" | "c++" | "cxx" => Some(Language::Cpp),
            "rust" | "rs" => Some(Language::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
        };
        f.write_str(name)
    }
}

/// Ad-hoc execution request ("run" action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub source_code: String,
    pub language: Language,
    #[serde(default)]
    pub stdin: Option<String>,
}

/// One verification case. `inputs` keeps the order the caller supplied,
/// which is the positional order of the call arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub inputs: Map<String, Value>,
    pub expected_output: Value,
    #[serde(default)]
    pub hidden: bool,
}

/// Fallback callable names used when detection from source fails.
pub type FunctionNameMap = HashMap<Language, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SecurityViolation,
    CompileError,
    RuntimeError,
    Timeout,
    ComparisonMismatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SecurityViolation => "security violation",
            ErrorKind::CompileError => "compile error",
            ErrorKind::RuntimeError => "runtime error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ComparisonMismatch => "wrong answer",
        };
        f.write_str(name)
    }
}

/// Raw outcome of a single sandboxed program run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub has_error: bool,
    pub wall_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            has_error: true,
            error_kind: Some(kind),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub index: usize,
    pub hidden: bool,
    pub passed: bool,
    /// Parsed program output; always `None` for hidden cases.
    pub actual_output: Option<Value>,
    /// Always `None` for hidden cases.
    pub expected_output: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub hidden_passed: usize,
    pub hidden_total: usize,
    pub results: Vec<TestCaseResult>,
    pub all_passed: bool,
}

impl TestRunSummary {
    /// Build a summary from per-case results, deriving every counter.
    pub fn from_results(results: Vec<TestCaseResult>) -> Self {
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|r| r.passed).count();
        let hidden_total = results.iter().filter(|r| r.hidden).count();
        let hidden_passed = results.iter().filter(|r| r.hidden && r.passed).count();

        Self {
            total_tests,
            passed_tests,
            failed_tests: total_tests - passed_tests,
            hidden_passed,
            hidden_total,
            results,
            all_passed: passed_tests == total_tests,
        }
    }
}
