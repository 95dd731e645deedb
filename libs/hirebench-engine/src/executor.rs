/// Test Orchestrator - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate validation, harness generation, sandboxed execution and
/// comparison to produce a `TestRunSummary`.
///
/// **Architecture:**
/// 1. SecurityValidator screens the candidate source once (security.rs)
/// 2. The language runtime builds one harness per case (harness/)
/// 3. The sandbox compiles and runs each harness (engine.rs)
/// 4. The comparator judges each output (evaluator.rs)
///
/// Cases run sequentially. A failing case never stops the ones after it.
/// This module is the glue layer - it knows nothing about:
/// - How code executes (sandbox's job)
/// - How outputs compare (comparator's job)

use crate::config::LanguageConfigManager;
use crate::engine::{Sandbox, SandboxExecutor};
use crate::evaluator::{evaluate_case, redact};
use crate::harness::generate_harness;
use crate::registry::LanguageRegistry;
use crate::security::SecurityValidator;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::{
    ErrorKind, ExecutionResult, FunctionNameMap, Language, SubmissionRequest, TestCase, TestCaseResult,
    TestRunSummary,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct TestOrchestrator<S: Sandbox = SandboxExecutor> {
    registry: Arc<LanguageRegistry>,
    sandbox: S,
    validator: SecurityValidator,
}

/// The production engine.
pub type Engine = TestOrchestrator<SandboxExecutor>;

impl TestOrchestrator<SandboxExecutor> {
    pub fn new(limits: ExecutionLimits) -> Self {
        let validator = SecurityValidator::new(limits.max_source_bytes);
        Self {
            registry: Arc::new(LanguageRegistry::with_defaults()),
            sandbox: SandboxExecutor::new(limits),
            validator,
        }
    }

    /// Engine restricted to the configured languages, with their memory
    /// overrides applied.
    pub fn from_config(limits: ExecutionLimits, config: &LanguageConfigManager) -> Self {
        let validator = SecurityValidator::new(limits.max_source_bytes);
        Self {
            registry: Arc::new(LanguageRegistry::from_config(config)),
            sandbox: SandboxExecutor::new(limits).with_language_config(config),
            validator,
        }
    }
}

impl<S: Sandbox> TestOrchestrator<S> {
    pub fn with_sandbox(registry: Arc<LanguageRegistry>, sandbox: S, validator: SecurityValidator) -> Self {
        Self {
            registry,
            sandbox,
            validator,
        }
    }

    /// Run every test case against `source`.
    ///
    /// Rejected source fails every case with `SecurityViolation` without
    /// starting a single process.
    #[instrument(skip_all, fields(language = %language, cases = test_cases.len()))]
    pub async fn run_tests(
        &self,
        source: &str,
        language: Language,
        test_cases: &[TestCase],
        function_map: &FunctionNameMap,
    ) -> TestRunSummary {
        let verdict = self.validator.validate(source, language);
        if !verdict.safe {
            let reason = verdict.reason.unwrap_or_else(|| "Source rejected".to_string());
            warn!("Submission rejected: {}", reason);
            return fail_all(test_cases, ErrorKind::SecurityViolation, &reason);
        }

        let Some(runtime) = self.registry.get(language) else {
            warn!(supported = ?self.registry.languages(), "No runtime registered");
            return fail_all(
                test_cases,
                ErrorKind::RuntimeError,
                &format!("Language not supported: {}", language),
            );
        };

        info!("Running test cases");
        let mut results = Vec::with_capacity(test_cases.len());

        for (index, test_case) in test_cases.iter().enumerate() {
            let result = match generate_harness(runtime, source, test_case, function_map) {
                Ok(program) => {
                    let execution = self.sandbox.compile_and_run(&program, runtime, None).await;
                    evaluate_case(index, test_case, &execution, Some(runtime))
                }
                Err(e) => {
                    debug!(test_index = index, "Harness generation failed: {}", e);
                    let execution = ExecutionResult::failure(ErrorKind::CompileError, e.to_string());
                    evaluate_case(index, test_case, &execution, Some(runtime))
                }
            };

            debug!(
                test_index = index,
                passed = result.passed,
                error_kind = ?result.error_kind,
                execution_ms = result.execution_time_ms,
                "Test case finished"
            );
            results.push(result);
        }

        let summary = TestRunSummary::from_results(results);
        info!(
            passed = summary.passed_tests,
            total = summary.total_tests,
            all_passed = summary.all_passed,
            "Test run complete"
        );
        summary
    }

    /// Run `source` as a complete program with optional stdin.
    #[instrument(skip_all, fields(language = %language))]
    pub async fn execute(&self, source: &str, language: Language, stdin: Option<&str>) -> ExecutionResult {
        let verdict = self.validator.validate(source, language);
        if !verdict.safe {
            let reason = verdict.reason.unwrap_or_else(|| "Source rejected".to_string());
            warn!("Submission rejected: {}", reason);
            return ExecutionResult::failure(ErrorKind::SecurityViolation, reason);
        }

        let Some(runtime) = self.registry.get(language) else {
            return ExecutionResult::failure(
                ErrorKind::RuntimeError,
                format!("Language not supported: {}", language),
            );
        };

        self.sandbox.compile_and_run(source, runtime, stdin).await
    }

    pub async fn execute_request(&self, request: &SubmissionRequest) -> ExecutionResult {
        self.execute(&request.source_code, request.language, request.stdin.as_deref())
            .await
    }
}

/// Fail every case with the same error. The run never counts as passed,
/// even when there are no cases.
fn fail_all(test_cases: &[TestCase], kind: ErrorKind, message: &str) -> TestRunSummary {
    let results = test_cases
        .iter()
        .enumerate()
        .map(|(index, test_case)| {
            let result = TestCaseResult {
                index,
                hidden: test_case.hidden,
                passed: false,
                actual_output: None,
                expected_output: Some(test_case.expected_output.clone()),
                error: Some(message.to_string()),
                error_kind: Some(kind),
                execution_time_ms: 0,
            };
            if test_case.hidden {
                redact(result)
            } else {
                result
            }
        })
        .collect();

    let mut summary = TestRunSummary::from_results(results);
    summary.all_passed = false;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::LanguageRuntime;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sandbox double that replays scripted results and counts spawns.
    #[derive(Default)]
    struct ScriptedSandbox {
        spawns: AtomicUsize,
        script: Mutex<Vec<ExecutionResult>>,
        programs: Mutex<Vec<String>>,
        stdins: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSandbox {
        fn with_script(script: Vec<ExecutionResult>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Sandbox for Arc<ScriptedSandbox> {
        async fn compile_and_run(
            &self,
            program: &str,
            _runtime: &dyn LanguageRuntime,
            stdin: Option<&str>,
        ) -> ExecutionResult {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            self.programs.lock().unwrap().push(program.to_string());
            self.stdins.lock().unwrap().push(stdin.map(str::to_string));
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                ExecutionResult::default()
            } else {
                script.remove(0)
            }
        }
    }

    fn ok(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            wall_time_ms: 5,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn orchestrator(sandbox: Arc<ScriptedSandbox>) -> TestOrchestrator<Arc<ScriptedSandbox>> {
        TestOrchestrator::with_sandbox(
            Arc::new(LanguageRegistry::with_defaults()),
            sandbox,
            SecurityValidator::new(ExecutionLimits::default().max_source_bytes),
        )
    }

    fn case(inputs: Value, expected: Value, hidden: bool) -> TestCase {
        TestCase {
            inputs: inputs.as_object().cloned().unwrap(),
            expected_output: expected,
            hidden,
        }
    }

    const TWO_SUM: &str = "def two_sum(nums, target):\n    seen = {}\n    for i, n in enumerate(nums):\n        if target - n in seen:\n            return [seen[target - n], i]\n        seen[n] = i\n    return []\n";

    #[tokio::test]
    async fn test_rejected_source_spawns_nothing() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        let engine = orchestrator(sandbox.clone());
        let cases = vec![
            case(json!({"x": 1}), json!(1), false),
            case(json!({"x": 2}), json!(2), true),
        ];

        let summary = engine
            .run_tests("import os\ndef f(x):\n    return x\n", Language::Python, &cases, &FunctionNameMap::new())
            .await;

        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 0);
        assert_eq!(summary.total_tests, 2);
        assert_eq!(summary.passed_tests, 0);
        assert!(!summary.all_passed);
        for result in &summary.results {
            assert_eq!(result.error_kind, Some(ErrorKind::SecurityViolation));
        }
        assert!(summary.results[0].error.as_deref().unwrap().contains("Operating system"));
        assert_eq!(
            summary.results[1].error.as_deref(),
            Some("Hidden test case failed: security violation")
        );
        assert_eq!(summary.results[1].expected_output, None);
    }

    #[tokio::test]
    async fn test_rejected_source_without_cases_fails() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        let engine = orchestrator(sandbox.clone());

        let summary = engine
            .run_tests("import os
def f(x):
    return x
", Language::Python, &[], &FunctionNameMap::new())
            .await;

        assert_eq!(summary.total_tests, 0);
        assert!(!summary.all_passed);
        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_language_without_cases_fails() {
        let engine = TestOrchestrator::with_sandbox(
            Arc::new(LanguageRegistry::empty()),
            Arc::new(ScriptedSandbox::default()),
            SecurityValidator::new(1024),
        );

        let summary = engine
            .run_tests("def f(x):
    return x
", Language::Python, &[], &FunctionNameMap::new())
            .await;
        assert!(!summary.all_passed);
    }

    #[tokio::test]
    async fn test_two_sum_summary() {
        let sandbox = Arc::new(ScriptedSandbox::with_script(vec![ok("[0,1]\n"), ok("[1,2]\n")]));
        let engine = orchestrator(sandbox.clone());
        let cases = vec![
            case(json!({"nums": [2, 7, 11, 15], "target": 9}), json!([0, 1]), false),
            case(json!({"nums": [3, 2, 4], "target": 6}), json!([1, 2]), true),
        ];

        let summary = engine
            .run_tests(TWO_SUM, Language::Python, &cases, &FunctionNameMap::new())
            .await;

        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 2);
        assert!(summary.all_passed);
        assert_eq!(summary.hidden_total, 1);
        assert_eq!(summary.hidden_passed, 1);
        assert_eq!(summary.results[1].actual_output, None);

        let programs = sandbox.programs.lock().unwrap();
        assert!(programs[0].contains("two_sum(p_nums, p_target)"));
        assert!(programs[1].contains("json.loads(\"[3,2,4]\")"));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_later_cases() {
        let sandbox = Arc::new(ScriptedSandbox::with_script(vec![
            ExecutionResult::failure(ErrorKind::Timeout, "[Execution timed out after 5000ms]"),
            ExecutionResult::failure(ErrorKind::RuntimeError, "Error: ZeroDivisionError: division by zero"),
            ok("[0,1]"),
        ]));
        let engine = orchestrator(sandbox.clone());
        let cases = vec![
            case(json!({"nums": [1], "target": 1}), json!([]), false),
            case(json!({"nums": [1], "target": 1}), json!([]), false),
            case(json!({"nums": [2, 7], "target": 9}), json!([0, 1]), false),
        ];

        let summary = engine
            .run_tests(TWO_SUM, Language::Python, &cases, &FunctionNameMap::new())
            .await;

        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 3);
        assert_eq!(summary.results[0].error_kind, Some(ErrorKind::Timeout));
        assert_eq!(summary.results[1].error_kind, Some(ErrorKind::RuntimeError));
        assert!(summary.results[2].passed);
        assert_eq!(summary.passed_tests, 1);
        assert_eq!(summary.failed_tests, 2);
    }

    #[tokio::test]
    async fn test_harness_failure_is_compile_error() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        let engine = orchestrator(sandbox.clone());
        let cases = vec![case(json!({"x": 1}), json!(1), false)];

        let summary = engine
            .run_tests("x = 1\n", Language::Python, &cases, &FunctionNameMap::new())
            .await;

        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 0);
        assert_eq!(summary.results[0].error_kind, Some(ErrorKind::CompileError));
    }

    #[tokio::test]
    async fn test_empty_case_list() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        let engine = orchestrator(sandbox.clone());
        let summary = engine
            .run_tests(TWO_SUM, Language::Python, &[], &FunctionNameMap::new())
            .await;

        assert_eq!(summary.total_tests, 0);
        assert!(summary.all_passed);
        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let script = || vec![ok("[0,1]"), ok("[9,9]")];
        let cases = vec![
            case(json!({"nums": [2, 7], "target": 9}), json!([0, 1]), false),
            case(json!({"nums": [3, 3], "target": 6}), json!([0, 1]), true),
        ];

        let first = orchestrator(Arc::new(ScriptedSandbox::with_script(script())))
            .run_tests(TWO_SUM, Language::Python, &cases, &FunctionNameMap::new())
            .await;
        let second = orchestrator(Arc::new(ScriptedSandbox::with_script(script())))
            .run_tests(TWO_SUM, Language::Python, &cases, &FunctionNameMap::new())
            .await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unregistered_language() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        let engine = TestOrchestrator::with_sandbox(
            Arc::new(LanguageRegistry::empty()),
            sandbox.clone(),
            SecurityValidator::new(1024),
        );
        let cases = vec![case(json!({"x": 1}), json!(1), false)];

        let summary = engine
            .run_tests("def f(x):\n    return x\n", Language::Python, &cases, &FunctionNameMap::new())
            .await;
        assert_eq!(summary.results[0].error_kind, Some(ErrorKind::RuntimeError));

        let result = engine.execute("print(1)", Language::Python, None).await;
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_passes_source_and_checks_security() {
        let sandbox = Arc::new(ScriptedSandbox::with_script(vec![ok("hi\n")]));
        let engine = orchestrator(sandbox.clone());

        let result = engine.execute("print('hi')", Language::Python, None).await;
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(sandbox.programs.lock().unwrap()[0], "print('hi')");

        let rejected = engine
            .execute("import subprocess\nsubprocess.run(['ls'])", Language::Python, None)
            .await;
        assert_eq!(rejected.error_kind, Some(ErrorKind::SecurityViolation));
        assert_eq!(sandbox.spawns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_request_forwards_stdin() {
        let sandbox = Arc::new(ScriptedSandbox::with_script(vec![ok("42\n")]));
        let engine = orchestrator(sandbox.clone());
        let request: SubmissionRequest = serde_json::from_value(json!({
            "source_code": "print(int(input()) * 2)",
            "language": "python",
            "stdin": "21\n"
        }))
        .unwrap();

        let result = engine.execute_request(&request).await;
        assert_eq!(result.stdout, "42\n");
        assert_eq!(sandbox.programs.lock().unwrap()[0], "print(int(input()) * 2)");
        assert_eq!(sandbox.stdins.lock().unwrap()[0].as_deref(), Some("21\n"));
    }
}
