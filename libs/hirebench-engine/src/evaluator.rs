/// Output Comparator - Language-Agnostic Correctness Logic
///
/// **Core Responsibility:**
/// Turn printed program output back into a value and decide whether it
/// matches the expected value.
///
/// **Critical Properties:**
/// - Knows nothing about processes or workspaces
/// - Pure function: (stdout, expected) → verdict
///
/// **Parsing Order for Actual Output:**
/// 1. Trim surrounding whitespace
/// 2. JSON
/// 3. The runtime's own printed form (e.g. Rust chars)
/// 4. A bracketed list with bare or quoted items
/// 5. The raw text as a string
///
/// **Equality Rules:**
/// - Integers compare exactly
/// - Any float on either side compares with a relative tolerance of 1e-9
/// - Arrays compare element-wise, in order
/// - Objects compare key-wise, ignoring key order
/// - A non-string expected value never matches unparseable text

use crate::harness::LanguageRuntime;
use hirebench_common::types::{ErrorKind, ExecutionResult, TestCase, TestCaseResult};
use serde_json::{Number, Value};

pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Normalize output string for comparison
///
/// Trims leading and trailing whitespace, which also removes trailing
/// newline differences (\n vs \r\n).
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Parse printed output into a value. Never fails: text that is not
/// structured becomes a JSON string.
pub fn parse_actual(stdout: &str, runtime: Option<&dyn LanguageRuntime>) -> Value {
    parse_structured(normalize_output(stdout), runtime)
        .unwrap_or_else(|| Value::String(normalize_output(stdout).to_string()))
}

fn parse_structured(text: &str, runtime: Option<&dyn LanguageRuntime>) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    if let Some(value) = runtime.and_then(|r| r.parse_output(text)) {
        return Some(value);
    }
    parse_bracket_list(text)
}

/// Expected values given as strings that hold structured text (for example
/// `"[0, 1]"`) are compared as the structure they describe.
pub fn normalize_expected(expected: &Value) -> Value {
    match expected {
        Value::String(s) => match parse_structured(s.trim(), None) {
            Some(Value::String(_)) | None => expected.clone(),
            Some(parsed) => parsed,
        },
        other => other.clone(),
    }
}

/// `[a, b, "c"]` style lists whose items are not all valid JSON, as printed
/// by `Arrays.toString` and similar.
pub fn parse_bracket_list(text: &str) -> Option<Value> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Value::Array(Vec::new()));
    }

    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                items.push(parse_list_item(&inner[start..i])?);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }
    items.push(parse_list_item(&inner[start..])?);

    Some(Value::Array(items))
}

fn parse_list_item(raw: &str) -> Option<Value> {
    let item = raw.trim();
    if item.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(item) {
        return Some(value);
    }
    if item.starts_with('[') {
        return parse_bracket_list(item);
    }
    if item.len() >= 2 && item.starts_with('\'') && item.ends_with('\'') {
        return Some(Value::String(item[1..item.len() - 1].to_string()));
    }
    // Bare words, as printed by Arrays.toString(String[])
    Some(Value::String(item.to_string()))
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if a.is_f64() || b.is_f64() {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => floats_equal(x, y),
            _ => false,
        }
    } else if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        x == y
    } else if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        x == y
    } else {
        false
    }
}

fn floats_equal(x: f64, y: f64) -> bool {
    if x == y {
        return true;
    }
    let scale = x.abs().max(y.abs()).max(1.0);
    (x - y).abs() <= FLOAT_TOLERANCE * scale
}

/// Structural equality with numeric tolerance.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map_or(false, |y| values_equal(x, y)))
        }
        _ => actual == expected,
    }
}

/// Compare printed output against the expected value.
pub fn outputs_match(stdout: &str, expected: &Value, runtime: Option<&dyn LanguageRuntime>) -> bool {
    let expected = normalize_expected(expected);
    let text = normalize_output(stdout);

    match parse_structured(text, runtime) {
        Some(actual) => {
            values_equal(&actual, &expected)
                // `"abc"` printed with quotes still matches expected "abc"
                || matches!(&expected, Value::String(s) if s == text)
        }
        // Unstructured text only ever matches a string
        None => matches!(&expected, Value::String(s) if s.trim() == text),
    }
}

/// Evaluate a single test case execution output
///
/// Priority:
/// 1. Execution errors (compile, runtime, timeout) fail the case as-is
/// 2. Otherwise the output is compared with the expected value
pub fn evaluate_case(
    index: usize,
    test_case: &TestCase,
    execution: &ExecutionResult,
    runtime: Option<&dyn LanguageRuntime>,
) -> TestCaseResult {
    let actual = parse_actual(&execution.stdout, runtime);

    let (passed, error, error_kind) = if execution.has_error {
        let kind = execution.error_kind.unwrap_or(ErrorKind::RuntimeError);
        (false, Some(execution.stderr.trim().to_string()), Some(kind))
    } else if outputs_match(&execution.stdout, &test_case.expected_output, runtime) {
        (true, None, None)
    } else {
        (
            false,
            Some("Output does not match expected value".to_string()),
            Some(ErrorKind::ComparisonMismatch),
        )
    };

    let result = TestCaseResult {
        index,
        hidden: test_case.hidden,
        passed,
        actual_output: Some(actual),
        expected_output: Some(test_case.expected_output.clone()),
        error,
        error_kind,
        execution_time_ms: execution.wall_time_ms,
    };

    if test_case.hidden {
        redact(result)
    } else {
        result
    }
}

/// Strip everything a hidden case could leak. Pass/fail, the error kind
/// and timing survive.
pub fn redact(mut result: TestCaseResult) -> TestCaseResult {
    result.actual_output = None;
    result.expected_output = None;
    result.error = result
        .error_kind
        .filter(|_| !result.passed)
        .map(|kind| format!("Hidden test case failed: {}", kind));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::RustRuntime;
    use serde_json::json;

    fn case(expected: Value, hidden: bool) -> TestCase {
        TestCase {
            inputs: serde_json::Map::new(),
            expected_output: expected,
            hidden,
        }
    }

    fn ok(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            wall_time_ms: 12,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("  hello  \n"), "hello");
        assert_eq!(normalize_output("[0,1]\r\n"), "[0,1]");
    }

    #[test]
    fn test_json_outputs_match() {
        assert!(outputs_match("[0,1]\n", &json!([0, 1]), None));
        assert!(outputs_match("[0, 1]", &json!([0, 1]), None));
        assert!(!outputs_match("[1,0]", &json!([0, 1]), None));
        assert!(outputs_match("true", &json!(true), None));
        assert!(outputs_match("{\"b\":2,\"a\":1}", &json!({"a": 1, "b": 2}), None));
    }

    #[test]
    fn test_float_tolerance() {
        assert!(outputs_match("0.30000000000000004", &json!(0.3), None));
        assert!(outputs_match("2", &json!(2.0), None));
        assert!(outputs_match("1e-12", &json!(0.0), None));
        assert!(!outputs_match("0.3001", &json!(0.3), None));
        assert!(!outputs_match("3", &json!(4), None));
    }

    #[test]
    fn test_string_outputs() {
        assert!(outputs_match("racecar\n", &json!("racecar"), None));
        assert!(outputs_match("\"racecar\"", &json!("racecar"), None));
        assert!(outputs_match("hello world", &json!("hello world"), None));
        assert!(!outputs_match("Hello", &json!("hello"), None));
    }

    #[test]
    fn test_expected_string_holding_structure() {
        assert!(outputs_match("[0,1]", &json!("[0, 1]"), None));
        assert!(outputs_match("9", &json!("9"), None));
    }

    #[test]
    fn test_unstructured_text_never_matches_structure() {
        assert!(!outputs_match("Traceback (most recent call last)", &json!([0, 1]), None));
        assert!(!outputs_match("", &json!(0), None));
    }

    #[test]
    fn test_bracket_list_parsing() {
        assert_eq!(parse_bracket_list("[a, b, c]"), Some(json!(["a", "b", "c"])));
        assert_eq!(parse_bracket_list("[[1, 2], [3]]"), Some(json!([[1, 2], [3]])));
        assert_eq!(parse_bracket_list("['x', \"y,z\"]"), Some(json!(["x", "y,z"])));
        assert_eq!(parse_bracket_list("[]"), Some(json!([])));
        assert_eq!(parse_bracket_list("[1, 2"), None);
        assert_eq!(parse_bracket_list("[1,,2]"), None);
        assert!(outputs_match("[eat, tea]", &json!(["eat", "tea"]), None));
    }

    #[test]
    fn test_runtime_specific_parsing() {
        let runtime = RustRuntime::default();
        assert!(outputs_match("['a', 'b']", &json!(["a", "b"]), Some(&runtime)));
        assert_eq!(parse_actual("'z'", Some(&runtime)), json!("z"));
    }

    #[test]
    fn test_evaluate_passing_case() {
        let result = evaluate_case(0, &case(json!([0, 1]), false), &ok("[0,1]\n"), None);
        assert!(result.passed);
        assert_eq!(result.actual_output, Some(json!([0, 1])));
        assert_eq!(result.expected_output, Some(json!([0, 1])));
        assert_eq!(result.error, None);
        assert_eq!(result.execution_time_ms, 12);
    }

    #[test]
    fn test_evaluate_mismatch() {
        let result = evaluate_case(1, &case(json!([0, 1]), false), &ok("[1,2]"), None);
        assert!(!result.passed);
        assert_eq!(result.error_kind, Some(ErrorKind::ComparisonMismatch));
        assert_eq!(result.actual_output, Some(json!([1, 2])));
    }

    #[test]
    fn test_evaluate_execution_error_keeps_kind() {
        let execution = ExecutionResult::failure(ErrorKind::Timeout, "[Execution timed out after 5000ms]");
        let result = evaluate_case(0, &case(json!(1), false), &execution, None);
        assert!(!result.passed);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.error.as_deref(), Some("[Execution timed out after 5000ms]"));
    }

    #[test]
    fn test_hidden_case_is_redacted() {
        let failed = evaluate_case(2, &case(json!("secret"), true), &ok("leak"), None);
        assert!(!failed.passed);
        assert!(failed.hidden);
        assert_eq!(failed.actual_output, None);
        assert_eq!(failed.expected_output, None);
        assert_eq!(failed.error.as_deref(), Some("Hidden test case failed: wrong answer"));
        assert_eq!(failed.error_kind, Some(ErrorKind::ComparisonMismatch));

        let passed = evaluate_case(3, &case(json!("secret"), true), &ok("secret"), None);
        assert!(passed.passed);
        assert_eq!(passed.actual_output, None);
        assert_eq!(passed.error, None);
    }
}
