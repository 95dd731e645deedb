use super::{declares_type, quote_json_string, ArgumentList, CommandSpec, HarnessError, LanguageRuntime};
use crate::config::ToolchainConfig;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::Language;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

static METHOD_DEF: OnceLock<Regex> = OnceLock::new();
static TOP_LEVEL_DEF: OnceLock<Regex> = OnceLock::new();

fn method_def() -> &'static Regex {
    METHOD_DEF.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]+def\s+([A-Za-z_]\w*)\s*\(\s*self\b").expect("valid regex")
    })
}

fn top_level_def() -> &'static Regex {
    TOP_LEVEL_DEF.get_or_init(|| Regex::new(r"(?m)^def\s+([A-Za-z_]\w*)\s*\(").expect("valid regex"))
}

// Printed form: strings raw, everything else compact JSON. Tuples, sets and
// other iterables degrade to lists.
const EMIT_HELPER: &str = r#"
def __hirebench_default(value):
    try:
        return list(value)
    except TypeError:
        return str(value)


def __hirebench_emit(value):
    if isinstance(value, str):
        print(value)
    else:
        print(json.dumps(value, separators=(",", ":"), default=__hirebench_default))
"#;

#[derive(Debug, Default, Clone)]
pub struct PythonRuntime {
    toolchain: ToolchainConfig,
}

impl PythonRuntime {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn has_solution_class(source: &str) -> bool {
        declares_type(source, "class", "Solution")
    }
}

impl LanguageRuntime for PythonRuntime {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file_name(&self, _program: &str) -> String {
        "main.py".to_string()
    }

    fn detect_function_name(&self, source: &str) -> Option<String> {
        let public = |re: &Regex| {
            re.captures_iter(source)
                .map(|c| c[1].to_string())
                .find(|name| !name.starts_with('_'))
        };

        if Self::has_solution_class(source) {
            if let Some(name) = public(method_def()) {
                return Some(name);
            }
        }
        public(top_level_def())
    }

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError> {
        let mut program = String::from("import json\nimport sys\n\n");
        program.push_str(source);
        program.push_str("\n\n");
        program.push_str(EMIT_HELPER);
        program.push_str("\n\nif __name__ == \"__main__\":\n");

        let mut locals = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let local = arg.local_name(i);
            let encoded = quote_json_string(&arg.value.to_string());
            program.push_str(&format!("    {} = json.loads({})\n", local, encoded));
            locals.push(local);
        }

        let target = if Self::has_solution_class(source) && method_def().is_match(source) {
            format!("Solution().{}", function)
        } else {
            function.to_string()
        };

        program.push_str("    try:\n");
        program.push_str(&format!("        __result = {}({})\n", target, locals.join(", ")));
        program.push_str("    except BaseException as e:\n");
        program.push_str("        print(\"Error: \" + type(e).__name__ + \": \" + str(e), file=sys.stderr)\n");
        program.push_str("        sys.exit(1)\n");
        program.push_str("    __hirebench_emit(__result)\n");

        Ok(program)
    }

    fn compile_command(&self, _source_path: &Path, _limits: &ExecutionLimits) -> Option<CommandSpec> {
        None
    }

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec {
        CommandSpec::new(self.toolchain.launcher("python3"))
            .arg("-I")
            .arg("-B")
            .path_arg(source_path)
            .memory_limit(limits.memory_limit_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ArgumentList {
        ArgumentList::from_inputs(value.as_object().unwrap())
    }

    #[test]
    fn test_detects_top_level_function() {
        let source = "def _helper(x):\n    return x\n\ndef two_sum(nums, target):\n    return []\n";
        assert_eq!(PythonRuntime::default().detect_function_name(source), Some("two_sum".to_string()));
    }

    #[test]
    fn test_detects_solution_method() {
        let source = "class Solution:\n    def __init__(self):\n        pass\n\n    def twoSum(self, nums, target):\n        return []\n";
        assert_eq!(PythonRuntime::default().detect_function_name(source), Some("twoSum".to_string()));
    }

    #[test]
    fn test_nested_helper_not_detected() {
        let source = "def outer(x):\n    def inner(y):\n        return y\n    return inner(x)\n";
        assert_eq!(PythonRuntime::default().detect_function_name(source), Some("outer".to_string()));
    }

    #[test]
    fn test_harness_calls_function_in_order() {
        let program = PythonRuntime::default()
            .synthesize_harness(
                "def two_sum(nums, target):\n    return [0, 1]\n",
                "two_sum",
                &args(json!({"nums": [2, 7, 11, 15], "target": 9})),
            )
            .unwrap();

        assert!(program.contains("p_nums = json.loads(\"[2,7,11,15]\")"));
        assert!(program.contains("p_target = json.loads(\"9\")"));
        assert!(program.contains("__result = two_sum(p_nums, p_target)"));
        assert!(program.contains("sys.exit(1)"));
    }

    #[test]
    fn test_harness_uses_solution_instance() {
        let program = PythonRuntime::default()
            .synthesize_harness(
                "class Solution:\n    def isPalindrome(self, s):\n        return s == s[::-1]\n",
                "isPalindrome",
                &args(json!({"s": "racecar"})),
            )
            .unwrap();
        assert!(program.contains("Solution().isPalindrome(p_s)"));
    }

    #[test]
    fn test_string_input_is_escaped() {
        let program = PythonRuntime::default()
            .synthesize_harness(
                "def f(s):\n    return s\n",
                "f",
                &args(json!({"s": "\"); import os; (\""})),
            )
            .unwrap();
        // The payload stays inside one json.loads string literal
        assert!(program.contains(r#"p_s = json.loads("\"\\\"); import os; (\\\"\"")"#));
    }

    #[test]
    fn test_run_command() {
        let limits = ExecutionLimits::default();
        let spec = PythonRuntime::default().run_command(Path::new("/ws/main.py"), &limits);
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["-I", "-B", "/ws/main.py"]);
        assert_eq!(spec.memory_limit_bytes, Some(limits.memory_limit_bytes()));
        assert!(PythonRuntime::default().compile_command(Path::new("/ws/main.py"), &limits).is_none());
    }
}
