use super::{declares_type, ArgumentList, CommandSpec, HarnessError, LanguageRuntime};
use crate::config::ToolchainConfig;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::Language;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

static FUNCTION_DECL: OnceLock<Regex> = OnceLock::new();
static CLASS_METHOD: OnceLock<Regex> = OnceLock::new();

fn function_decl() -> &'static Regex {
    FUNCTION_DECL.get_or_init(|| {
        Regex::new(
            r"(?m)^(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(|^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)",
        )
        .expect("valid regex")
    })
}

fn class_method() -> &'static Regex {
    CLASS_METHOD.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]+(?:async\s+)?([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*\{").expect("valid regex")
    })
}

const CONTROL_WORDS: [&str; 6] = ["constructor", "if", "for", "while", "switch", "catch"];

const EMIT_HELPER: &str = r#"
function __hirebenchEmit(value) {
    if (typeof value === "string") {
        console.log(value);
    } else if (value === undefined) {
        console.log("null");
    } else {
        console.log(JSON.stringify(value));
    }
}
"#;

#[derive(Debug, Default, Clone)]
pub struct JavaScriptRuntime {
    toolchain: ToolchainConfig,
}

impl JavaScriptRuntime {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn solution_method(source: &str) -> Option<String> {
        if !declares_type(source, "class", "Solution") {
            return None;
        }
        class_method()
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .find(|name| !CONTROL_WORDS.contains(&name.as_str()) && !name.starts_with('_'))
    }
}

impl LanguageRuntime for JavaScriptRuntime {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn source_file_name(&self, _program: &str) -> String {
        "main.js".to_string()
    }

    fn detect_function_name(&self, source: &str) -> Option<String> {
        if let Some(method) = Self::solution_method(source) {
            return Some(method);
        }
        function_decl()
            .captures_iter(source)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
            .find(|name| !name.starts_with('_'))
    }

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError> {
        let mut program = String::from(source);
        program.push_str("\n\n");
        program.push_str(EMIT_HELPER);
        program.push_str("\n(function () {\n");

        let mut locals = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let local = arg.local_name(i);
            // JSON is a valid JavaScript expression
            program.push_str(&format!("    const {} = {};\n", local, arg.value));
            locals.push(local);
        }

        let target = match Self::solution_method(source) {
            Some(ref method) if method == function => format!("new Solution().{}", function),
            _ => function.to_string(),
        };

        program.push_str("    let __result;\n");
        program.push_str("    try {\n");
        program.push_str(&format!("        __result = {}({});\n", target, locals.join(", ")));
        program.push_str("    } catch (e) {\n");
        program.push_str("        const name = e && e.name ? e.name : \"Error\";\n");
        program.push_str("        const message = e && e.message !== undefined ? e.message : String(e);\n");
        program.push_str("        console.error(\"Error: \" + name + \": \" + message);\n");
        program.push_str("        process.exit(1);\n");
        program.push_str("    }\n");
        program.push_str("    __hirebenchEmit(__result);\n");
        program.push_str("})();\n");

        Ok(program)
    }

    fn compile_command(&self, _source_path: &Path, _limits: &ExecutionLimits) -> Option<CommandSpec> {
        None
    }

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec {
        // V8 reserves far more address space than it uses, so the heap flag
        // is the limit here instead of RLIMIT_AS
        CommandSpec::new(self.toolchain.launcher("node"))
            .arg(format!("--max-old-space-size={}", limits.memory_limit_mb))
            .path_arg(source_path)
    }
}
