use super::{
    declares_type, float_literal, quote_json_string, unsupported, Argument, ArgumentList, CommandSpec,
    HarnessError, LanguageRuntime, ValueShape,
};
use crate::config::ToolchainConfig;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::Language;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

static IMPORT_LINE: OnceLock<Regex> = OnceLock::new();
static PACKAGE_LINE: OnceLock<Regex> = OnceLock::new();
static PUBLIC_TYPE: OnceLock<Regex> = OnceLock::new();
static CLASS_NAME: OnceLock<Regex> = OnceLock::new();
static PUBLIC_CLASS_NAME: OnceLock<Regex> = OnceLock::new();
static METHOD_DECL: OnceLock<Regex> = OnceLock::new();

fn import_line() -> &'static Regex {
    IMPORT_LINE.get_or_init(|| Regex::new(r"(?m)^[ \t]*import\s+(?:static\s+)?[\w.]+(?:\.\*)?\s*;[ \t]*\r?\n?").expect("valid regex"))
}

fn package_line() -> &'static Regex {
    PACKAGE_LINE.get_or_init(|| Regex::new(r"(?m)^[ \t]*package\s+[\w.]+\s*;[ \t]*\r?\n?").expect("valid regex"))
}

fn public_type() -> &'static Regex {
    PUBLIC_TYPE.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)public\s+((?:final\s+|abstract\s+)*)(class|interface|enum|record)\b")
            .expect("valid regex")
    })
}

fn class_name() -> &'static Regex {
    CLASS_NAME.get_or_init(|| Regex::new(r"\b(?:class|interface|enum|record)\s+([A-Za-z_]\w*)").expect("valid regex"))
}

fn public_class_name() -> &'static Regex {
    PUBLIC_CLASS_NAME.get_or_init(|| Regex::new(r"\bpublic\s+(?:final\s+)?class\s+([A-Za-z_]\w*)").expect("valid regex"))
}

fn method_decl() -> &'static Regex {
    METHOD_DECL.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?:public|private|protected|static|final|synchronized)\s+)*([A-Za-z_][\w<>,\[\]? ]*?)\s+([A-Za-z_]\w*)\s*\([^;{)]*\)\s*(?:throws\s+[\w.,\s]+)?\{",
        )
        .expect("valid regex")
    })
}

const NOT_A_RETURN_TYPE: [&str; 6] = ["return", "new", "else", "throw", "class", "case"];
const NOT_A_METHOD: [&str; 7] = ["main", "if", "for", "while", "switch", "catch", "synchronized"];

// Renders the result as JSON, except that a top-level string prints raw.
const FORMAT_HELPER: &str = r#"
    static String render(Object value, boolean top) {
        if (value == null) return "null";
        if (value instanceof String || value instanceof Character) {
            String s = String.valueOf(value);
            return top ? s : quote(s);
        }
        if (value.getClass().isArray()) {
            StringBuilder sb = new StringBuilder("[");
            int n = java.lang.reflect.Array.getLength(value);
            for (int i = 0; i < n; i++) {
                if (i > 0) sb.append(",");
                sb.append(render(java.lang.reflect.Array.get(value, i), false));
            }
            return sb.append("]").toString();
        }
        if (value instanceof Iterable) {
            StringBuilder sb = new StringBuilder("[");
            boolean first = true;
            for (Object item : (Iterable<?>) value) {
                if (!first) sb.append(",");
                sb.append(render(item, false));
                first = false;
            }
            return sb.append("]").toString();
        }
        if (value instanceof Map) {
            StringBuilder sb = new StringBuilder("{");
            boolean first = true;
            for (Map.Entry<?, ?> e : ((Map<?, ?>) value).entrySet()) {
                if (!first) sb.append(",");
                sb.append(quote(String.valueOf(e.getKey()))).append(":").append(render(e.getValue(), false));
                first = false;
            }
            return sb.append("}").toString();
        }
        return String.valueOf(value);
    }

    static String quote(String s) {
        StringBuilder sb = new StringBuilder("\"");
        for (int i = 0; i < s.length(); i++) {
            char c = s.charAt(i);
            switch (c) {
                case '"': sb.append("\\\""); break;
                case '\\': sb.append("\\\\"); break;
                case '\n': sb.append("\\n"); break;
                case '\r': sb.append("\\r"); break;
                case '\t': sb.append("\\t"); break;
                default:
                    if (c < 0x20) sb.append(String.format("\\u%04x", (int) c));
                    else sb.append(c);
            }
        }
        return sb.append("\"").toString();
    }
"#;

#[derive(Debug, Default, Clone)]
pub struct JavaRuntime {
    toolchain: ToolchainConfig,
}

/// Candidate source reshaped so it can share a file with the harness class.
struct PreparedSource {
    imports: Vec<String>,
    body: String,
    target_class: String,
}

impl JavaRuntime {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn prepare(source: &str) -> PreparedSource {
        let mut imports: Vec<String> = Vec::new();
        for m in import_line().find_iter(source) {
            let line = m.as_str().trim().to_string();
            if !imports.contains(&line) {
                imports.push(line);
            }
        }

        let stripped = import_line().replace_all(source, "");
        let stripped = package_line().replace_all(&stripped, "");
        let demoted = public_type().replace_all(&stripped, "$1$2$3").into_owned();

        if declares_type(&demoted, "class", "Solution") {
            return PreparedSource {
                imports,
                body: demoted,
                target_class: "Solution".to_string(),
            };
        }

        match class_name().captures(&demoted) {
            Some(caps) => {
                let target_class = caps[1].to_string();
                PreparedSource {
                    imports,
                    body: demoted,
                    target_class,
                }
            }
            // Bare methods
            None => PreparedSource {
                imports,
                body: format!("class Solution {{\n{}\n}}", demoted),
                target_class: "Solution".to_string(),
            },
        }
    }

    fn main_class_name(body: &str) -> &'static str {
        if declares_type(body, "class|interface|enum|record", "Main") {
            "HirebenchMain"
        } else {
            "Main"
        }
    }

    fn java_type(arg: &Argument, shape: &ValueShape) -> Result<String, HarnessError> {
        Ok(match shape {
            ValueShape::Int => "int".to_string(),
            ValueShape::Long => "long".to_string(),
            ValueShape::Double => "double".to_string(),
            ValueShape::Bool => "boolean".to_string(),
            ValueShape::Str => "String".to_string(),
            ValueShape::Null => "Object".to_string(),
            ValueShape::List(inner) => format!("{}[]", Self::java_type(arg, inner)?),
            ValueShape::Object => return Err(unsupported(arg, Language::Java, "objects have no array mapping")),
            ValueShape::Mixed => return Err(unsupported(arg, Language::Java, "list elements have mixed types")),
        })
    }

    fn java_literal(arg: &Argument, value: &Value, shape: &ValueShape) -> Result<String, HarnessError> {
        Ok(match (shape, value) {
            (_, Value::Null) => "null".to_string(),
            (ValueShape::Int, Value::Number(n)) => n.to_string(),
            (ValueShape::Long, Value::Number(n)) => match n.as_i64() {
                Some(i) => format!("{}L", i),
                None => return Err(unsupported(arg, Language::Java, "integer does not fit in a long")),
            },
            (ValueShape::Double, Value::Number(n)) => float_literal(n.as_f64().unwrap_or_default()),
            (ValueShape::Bool, Value::Bool(b)) => b.to_string(),
            (ValueShape::Str, Value::String(s)) => quote_json_string(s),
            (ValueShape::List(inner), Value::Array(items)) => {
                let elements = items
                    .iter()
                    .map(|item| Self::java_literal(arg, item, inner))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{{{}}}", elements.join(", "))
            }
            _ => return Err(unsupported(arg, Language::Java, "value does not match its inferred type")),
        })
    }

    fn declaration(arg: &Argument, local: &str) -> Result<String, HarnessError> {
        let ty = Self::java_type(arg, &arg.shape)?;
        let literal = Self::java_literal(arg, &arg.value, &arg.shape)?;
        if matches!(arg.shape, ValueShape::List(_)) {
            Ok(format!("{} {} = new {}{};", ty, local, ty, literal))
        } else {
            Ok(format!("{} {} = {};", ty, local, literal))
        }
    }
}

impl LanguageRuntime for JavaRuntime {
    fn language(&self) -> Language {
        Language::Java
    }

    /// The file must be named after its public class.
    fn source_file_name(&self, program: &str) -> String {
        public_class_name()
            .captures(program)
            .map(|caps| format!("{}.java", &caps[1]))
            .unwrap_or_else(|| "Main.java".to_string())
    }

    fn detect_function_name(&self, source: &str) -> Option<String> {
        let constructors: Vec<String> = class_name()
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect();

        method_decl()
            .captures_iter(source)
            .filter(|c| {
                let return_type = c[1].trim();
                let first_word = return_type.split_whitespace().next().unwrap_or_default();
                !NOT_A_RETURN_TYPE.contains(&first_word)
            })
            .map(|c| c[2].to_string())
            .find(|name| !NOT_A_METHOD.contains(&name.as_str()) && !constructors.contains(name))
    }

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError> {
        let prepared = Self::prepare(source);
        let main_class = Self::main_class_name(&prepared.body);

        let mut program = String::from("import java.util.*;\n");
        for import in &prepared.imports {
            program.push_str(import);
            program.push('\n');
        }
        program.push('\n');
        program.push_str(&prepared.body);
        program.push_str("\n\n");
        program.push_str(&format!("public class {} {{\n", main_class));
        program.push_str(FORMAT_HELPER);
        program.push_str("\n    public static void main(String[] args) {\n");
        program.push_str("        try {\n");

        let mut locals = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let local = arg.local_name(i);
            program.push_str(&format!("            {}\n", Self::declaration(arg, &local)?));
            locals.push(local);
        }

        program.push_str(&format!(
            "            Object result = new {}().{}({});\n",
            prepared.target_class,
            function,
            locals.join(", ")
        ));
        program.push_str("            System.out.println(render(result, true));\n");
        program.push_str("        } catch (Throwable e) {\n");
        program.push_str("            System.err.println(\"Error: \" + e.getClass().getSimpleName() + \": \" + e.getMessage());\n");
        program.push_str("            System.exit(1);\n");
        program.push_str("        }\n");
        program.push_str("    }\n");
        program.push_str("}\n");

        Ok(program)
    }

    fn compile_command(&self, source_path: &Path, _limits: &ExecutionLimits) -> Option<CommandSpec> {
        let out_dir = source_path.parent().unwrap_or_else(|| Path::new("."));
        Some(
            CommandSpec::new(self.toolchain.compiler("javac"))
                .arg("-d")
                .path_arg(out_dir)
                .path_arg(source_path)
                .with_toolchain_env(),
        )
    }

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec {
        let class_dir = source_path.parent().unwrap_or_else(|| Path::new("."));
        let class = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Main".to_string());

        // The JVM maps far more address space than its heap, so the heap
        // flag is the memory limit here
        CommandSpec::new(self.toolchain.launcher("java"))
            .arg(format!("-Xmx{}m", limits.memory_limit_mb))
            .arg("-Xss64m")
            .arg("-XX:+UseSerialGC")
            .arg("-XX:-UsePerfData")
            .arg(format!("-Djava.io.tmpdir={}", class_dir.display()))
            .arg("-cp")
            .path_arg(class_dir)
            .arg(class)
            .with_toolchain_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> ArgumentList {
        ArgumentList::from_inputs(value.as_object().unwrap())
    }

    const TWO_SUM: &str = r#"import java.util.HashMap;

public class Solution {
    public Solution() {}

    public int[] twoSum(int[] nums, int target) {
        HashMap<Integer, Integer> seen = new HashMap<>();
        for (int i = 0; i < nums.length; i++) {
            if (seen.containsKey(target - nums[i])) {
                return new int[]{seen.get(target - nums[i]), i};
            }
            seen.put(nums[i], i);
        }
        return new int[0];
    }
}
"#;

    #[test]
    fn test_detects_method_skipping_constructor() {
        assert_eq!(JavaRuntime::default().detect_function_name(TWO_SUM), Some("twoSum".to_string()));
    }

    #[test]
    fn test_detects_generic_return_type() {
        let source = "class Solution {\n    public static List<List<Integer>> groupAll(String[] words) {\n        return null;\n    }\n}\n";
        assert_eq!(JavaRuntime::default().detect_function_name(source), Some("groupAll".to_string()));
    }

    #[test]
    fn test_harness_hoists_imports_and_demotes_class() {
        let program = JavaRuntime::default()
            .synthesize_harness(TWO_SUM, "twoSum", &args(json!({"nums": [2, 7, 11, 15], "target": 9})))
            .unwrap();

        assert!(program.starts_with("import java.util.*;\nimport java.util.HashMap;\n"));
        assert!(program.contains("\nclass Solution {"));
        assert!(!program.contains("public class Solution"));
        assert!(program.contains("int[] p_nums = new int[]{2, 7, 11, 15};"));
        assert!(program.contains("int p_target = 9;"));
        assert!(program.contains("Object result = new Solution().twoSum(p_nums, p_target);"));
        assert_eq!(JavaRuntime::default().source_file_name(&program), "Main.java");
    }

    #[test]
    fn test_bare_method_is_wrapped() {
        let program = JavaRuntime::default()
            .synthesize_harness(
                "public boolean isPalindrome(String s) {\n    return new StringBuilder(s).reverse().toString().equals(s);\n}\n",
                "isPalindrome",
                &args(json!({"s": "racecar"})),
            )
            .unwrap();
        assert!(program.contains("class Solution {\npublic boolean isPalindrome"));
        assert!(program.contains("String p_s = \"racecar\";"));
    }

    #[test]
    fn test_nested_and_long_literals() {
        let program = JavaRuntime::default()
            .synthesize_harness(
                "class Solution { long f(long[][] g, double[] w) { return 0; } }",
                "f",
                &args(json!({"g": [[1, 3_000_000_000i64], []], "w": [1, 2.5]})),
            )
            .unwrap();
        assert!(program.contains("long[][] p_g = new long[][]{{1L, 3000000000L}, {}};"));
        assert!(program.contains("double[] p_w = new double[]{1.0, 2.5};"));
    }

    #[test]
    fn test_object_argument_rejected() {
        let err = JavaRuntime::default()
            .synthesize_harness("class Solution { int f(Object o) { return 0; } }", "f", &args(json!({"o": {"a": 1}})))
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnsupportedArgument { .. }));
    }

    #[test]
    fn test_candidate_main_class_renames_harness() {
        let program = JavaRuntime::default()
            .synthesize_harness("public class Main { int f() { return 1; } }", "f", &ArgumentList::default())
            .unwrap();
        assert!(program.contains("public class HirebenchMain {"));
        assert!(program.contains("new Main().f()"));
        assert_eq!(JavaRuntime::default().source_file_name(&program), "HirebenchMain.java");
    }

    #[test]
    fn test_commands() {
        let limits = ExecutionLimits::default();
        let path = Path::new("/ws/Main.java");

        let compile = JavaRuntime::default().compile_command(path, &limits).unwrap();
        assert_eq!(compile.program, "javac");
        assert_eq!(compile.args[..3], ["-d", "/ws", "/ws/Main.java"]);

        let run = JavaRuntime::default().run_command(path, &limits);
        assert_eq!(run.program, "java");
        assert!(run.args.contains(&"-Xmx256m".to_string()));
        assert_eq!(run.args.last().map(String::as_str), Some("Main"));
    }
}
