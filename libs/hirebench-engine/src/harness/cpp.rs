use super::{
    declares_type, float_literal, quote_cpp_string, unsupported, Argument, ArgumentList, CommandSpec,
    HarnessError, LanguageRuntime, ValueShape,
};
use crate::config::ToolchainConfig;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::Language;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

static FUNCTION_DECL: OnceLock<Regex> = OnceLock::new();
static SOLUTION_TYPE: OnceLock<Regex> = OnceLock::new();
static TYPE_NAME: OnceLock<Regex> = OnceLock::new();

fn function_decl() -> &'static Regex {
    FUNCTION_DECL.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?:static|inline|virtual|constexpr)\s+)*([A-Za-z_][\w:<>, \t]*?[\w>])[ \t\*&]+([A-Za-z_]\w*)\s*\([^;{]*\)\s*(?:const\s*)?(?:noexcept\s*)?(?:override\s*)?\{",
        )
        .expect("valid regex")
    })
}

fn solution_type() -> &'static Regex {
    SOLUTION_TYPE.get_or_init(|| Regex::new(r"\b(?:class|struct)\s+Solution\b").expect("valid regex"))
}

fn type_name() -> &'static Regex {
    TYPE_NAME.get_or_init(|| Regex::new(r"\b(?:class|struct)\s+([A-Za-z_]\w*)").expect("valid regex"))
}

const NOT_A_RETURN_TYPE: [&str; 7] = ["return", "else", "new", "delete", "throw", "case", "using"];
const NOT_A_FUNCTION: [&str; 6] = ["main", "if", "for", "while", "switch", "catch"];

// Scalars print bare; strings inside containers are quoted; a top-level
// string prints raw.
const EMIT_HELPERS: &str = r#"
namespace hirebench_harness {

inline std::string quote(const std::string& s) {
    std::string out = "\"";
    for (char c : s) {
        switch (c) {
            case '"': out += "\\\""; break;
            case '\\': out += "\\\\"; break;
            case '\n': out += "\\n"; break;
            case '\r': out += "\\r"; break;
            case '\t': out += "\\t"; break;
            default: out += c;
        }
    }
    return out + "\"";
}

inline void item(std::ostream& out, const std::string& v) { out << quote(v); }
inline void item(std::ostream& out, const char* v) { out << quote(v); }
inline void item(std::ostream& out, char v) { out << quote(std::string(1, v)); }
inline void item(std::ostream& out, bool v) { out << (v ? "true" : "false"); }

template <typename T> void item(std::ostream& out, const std::vector<T>& v);

template <typename T> void item(std::ostream& out, const T& v) { out << v; }

template <typename T> void item(std::ostream& out, const std::vector<T>& v) {
    out << '[';
    for (size_t i = 0; i < v.size(); ++i) {
        if (i) out << ',';
        const T& element = v[i];
        item(out, element);
    }
    out << ']';
}

inline void emit(const std::string& v) { std::cout << v << '\n'; }
inline void emit(const char* v) { std::cout << v << '\n'; }
inline void emit(char v) { std::cout << v << '\n'; }

template <typename T> void emit(const T& v) {
    item(std::cout, v);
    std::cout << '\n';
}

}  // namespace hirebench_harness
"#;

#[derive(Debug, Default, Clone)]
pub struct CppRuntime {
    toolchain: ToolchainConfig,
}

impl CppRuntime {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn cpp_type(arg: &Argument, shape: &ValueShape) -> Result<String, HarnessError> {
        Ok(match shape {
            ValueShape::Int => "int".to_string(),
            ValueShape::Long => "long long".to_string(),
            ValueShape::Double => "double".to_string(),
            ValueShape::Bool => "bool".to_string(),
            ValueShape::Str => "string".to_string(),
            ValueShape::List(inner) => format!("vector<{}>", Self::cpp_type(arg, inner)?),
            ValueShape::Null => return Err(unsupported(arg, Language::Cpp, "null has no value type")),
            ValueShape::Object => return Err(unsupported(arg, Language::Cpp, "objects have no vector mapping")),
            ValueShape::Mixed => return Err(unsupported(arg, Language::Cpp, "list elements have mixed types")),
        })
    }

    fn cpp_literal(arg: &Argument, value: &Value, shape: &ValueShape) -> Result<String, HarnessError> {
        Ok(match (shape, value) {
            (ValueShape::Int, Value::Number(n)) => n.to_string(),
            (ValueShape::Long, Value::Number(n)) => match n.as_i64() {
                Some(i) => format!("{}LL", i),
                None => return Err(unsupported(arg, Language::Cpp, "integer does not fit in a long long")),
            },
            (ValueShape::Double, Value::Number(n)) => float_literal(n.as_f64().unwrap_or_default()),
            (ValueShape::Bool, Value::Bool(b)) => b.to_string(),
            (ValueShape::Str, Value::String(s)) => quote_cpp_string(s),
            (ValueShape::List(inner), Value::Array(items)) => {
                let elements = items
                    .iter()
                    .map(|item| Self::cpp_literal(arg, item, inner))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{{{}}}", elements.join(", "))
            }
            _ => return Err(unsupported(arg, Language::Cpp, "value does not match its inferred type")),
        })
    }

    fn search_region(source: &str) -> &str {
        match solution_type().find(source) {
            Some(m) => &source[m.start()..],
            None => source,
        }
    }
}

impl LanguageRuntime for CppRuntime {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn source_file_name(&self, _program: &str) -> String {
        "main.cpp".to_string()
    }

    fn detect_function_name(&self, source: &str) -> Option<String> {
        let types: Vec<String> = type_name().captures_iter(source).map(|c| c[1].to_string()).collect();

        function_decl()
            .captures_iter(Self::search_region(source))
            .filter(|c| {
                let first_word = c[1].split_whitespace().next().unwrap_or_default();
                !NOT_A_RETURN_TYPE.contains(&first_word)
            })
            .map(|c| c[2].to_string())
            .find(|name| !NOT_A_FUNCTION.contains(&name.as_str()) && !types.contains(name))
    }

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError> {
        let mut program = String::from("#include <bits/stdc++.h>\nusing namespace std;\n\n");
        program.push_str(source);
        program.push_str("\n\n");
        program.push_str(EMIT_HELPERS);
        program.push_str("\nint main() {\n");
        program.push_str("    std::cout << std::setprecision(15);\n");
        program.push_str("    try {\n");

        let mut locals = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let local = arg.local_name(i);
            let ty = Self::cpp_type(arg, &arg.shape)?;
            let literal = Self::cpp_literal(arg, &arg.value, &arg.shape)?;
            program.push_str(&format!("        {} {} = {};\n", ty, local, literal));
            locals.push(local);
        }

        let call = if declares_type(source, "class|struct", "Solution") {
            program.push_str("        Solution hb_solution;\n");
            format!("hb_solution.{}({})", function, locals.join(", "))
        } else {
            format!("{}({})", function, locals.join(", "))
        };

        program.push_str(&format!("        auto hb_result = {};\n", call));
        program.push_str("        hirebench_harness::emit(hb_result);\n");
        program.push_str("    } catch (const std::exception& e) {\n");
        program.push_str("        std::cerr << \"Error: \" << e.what() << std::endl;\n");
        program.push_str("        return 1;\n");
        program.push_str("    } catch (...) {\n");
        program.push_str("        std::cerr << \"Error: unknown exception\" << std::endl;\n");
        program.push_str("        return 1;\n");
        program.push_str("    }\n");
        program.push_str("    return 0;\n");
        program.push_str("}\n");

        Ok(program)
    }

    fn compile_command(&self, source_path: &Path, _limits: &ExecutionLimits) -> Option<CommandSpec> {
        let binary = source_path.with_file_name("main");
        Some(
            CommandSpec::new(self.toolchain.compiler("g++"))
                .arg("-std=c++17")
                .arg("-O2")
                .arg("-pipe")
                .arg("-o")
                .path_arg(&binary)
                .path_arg(source_path),
        )
    }

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec {
        let binary = source_path.with_file_name("main");
        CommandSpec::new(binary.to_string_lossy().into_owned()).memory_limit(limits.memory_limit_bytes())
    }
}
