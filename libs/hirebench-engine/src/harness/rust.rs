use super::{float_literal, unsupported, Argument, ArgumentList, CommandSpec, HarnessError, LanguageRuntime, ValueShape};
use crate::config::ToolchainConfig;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::Language;
use regex::{Captures, Regex};
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

static FN_DECL: OnceLock<Regex> = OnceLock::new();
static IMPL_SOLUTION: OnceLock<Regex> = OnceLock::new();
static SOLUTION_DEF: OnceLock<Regex> = OnceLock::new();
static CHAR_LITERAL: OnceLock<Regex> = OnceLock::new();

fn fn_decl() -> &'static Regex {
    FN_DECL.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?fn\s+([A-Za-z_]\w*)\s*(?:<[^>]*>)?\s*\(([^)]*)\)")
            .expect("valid regex")
    })
}

fn impl_solution() -> &'static Regex {
    IMPL_SOLUTION.get_or_init(|| Regex::new(r"\bimpl\s+Solution\s*\{").expect("valid regex"))
}

fn solution_def() -> &'static Regex {
    SOLUTION_DEF.get_or_init(|| Regex::new(r"\b(?:struct|enum)\s+Solution\b").expect("valid regex"))
}

fn char_literal() -> &'static Regex {
    CHAR_LITERAL.get_or_init(|| Regex::new(r"'(\\.|[^'\\])'").expect("valid regex"))
}

const INTEGER_TYPES: [&str; 12] = [
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
];

/// How a generated local is handed to the candidate function.
#[derive(Debug, Clone, PartialEq)]
enum Passing {
    Value,
    Shared,
    Mutable,
}

#[derive(Debug, Clone, PartialEq)]
struct Param {
    passing: Passing,
    /// Owned type of the local backing the argument.
    owned_type: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Receiver {
    Free,
    Associated,
    Method,
}

#[derive(Debug, Clone, PartialEq)]
struct Signature {
    receiver: Receiver,
    params: Vec<Param>,
}

#[derive(Debug, Default, Clone)]
pub struct RustRuntime {
    toolchain: ToolchainConfig,
}

impl RustRuntime {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    /// Byte range of the `impl Solution` block body, if any.
    fn impl_block(source: &str) -> Option<(usize, usize)> {
        let start = impl_solution().find(source)?.end();
        let mut depth = 1usize;
        for (offset, c) in source[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((start, start + offset));
                    }
                }
                _ => {}
            }
        }
        Some((start, source.len()))
    }

    fn find_function<'s>(source: &'s str, name: Option<&str>) -> Option<(Captures<'s>, bool)> {
        let block = Self::impl_block(source);
        let in_block = |pos: usize| block.map_or(false, |(start, end)| pos >= start && pos < end);

        let mut candidates: Vec<(Captures<'s>, bool)> = fn_decl()
            .captures_iter(source)
            .filter(|c| &c[1] != "main")
            .filter(|c| name.map_or(true, |n| &c[1] == n))
            .map(|c| {
                let inside = c.get(0).map_or(false, |m| in_block(m.start()));
                (c, inside)
            })
            .collect();

        // Solution methods first, then free functions, in source order
        let pick = candidates
            .iter()
            .position(|(_, inside)| *inside)
            .unwrap_or(0);
        if candidates.is_empty() {
            None
        } else {
            Some(candidates.swap_remove(pick))
        }
    }

    fn signature(source: &str, function: &str) -> Option<Signature> {
        let (caps, inside) = Self::find_function(source, Some(function))?;
        let mut receiver = if inside { Receiver::Associated } else { Receiver::Free };
        let mut params = Vec::new();

        for raw in split_top_level(&caps[2]) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let Some((pattern, ty)) = raw.split_once(':') else {
                // `self`, `&self`, `&mut self`
                if raw.trim_start_matches('&').trim_start_matches("mut ").trim() == "self" {
                    receiver = Receiver::Method;
                    continue;
                }
                return None;
            };
            if pattern.trim().trim_start_matches("mut ").trim() == "self" {
                receiver = Receiver::Method;
                continue;
            }
            params.push(Param::parse(ty.trim()));
        }

        Some(Signature { receiver, params })
    }

    fn inferred_type(arg: &Argument, shape: &ValueShape) -> Result<String, HarnessError> {
        Ok(match shape {
            ValueShape::Int => "i32".to_string(),
            ValueShape::Long => "i64".to_string(),
            ValueShape::Double => "f64".to_string(),
            ValueShape::Bool => "bool".to_string(),
            ValueShape::Str => "String".to_string(),
            ValueShape::List(inner) => format!("Vec<{}>", Self::inferred_type(arg, inner)?),
            ValueShape::Null => return Err(unsupported(arg, Language::Rust, "null needs an Option parameter")),
            ValueShape::Object => return Err(unsupported(arg, Language::Rust, "objects have no Vec mapping")),
            ValueShape::Mixed => return Err(unsupported(arg, Language::Rust, "list elements have mixed types")),
        })
    }

    /// Literal for `value` as the declared type `ty`.
    fn literal(arg: &Argument, value: &Value, ty: &str) -> Result<String, HarnessError> {
        let ty = ty.trim();
        let mismatch = || unsupported(arg, Language::Rust, &format!("value does not fit type {}", ty));

        if let Some(inner) = generic_argument(ty, "Option") {
            return match value {
                Value::Null => Ok("None".to_string()),
                other => Ok(format!("Some({})", Self::literal(arg, other, inner)?)),
            };
        }
        if let Some(inner) = generic_argument(ty, "Vec") {
            let Value::Array(items) = value else {
                return Err(mismatch());
            };
            let elements = items
                .iter()
                .map(|item| Self::literal(arg, item, inner))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(format!("vec![{}]", elements.join(", ")));
        }

        match (ty, value) {
            ("String", Value::String(s)) => Ok(format!("String::from({:?})", s)),
            ("char", Value::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(format!("{:?}", c)),
                    _ => Err(mismatch()),
                }
            }
            ("bool", Value::Bool(b)) => Ok(b.to_string()),
            ("f32" | "f64", Value::Number(n)) => n.as_f64().map(float_literal).ok_or_else(mismatch),
            (t, Value::Number(n)) if INTEGER_TYPES.contains(&t) => {
                if n.is_f64() {
                    Err(mismatch())
                } else {
                    Ok(format!("{}{}", n, t))
                }
            }
            _ => Err(mismatch()),
        }
    }
}

impl Param {
    fn parse(ty: &str) -> Self {
        let mut rest = ty.trim();
        let mut passing = Passing::Value;

        if let Some(stripped) = rest.strip_prefix('&') {
            rest = stripped.trim_start();
            // Lifetime
            if rest.starts_with('\'') {
                rest = rest
                    .split_once(char::is_whitespace)
                    .map_or("", |(_, after)| after)
                    .trim_start();
            }
            passing = match rest.strip_prefix("mut ") {
                Some(after) => {
                    rest = after.trim_start();
                    Passing::Mutable
                }
                None => Passing::Shared,
            };
        }

        let owned_type = if rest == "str" {
            "String".to_string()
        } else if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            format!("Vec<{}>", inner.trim())
        } else {
            rest.to_string()
        };

        Param { passing, owned_type }
    }
}

/// `Inner` from `Outer<Inner>`.
fn generic_argument<'t>(ty: &'t str, outer: &str) -> Option<&'t str> {
    ty.strip_prefix(outer)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
        .map(str::trim)
}

/// Split a parameter list on commas outside brackets.
fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '<' | '[' | '(' => depth += 1,
            '>' | ']' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

fn unescape_char(body: &str) -> Option<char> {
    let mut chars = body.chars();
    match (chars.next()?, chars.next()) {
        ('\\', Some(escaped)) => Some(match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        }),
        (c, None) => Some(c),
        _ => None,
    }
}

impl LanguageRuntime for RustRuntime {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn source_file_name(&self, _program: &str) -> String {
        "main.rs".to_string()
    }

    fn detect_function_name(&self, source: &str) -> Option<String> {
        let (caps, _) = Self::find_function(source, None)?;
        Some(caps[1].to_string())
    }

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError> {
        let signature = Self::signature(source, function)
            .filter(|sig| sig.params.len() == args.len())
            .unwrap_or(Signature {
                receiver: if impl_solution().is_match(source) {
                    Receiver::Associated
                } else {
                    Receiver::Free
                },
                params: Vec::new(),
            });

        let mut program = String::from("#![allow(unused)]\n\n");
        program.push_str(source);
        program.push_str("\n\n");
        if impl_solution().is_match(source) && !solution_def().is_match(source) {
            program.push_str("struct Solution;\n\n");
        }

        program.push_str("fn main() {\n");
        program.push_str("    std::panic::set_hook(Box::new(|_| {}));\n");
        program.push_str("    let outcome = std::panic::catch_unwind(|| {\n");

        let mut call_args = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let local = arg.local_name(i);
            let (ty, passing) = match signature.params.get(i) {
                Some(param) => (param.owned_type.clone(), param.passing.clone()),
                None => (Self::inferred_type(arg, &arg.shape)?, Passing::Value),
            };
            let literal = Self::literal(arg, &arg.value, &ty)?;
            program.push_str(&format!("        let mut {}: {} = {};\n", local, ty, literal));
            call_args.push(match passing {
                Passing::Value => local,
                Passing::Shared => format!("&{}", local),
                Passing::Mutable => format!("&mut {}", local),
            });
        }

        let target = match signature.receiver {
            Receiver::Free => function.to_string(),
            Receiver::Associated => format!("Solution::{}", function),
            Receiver::Method => format!("(Solution {{}}).{}", function),
        };
        program.push_str(&format!("        {}({})\n", target, call_args.join(", ")));
        program.push_str("    });\n");
        program.push_str("    match outcome {\n");
        program.push_str("        Ok(result) => println!(\"{:?}\", result),\n");
        program.push_str("        Err(payload) => {\n");
        program.push_str("            let message = payload\n");
        program.push_str("                .downcast_ref::<&str>()\n");
        program.push_str("                .map(|s| s.to_string())\n");
        program.push_str("                .or_else(|| payload.downcast_ref::<String>().cloned())\n");
        program.push_str("                .unwrap_or_else(|| \"unknown panic\".to_string());\n");
        program.push_str("            eprintln!(\"Error: panic: {}\", message);\n");
        program.push_str("            std::process::exit(1);\n");
        program.push_str("        }\n");
        program.push_str("    }\n");
        program.push_str("}\n");

        Ok(program)
    }

    fn compile_command(&self, source_path: &Path, _limits: &ExecutionLimits) -> Option<CommandSpec> {
        let binary = source_path.with_file_name("main");
        Some(
            CommandSpec::new(self.toolchain.compiler("rustc"))
                .arg("--edition")
                .arg("2021")
                .arg("-O")
                .arg("-o")
                .path_arg(&binary)
                .path_arg(source_path)
                .with_toolchain_env(),
        )
    }

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec {
        let binary = source_path.with_file_name("main");
        CommandSpec::new(binary.to_string_lossy().into_owned()).memory_limit(limits.memory_limit_bytes())
    }

    /// Debug output uses single-quoted chars, which are not JSON.
    fn parse_output(&self, stdout: &str) -> Option<Value> {
        let mut failed = false;
        let converted = char_literal().replace_all(stdout, |caps: &Captures| match unescape_char(&caps[1]) {
            Some(c) => Value::String(c.to_string()).to_string(),
            None => {
                failed = true;
                caps[0].to_string()
            }
        });
        if failed {
            return None;
        }
        serde_json::from_str(&converted).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> ArgumentList {
        ArgumentList::from_inputs(value.as_object().unwrap())
    }

    const TWO_SUM: &str = r#"use std::collections::HashMap;

impl Solution {
    pub fn two_sum(nums: Vec<i32>, target: i32) -> Vec<i32> {
        let mut seen = HashMap::new();
        for (i, n) in nums.iter().enumerate() {
            if let Some(&j) = seen.get(&(target - n)) {
                return vec![j as i32, i as i32];
            }
            seen.insert(*n, i);
        }
        vec![]
    }
}
"#;

    #[test]
    fn test_detects_solution_method_over_helper() {
        let source = "fn helper(x: i32) -> i32 { x }\n\nimpl Solution {\n    pub fn solve(x: i32) -> i32 { helper(x) }\n}\n";
        assert_eq!(RustRuntime::default().detect_function_name(source), Some("solve".to_string()));
    }

    #[test]
    fn test_detects_free_function() {
        let source = "fn main() {}\n\npub fn is_palindrome(s: &str) -> bool {\n    true\n}\n";
        assert_eq!(RustRuntime::default().detect_function_name(source), Some("is_palindrome".to_string()));
    }

    #[test]
    fn test_harness_associated_call() {
        let program = RustRuntime::default()
            .synthesize_harness(TWO_SUM, "two_sum", &args(json!({"nums": [2, 7, 11, 15], "target": 9})))
            .unwrap();

        assert!(program.starts_with("#![allow(unused)]\n"));
        assert!(program.contains("struct Solution;\n"));
        assert!(program.contains("let mut p_nums: Vec<i32> = vec![2i32, 7i32, 11i32, 15i32];"));
        assert!(program.contains("let mut p_target: i32 = 9i32;"));
        assert!(program.contains("Solution::two_sum(p_nums, p_target)"));
    }

    #[test]
    fn test_reference_params_and_owned_locals() {
        let source = "pub fn count(s: &str, grid: &mut Vec<Vec<char>>, w: &'a [f64]) -> usize { 0 }\n";
        let program = RustRuntime::default()
            .synthesize_harness(
                source,
                "count",
                &args(json!({"s": "ab\"c", "grid": [["a", "b"]], "w": [1, 2.5]})),
            )
            .unwrap();

        assert!(program.contains(r#"let mut p_s: String = String::from("ab\"c");"#));
        assert!(program.contains("let mut p_grid: Vec<Vec<char>> = vec![vec!['a', 'b']];"));
        assert!(program.contains("let mut p_w: Vec<f64> = vec![1.0, 2.5];"));
        assert!(program.contains("count(&p_s, &mut p_grid, &p_w)"));
        assert!(!program.contains("struct Solution;"));
    }

    #[test]
    fn test_self_method_and_existing_struct() {
        let source = "pub struct Solution {}\n\nimpl Solution {\n    pub fn get(&self, opt: Option<i64>) -> i64 { opt.unwrap_or(0) }\n}\n";
        let program = RustRuntime::default()
            .synthesize_harness(source, "get", &args(json!({"opt": null})))
            .unwrap();

        assert!(program.contains("let mut p_opt: Option<i64> = None;"));
        assert!(program.contains("(Solution {}).get(p_opt)"));
        assert!(!program.contains("struct Solution;"));
    }

    #[test]
    fn test_inferred_types_without_signature() {
        let program = RustRuntime::default()
            .synthesize_harness("fn f(a: i32) -> i32 { a }", "f", &args(json!({"a": 1, "b": [true]})))
            .unwrap();
        // Arity mismatch falls back to inferred types
        assert!(program.contains("let mut p_a: i32 = 1i32;"));
        assert!(program.contains("let mut p_b: Vec<bool> = vec![true];"));
    }

    #[test]
    fn test_float_into_integer_rejected() {
        let err = RustRuntime::default()
            .synthesize_harness("fn f(a: i32) -> i32 { a }", "f", &args(json!({"a": 1.5})))
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnsupportedArgument { .. }));
    }

    #[test]
    fn test_parse_output_chars() {
        assert_eq!(RustRuntime::default().parse_output("'a'"), Some(json!("a")));
        assert_eq!(RustRuntime::default().parse_output("['x', '\\'', 'y']"), Some(json!(["x", "'", "y"])));
        assert_eq!(RustRuntime::default().parse_output("Some(3)"), None);
    }

    #[test]
    fn test_commands() {
        let limits = ExecutionLimits::default();
        let compile = RustRuntime::default().compile_command(Path::new("/ws/main.rs"), &limits).unwrap();
        assert_eq!(compile.program, "rustc");
        assert_eq!(compile.args[..2], ["--edition", "2021"]);

        let run = RustRuntime::default().run_command(Path::new("/ws/main.rs"), &limits);
        assert_eq!(run.program, "/ws/main");
    }
}
