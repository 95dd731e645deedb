/// Harness Synthesis
///
/// A harness is a complete program that wraps the candidate's function with
/// a fixed invocation for one test case and prints the result using a
/// single convention per language.
///
/// Synthesis is split into:
/// - `ArgumentList`: the test case inputs, in caller order, each with an
///   inferred `ValueShape`
/// - per-language type and literal tables (in each language module)
/// - per-language statement templates (`LanguageRuntime::synthesize_harness`)
///
/// Every string that reaches generated code goes through a literal escaper
/// for the target language, never raw concatenation.

mod cpp;
mod java;
mod javascript;
mod python;
mod rust;

pub use cpp::CppRuntime;
pub use java::JavaRuntime;
pub use javascript::JavaScriptRuntime;
pub use python::PythonRuntime;
pub use rust::RustRuntime;

use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::{FunctionNameMap, Language, TestCase};
use serde_json::{Map, Number, Value};
use std::path::Path;
use thiserror::Error;

/// Toolchain variables forwarded to compile steps only. The run phase
/// never sees them.
const TOOLCHAIN_ENV_PASSTHROUGH: [&str; 4] = ["JAVA_HOME", "RUSTUP_HOME", "RUSTUP_TOOLCHAIN", "CARGO_HOME"];

#[derive(Debug, Error, PartialEq)]
pub enum HarnessError {
    #[error("could not determine the function to call for {0}")]
    FunctionNotFound(Language),
    #[error("argument '{name}' cannot be passed in {language}: {reason}")]
    UnsupportedArgument {
        name: String,
        language: Language,
        reason: String,
    },
}

/// A child process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Address-space ceiling applied before exec, when set.
    pub memory_limit_bytes: Option<u64>,
    /// Extra variables on top of the sandbox environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            memory_limit_bytes: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    /// Forward whitelisted toolchain variables from the host environment.
    pub fn with_toolchain_env(mut self) -> Self {
        for key in TOOLCHAIN_ENV_PASSTHROUGH {
            if let Ok(value) = std::env::var(key) {
                self.env.push((key.to_string(), value));
            }
        }
        self
    }
}

/// Per-language capabilities. The orchestrator and sandbox only talk to
/// languages through this trait.
pub trait LanguageRuntime: Send + Sync {
    fn language(&self) -> Language;

    /// File name the program text is written to inside the workspace.
    fn source_file_name(&self, program: &str) -> String;

    /// Find the callable the candidate defined.
    fn detect_function_name(&self, source: &str) -> Option<String>;

    fn synthesize_harness(
        &self,
        source: &str,
        function: &str,
        args: &ArgumentList,
    ) -> Result<String, HarnessError>;

    /// `None` for interpreted languages.
    fn compile_command(&self, source_path: &Path, limits: &ExecutionLimits) -> Option<CommandSpec>;

    fn run_command(&self, source_path: &Path, limits: &ExecutionLimits) -> CommandSpec;

    /// Language-specific parse of printed output that is not JSON.
    fn parse_output(&self, _stdout: &str) -> Option<Value> {
        None
    }
}

/// Build the runnable program for one test case.
pub fn generate_harness(
    runtime: &dyn LanguageRuntime,
    source: &str,
    test_case: &TestCase,
    function_map: &FunctionNameMap,
) -> Result<String, HarnessError> {
    let function = runtime
        .detect_function_name(source)
        .or_else(|| function_map.get(&runtime.language()).cloned())
        .ok_or(HarnessError::FunctionNotFound(runtime.language()))?;

    let args = ArgumentList::from_inputs(&test_case.inputs);
    runtime.synthesize_harness(source, &function, &args)
}

/// JSON value shape, used to pick declared types in typed languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape {
    Int,
    Long,
    Double,
    Bool,
    Str,
    Null,
    List(Box<ValueShape>),
    Object,
    /// A list whose elements have no common shape.
    Mixed,
}

impl ValueShape {
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Bool(_) => ValueShape::Bool,
            Value::Number(n) => Self::of_number(n),
            Value::String(_) => ValueShape::Str,
            Value::Object(_) => ValueShape::Object,
            Value::Array(items) => {
                let mut element: Option<ValueShape> = None;
                let mut saw_empty_list = false;
                for item in items {
                    // Empty sublists take the shape of their siblings
                    if matches!(item, Value::Array(inner) if inner.is_empty()) {
                        saw_empty_list = true;
                        continue;
                    }
                    let shape = Self::infer(item);
                    element = Some(match element {
                        None => shape,
                        Some(current) => current.unify(shape),
                    });
                }
                let element = match element {
                    Some(ValueShape::List(inner)) => ValueShape::List(inner),
                    Some(_) if saw_empty_list => ValueShape::Mixed,
                    Some(other) => other,
                    None if saw_empty_list => ValueShape::List(Box::new(ValueShape::Int)),
                    // An empty list defaults to a list of ints
                    None => ValueShape::Int,
                };
                ValueShape::List(Box::new(element))
            }
        }
    }

    fn of_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            if i32::try_from(i).is_ok() {
                ValueShape::Int
            } else {
                ValueShape::Long
            }
        } else if n.is_u64() {
            ValueShape::Long
        } else {
            ValueShape::Double
        }
    }

    fn unify(self, other: ValueShape) -> ValueShape {
        use ValueShape::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Int, Long) | (Long, Int) => Long,
            (Int | Long, Double) | (Double, Int | Long) => Double,
            (List(a), List(b)) => match a.unify(*b) {
                Mixed => Mixed,
                inner => List(Box::new(inner)),
            },
            _ => Mixed,
        }
    }

    /// Innermost element shape and list depth.
    pub fn scalar_and_depth(&self) -> (&ValueShape, usize) {
        let mut shape = self;
        let mut depth = 0;
        while let ValueShape::List(inner) = shape {
            shape = inner;
            depth += 1;
        }
        (shape, depth)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
    pub shape: ValueShape,
}

impl Argument {
    /// Name used for a generated local. Prefixed so it cannot collide with
    /// keywords or candidate identifiers.
    pub fn local_name(&self, position: usize) -> String {
        let valid = !self.name.is_empty()
            && self
                .name
                .chars()
                .next()
                .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid {
            format!("p_{}", self.name)
        } else {
            format!("p{}", position)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentList {
    args: Vec<Argument>,
}

impl ArgumentList {
    pub fn from_inputs(inputs: &Map<String, Value>) -> Self {
        let args = inputs
            .iter()
            .map(|(name, value)| Argument {
                name: name.clone(),
                value: value.clone(),
                shape: ValueShape::infer(value),
            })
            .collect();
        Self { args }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Double-quoted literal with JSON escapes; valid in Python, JavaScript
/// and Java source.
pub fn quote_json_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Double-quoted C++ literal. Control bytes use octal escapes so the
/// literal is valid in every standard mode.
pub fn quote_cpp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '?' => out.push_str("\\?"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Floating literal that always carries a decimal point.
pub fn float_literal(value: f64) -> String {
    format!("{:?}", value)
}

pub(crate) fn unsupported(arg: &Argument, language: Language, reason: &str) -> HarnessError {
    HarnessError::UnsupportedArgument {
        name: arg.name.clone(),
        language,
        reason: reason.to_string(),
    }
}

/// Whether `source` declares a class (or struct) named `name`.
pub(crate) fn declares_type(source: &str, keyword_pattern: &str, name: &str) -> bool {
    let pattern = format!(r"\b(?:{})\s+{}\b", keyword_pattern, regex::escape(name));
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(source))
        .unwrap_or(false)
}
