/// Static Source Screening
///
/// Rejects submissions containing constructs that reach outside the
/// sandbox: filesystem access, process spawning, reflection and dynamic
/// evaluation, raw networking, environment and credential access.
///
/// This is a denylist over source text and is paired with the sandbox's
/// environment scrubbing and resource limits; it is not an isolation
/// boundary on its own.

use hirebench_common::types::Language;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    Filesystem,
    Process,
    Reflection,
    Network,
    Environment,
}

pub struct DenyRule {
    pub category: RuleCategory,
    pub description: &'static str,
    pattern: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub safe: bool,
    pub reason: Option<String>,
}

impl SecurityVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_source_bytes: usize,
}

impl SecurityValidator {
    pub fn new(max_source_bytes: usize) -> Self {
        Self { max_source_bytes }
    }

    /// Scan `source` against the rules for `language`. The first matching
    /// rule decides the verdict.
    pub fn validate(&self, source: &str, language: Language) -> SecurityVerdict {
        if source.len() > self.max_source_bytes {
            return SecurityVerdict::rejected(format!(
                "Source code exceeds maximum size of {} bytes",
                self.max_source_bytes
            ));
        }

        for rule in rules_for(language) {
            if rule.pattern.is_match(source) {
                return SecurityVerdict::rejected(rule.description);
            }
        }

        SecurityVerdict::safe()
    }
}

pub fn rules_for(language: Language) -> &'static [DenyRule] {
    static RULES: OnceLock<HashMap<Language, Vec<DenyRule>>> = OnceLock::new();
    RULES
        .get_or_init(build_rules)
        .get(&language)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn rule(category: RuleCategory, description: &'static str, pattern: &str) -> DenyRule {
    DenyRule {
        category,
        description,
        pattern: Regex::new(pattern).expect("invalid denylist pattern"),
    }
}

fn build_rules() -> HashMap<Language, Vec<DenyRule>> {
    use RuleCategory::*;

    let mut rules = HashMap::new();

    rules.insert(
        Language::Python,
        vec![
            rule(Process, "Process execution modules are not allowed", r"\b(?:import|from)\s+(?:subprocess|multiprocessing|pty)\b"),
            rule(Process, "Operating system module is not allowed", r"\b(?:import\s+os\b|from\s+os\b|os\s*\.\s*\w)"),
            rule(Filesystem, "File access is not allowed", r"(?m)(?:^|[^.\w])open\s*\(|\b(?:import|from)\s+(?:shutil|pathlib|tempfile|io|builtins)\b"),
            rule(Reflection, "Dynamic code evaluation is not allowed", r"(?m)(?:^|[^.\w])(?:eval|exec|compile|__import__|globals|getattr|setattr)\s*\(|\bimportlib\b|__builtins__|__subclasses__"),
            rule(Reflection, "Interpreter internals are not allowed", r"\bsys\s*\.\s*modules\b|\bfrom\s+sys\s+import\b[^\n]*\bmodules\b|__dict__|__globals__"),
            rule(Reflection, "Native interop modules are not allowed", r"\b(?:import|from)\s+(?:ctypes|cffi|pickle|marshal|code|inspect)\b"),
            rule(Network, "Network access is not allowed", r"\b(?:import|from)\s+(?:socket|urllib|http|requests|ftplib|smtplib|asyncio)\b"),
            rule(Environment, "Environment access is not allowed", r"\benviron\b|\bgetenv\s*\("),
        ],
    );

    rules.insert(
        Language::JavaScript,
        vec![
            rule(Process, "Child processes are not allowed", r#"\bchild_process\b|\bprocess\s*\.\s*(?:binding|dlopen|kill|exit|abort)\b|\bworker_threads\b"#),
            rule(Filesystem, "File access is not allowed", r#"require\s*\(\s*['"`](?:node:)?fs(?:/promises)?['"`]\s*\)|from\s+['"`](?:node:)?fs(?:/promises)?['"`]"#),
            rule(Reflection, "Dynamic code evaluation is not allowed", r"\beval\s*\(|\bnew\s+Function\s*\(|\bFunction\s*\(|\bvm\b\s*\.|\bimport\s*\("),
            rule(Network, "Network access is not allowed", r#"['"`](?:node:)?(?:net|http|https|http2|dgram|dns|tls)['"`]|\bfetch\s*\(|\bWebSocket\b"#),
            rule(Environment, "Environment access is not allowed", r"\bprocess\s*\.\s*env\b"),
            rule(Reflection, "Module loading is not allowed", r#"\brequire\s*\(\s*[^'"`\s]"#),
        ],
    );

    rules.insert(
        Language::Java,
        vec![
            rule(Process, "Process execution is not allowed", r"\bRuntime\s*\.\s*getRuntime\b|\bProcessBuilder\b|\bProcessHandle\b|\bSystem\s*\.\s*exit\b"),
            rule(Filesystem, "File access is not allowed", r"\bjava\s*\.\s*nio\s*\.\s*file\b|\b(?:File|FileInputStream|FileOutputStream|FileReader|FileWriter|RandomAccessFile|Files|Paths)\b"),
            rule(Reflection, "Reflection is not allowed", r"\bjava\s*\.\s*lang\s*\.\s*reflect\b|\bClass\s*\.\s*forName\b|\.\s*(?:getDeclaredMethod|getDeclaredField|getMethod|setAccessible)\s*\(|\bClassLoader\b|\bMethodHandles\b|\bUnsafe\b"),
            rule(Network, "Network access is not allowed", r"\bjava\s*\.\s*net\b|\b(?:Socket|ServerSocket|DatagramSocket|URL|HttpClient|URLConnection)\b"),
            rule(Environment, "Environment access is not allowed", r"\bSystem\s*\.\s*(?:getenv|getProperty|getProperties|setProperty)\b"),
        ],
    );

    rules.insert(
        Language::Cpp,
        vec![
            rule(Process, "Process execution is not allowed", r"\b(?:system|popen|fork|vfork|execl|execlp|execle|execv|execvp|execve|posix_spawn|kill)\s*\("),
            rule(Filesystem, "File access is not allowed", r"#\s*include\s*<(?:fstream|filesystem|fcntl\.h|sys/stat\.h|dirent\.h)>|\b(?:fopen|freopen|open|unlink|rmdir|mkdir)\s*\(|\b[io]?fstream\b"),
            rule(Reflection, "Dynamic loading and inline assembly are not allowed", r"\b(?:dlopen|dlsym)\s*\(|\b(?:asm|__asm__)\b|#\s*include\s*<dlfcn\.h>"),
            rule(Network, "Network access is not allowed", r"#\s*include\s*<(?:sys/socket\.h|netinet/in\.h|arpa/inet\.h|netdb\.h)>|\bsocket\s*\("),
            rule(Environment, "Environment access is not allowed", r"\b(?:getenv|setenv|putenv|secure_getenv)\s*\(|\benviron\b"),
        ],
    );

    rules.insert(
        Language::Rust,
        vec![
            rule(Process, "Process execution is not allowed", r"\bstd\s*::\s*process\b|\bstd\s*::\s*\{[^;]*\bprocess\b|\bCommand\s*::\s*new\b"),
            rule(Filesystem, "File access is not allowed", r"\bstd\s*::\s*fs\b|\bstd\s*::\s*\{[^;]*\bfs\b|\bstd\s*::\s*\*|\bFile\s*::\s*(?:open|create)\b|\binclude_(?:str|bytes)\s*!|\bOpenOptions\b"),
            rule(Reflection, "Unsafe code and foreign functions are not allowed", r#"\bunsafe\b|\bextern\s+"C"|\bextern\s+crate\b|#\s*!?\s*\[\s*link\b"#),
            rule(Network, "Network access is not allowed", r"\bstd\s*::\s*net\b|\bstd\s*::\s*\{[^;]*\bnet\b|\b(?:TcpStream|TcpListener|UdpSocket)\b"),
            rule(Environment, "Environment access is not allowed", r"\bstd\s*::\s*env\b|\bstd\s*::\s*\{[^;]*\benv\b|\benv\s*!\s*\(|\boption_env\s*!"),
        ],
    );

    rules
}
