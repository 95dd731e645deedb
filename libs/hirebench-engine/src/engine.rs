/// Sandbox Executor - Isolated Child Process Execution
///
/// **Core Responsibility:**
/// Compile (when needed) and run one program in a throwaway workspace and
/// capture its raw output.
///
/// **Critical Architectural Boundary:**
/// - Executor knows HOW to run a program safely
/// - Executor does NOT know what the program was supposed to print
/// - Executor returns raw outputs for the comparator to judge
///
/// **Isolation Rules:**
/// 1. Every run gets a fresh workspace directory, removed on drop
/// 2. The child sees a scrubbed environment (fixed PATH, HOME = workspace)
/// 3. The child leads its own process group; the whole group is killed
///    once the leader exits or the deadline passes
/// 4. Core dumps are disabled and an address-space ceiling is applied where
///    the runtime allows it
/// 5. stdout and stderr are captured up to a byte cap each

use crate::config::LanguageConfigManager;
use crate::harness::{CommandSpec, LanguageRuntime};
use async_trait::async_trait;
use hirebench_common::config::ExecutionLimits;
use hirebench_common::types::{ErrorKind, ExecutionResult, Language};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Per-run scratch directory - guarantees removal on drop
///
/// Removal runs even if execution panics or the future is cancelled.
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn create(root: &Path) -> Result<Self, SandboxError> {
        let path = root.join(format!("hirebench-{}", Uuid::new_v4()));

        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&path)
            .map_err(|source| SandboxError::Workspace {
                path: path.clone(),
                source,
            })?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, SandboxError> {
        let file_path = self.path.join(name);
        std::fs::write(&file_path, contents).map_err(|source| SandboxError::Workspace {
            path: file_path.clone(),
            source,
        })?;
        Ok(file_path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Raw result of one child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map_or(false, |s| s.success())
    }

    /// Exit code, or 128 + signal number for signalled children.
    pub fn exit_code(&self) -> Option<i32> {
        let status = self.status?;
        status.code().or_else(|| status.signal().map(|sig| 128 + sig))
    }
}

#[derive(Debug, Default)]
struct CappedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CappedOutput {
    fn into_string(mut self, cap: usize) -> (String, bool) {
        if self.truncated {
            // Drop a multi-byte character split by the cap
            if let Err(e) = std::str::from_utf8(&self.bytes) {
                if e.error_len().is_none() {
                    self.bytes.truncate(e.valid_up_to());
                }
            }
        }
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(&format!("\n[output truncated at {} bytes]", cap));
        }
        (text, self.truncated)
    }
}

/// Keep the first `cap` bytes and drain the rest so the writer never blocks.
async fn read_capped<R>(mut reader: R, cap: usize) -> CappedOutput
where
    R: AsyncRead + Unpin,
{
    let mut output = CappedOutput::default();
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(output.bytes.len());
                if n > room {
                    output.truncated = true;
                }
                output.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }

    output
}

fn spawn_reader<R>(pipe: Option<R>, cap: usize) -> JoinHandle<CappedOutput>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match pipe {
            Some(pipe) => read_capped(pipe, cap).await,
            None => CappedOutput::default(),
        }
    })
}

/// Wait for a reader until `deadline`, abandoning it afterwards. A reader
/// only outlives the deadline when something outside the process group
/// still holds the pipe open.
async fn collect(mut handle: JoinHandle<CappedOutput>, deadline: tokio::time::Instant) -> CappedOutput {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            CappedOutput::default()
        }
        Err(_) => {
            handle.abort();
            warn!("Output reader still open after kill grace period");
            CappedOutput::default()
        }
    }
}

fn kill_group(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        // ESRCH just means the group is already gone
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

fn signal_note(signal: i32) -> String {
    match signal {
        9 => "\n[Process killed (SIGKILL): likely exceeded a resource limit]".to_string(),
        11 => "\n[Process killed: segmentation fault]".to_string(),
        6 => "\n[Process aborted (SIGABRT)]".to_string(),
        other => format!("\n[Process terminated by signal {}]", other),
    }
}

/// Run one command inside `cwd` under the sandbox rules.
pub async fn run_process(
    spec: &CommandSpec,
    cwd: &Path,
    stdin: Option<&str>,
    limits: &ExecutionLimits,
    timeout_ms: u64,
) -> Result<ProcessOutput, SandboxError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(cwd)
        .env_clear()
        .env("PATH", &limits.sandbox_path)
        .env("HOME", cwd)
        .env("TMPDIR", cwd)
        .env("TMP", cwd)
        .env("TEMP", cwd)
        .env("LANG", "C.UTF-8")
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let memory_limit = spec.memory_limit_bytes;
    // SAFETY: the hook only calls setrlimit, which is async-signal-safe and
    // touches no memory shared with the parent.
    unsafe {
        command.pre_exec(move || {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            if let Some(bytes) = memory_limit {
                let bytes = bytes as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            Ok(())
        });
    }

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pgid = child.id().map(|id| Pid::from_raw(id as i32));
    debug!(program = %spec.program, pid = ?pgid, "Spawned child process");

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        tokio::spawn(async move {
            // The child may exit without reading all of it
            let _ = pipe.write_all(input.as_bytes()).await;
        });
    }

    let cap = limits.max_output_bytes;
    let stdout_reader = spawn_reader(child.stdout.take(), cap);
    let stderr_reader = spawn_reader(child.stderr.take(), cap);

    // HARD TIMEOUT
    let (status, timed_out) = match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
        Ok(status) => (status.map_err(SandboxError::Wait)?, false),
        Err(_) => {
            debug!(program = %spec.program, timeout_ms, "Deadline passed, killing process group");
            kill_group(pgid);
            (child.wait().await.map_err(SandboxError::Wait)?, true)
        }
    };
    // Descendants left behind by the leader
    kill_group(pgid);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(
        program = %spec.program,
        execution_ms = elapsed_ms,
        timed_out,
        exit_code = ?status.code(),
        "Child process finished"
    );

    let deadline = tokio::time::Instant::now() + Duration::from_millis(limits.kill_grace_ms);
    let (stdout, stdout_truncated) = collect(stdout_reader, deadline).await.into_string(cap);
    let (mut stderr, stderr_truncated) = collect(stderr_reader, deadline).await.into_string(cap);

    if !timed_out {
        if let Some(signal) = status.signal() {
            stderr.push_str(&signal_note(signal));
        }
    }

    Ok(ProcessOutput {
        stdout,
        stderr,
        status: Some(status),
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
        elapsed_ms,
    })
}

/// Seam between the orchestrator and process execution.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Compile if the runtime needs it, then run. Never fails: every problem
    /// is reported inside the `ExecutionResult`.
    async fn compile_and_run(
        &self,
        program: &str,
        runtime: &dyn LanguageRuntime,
        stdin: Option<&str>,
    ) -> ExecutionResult;
}

/// Local child-process sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    limits: ExecutionLimits,
    memory_overrides: HashMap<Language, u64>,
}

impl SandboxExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            memory_overrides: HashMap::new(),
        }
    }

    /// Apply per-language memory limits from the language configuration.
    pub fn with_language_config(mut self, config: &LanguageConfigManager) -> Self {
        for language in config.list_languages() {
            if let Some(mb) = config.get_memory_limit_mb(&language) {
                self.memory_overrides.insert(language, mb);
            }
        }
        self
    }

    fn limits_for(&self, language: Language) -> Cow<'_, ExecutionLimits> {
        match self.memory_overrides.get(&language) {
            Some(&mb) => {
                let mut limits = self.limits.clone();
                limits.memory_limit_mb = mb;
                Cow::Owned(limits)
            }
            None => Cow::Borrowed(&self.limits),
        }
    }

    async fn try_compile_and_run(
        &self,
        program: &str,
        runtime: &dyn LanguageRuntime,
        stdin: Option<&str>,
    ) -> Result<ExecutionResult, SandboxError> {
        let limits = self.limits_for(runtime.language());
        let workspace = Workspace::create(&limits.workspace_root)?;
        let source_path = workspace.write_file(&runtime.source_file_name(program), program)?;

        if let Some(compile) = runtime.compile_command(&source_path, &limits) {
            let output = run_process(&compile, workspace.path(), None, &limits, limits.compile_timeout_ms).await?;

            if output.timed_out {
                return Ok(ExecutionResult {
                    exit_code: output.exit_code(),
                    stdout: output.stdout,
                    stderr: format!("Compilation timed out after {}ms", limits.compile_timeout_ms),
                    has_error: true,
                    wall_time_ms: output.elapsed_ms,
                    error_kind: Some(ErrorKind::Timeout),
                    truncated: output.truncated,
                });
            }

            if !output.success() {
                debug!(language = %runtime.language(), "Compilation failed");
                let exit_code = output.exit_code();
                // Compilers split diagnostics across both streams
                let mut diagnostics = output.stderr;
                if !output.stdout.trim().is_empty() {
                    if !diagnostics.is_empty() {
                        diagnostics.push('\n');
                    }
                    diagnostics.push_str(&output.stdout);
                }
                return Ok(ExecutionResult {
                    stdout: String::new(),
                    stderr: diagnostics,
                    has_error: true,
                    error_kind: Some(ErrorKind::CompileError),
                    exit_code,
                    truncated: output.truncated,
                    ..Default::default()
                });
            }
        }

        let run = runtime.run_command(&source_path, &limits);
        let output = run_process(&run, workspace.path(), stdin, &limits, limits.execution_timeout_ms).await?;
        let exit_code = output.exit_code();

        if output.timed_out {
            let mut stderr = output.stderr;
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("[Execution timed out after {}ms]", limits.execution_timeout_ms));

            return Ok(ExecutionResult {
                stdout: output.stdout,
                stderr,
                has_error: true,
                wall_time_ms: output.elapsed_ms,
                error_kind: Some(ErrorKind::Timeout),
                exit_code,
                truncated: output.truncated,
            });
        }

        let failed = !output.success();
        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            has_error: failed,
            wall_time_ms: output.elapsed_ms,
            error_kind: failed.then_some(ErrorKind::RuntimeError),
            exit_code,
            truncated: output.truncated,
        })
    }
}

#[async_trait]
impl Sandbox for SandboxExecutor {
    async fn compile_and_run(
        &self,
        program: &str,
        runtime: &dyn LanguageRuntime,
        stdin: Option<&str>,
    ) -> ExecutionResult {
        match self.try_compile_and_run(program, runtime, stdin).await {
            Ok(result) => result,
            Err(e) => {
                warn!(language = %runtime.language(), "Sandbox failure: {}", e);
                ExecutionResult::failure(ErrorKind::RuntimeError, e.to_string())
            }
        }
    }
}
