use anyhow::{Context, Result, bail};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Result of a captured command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Standard output as UTF-8 string.
    pub stdout: String,
    /// Standard error as UTF-8 string.
    pub stderr: String,
    /// Whether the command exited successfully (status code 0).
    pub success: bool,
    /// Exit code if available, or None if terminated by signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// How a streamed child process should be wired up.
#[derive(Debug, Default)]
pub struct StreamSpec<'a> {
    /// Working directory; inherits the parent's when `None`.
    pub dir: Option<&'a Path>,
    /// Extra environment variables.
    pub env: &'a [(String, String)],
    /// Bytes to feed to the child's stdin; stdin inherits when `None`.
    pub stdin: Option<&'a [u8]>,
}

/// Execute a command and return the result, bailing on non-zero exit.
fn execute_checked(mut cmd: Command, label: &str) -> Result<ExecResult> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to execute: {label}"))?;
    let result = ExecResult::from(output);
    if !result.success {
        let code = result.code.unwrap_or(-1);
        bail!("{label} failed (exit {code}): {}", result.stderr.trim());
    }
    Ok(result)
}

/// Run a command and return its output. Fails if the command exits non-zero.
///
/// # Errors
///
/// Returns an error if the command cannot be executed or exits with non-zero status.
pub fn run(program: &str, args: &[&str]) -> Result<ExecResult> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    execute_checked(cmd, program)
}

/// Run a command in a specific directory.
///
/// # Errors
///
/// Returns an error if the command cannot be executed or exits with non-zero status.
pub fn run_in(dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir);
    execute_checked(cmd, &format!("{program} in {}", dir.display()))
}

/// Run a command in a specific directory, allowing failure.
///
/// # Errors
///
/// Returns an error only if the command cannot be executed (not for non-zero exit).
pub fn run_unchecked_in(dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to execute: {program} in {}", dir.display()))?;

    Ok(ExecResult::from(output))
}

/// Run a command with inherited stdout/stderr, returning its exit code.
///
/// This is the contract the pipeline uses for compiled drivers and hook
/// targets: output streams through to the user, stdin is either inherited or
/// fed from a captured payload, and the exit status comes back untouched
/// (code -1 when the child was killed by a signal).
///
/// # Errors
///
/// Returns an error only if the command cannot be spawned.
pub fn run_streamed(program: &str, args: &[&str], spec: &StreamSpec) -> Result<i32> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = spec.dir {
        cmd.current_dir(dir);
    }
    for (k, v) in spec.env {
        cmd.env(k, v);
    }
    if spec.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to execute: {program}"))?;
    if let Some(payload) = spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload).ok();
        }
    }
    let status = child
        .wait()
        .with_context(|| format!("waiting for: {program}"))?;
    Ok(status.code().unwrap_or(-1))
}

/// Trait for executing system commands, enabling test injection.
///
/// Implement this trait to provide mock executors for unit tests.
/// The [`SystemExecutor`] implementation delegates to the real free functions.
pub trait Executor: std::fmt::Debug + Sync {
    /// Execute a command, bailing on non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute, cannot be found,
    /// or exits with a non-zero status code.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute, the directory does not exist,
    /// or the command exits with a non-zero status code.
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command in a specific directory, allowing non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute or cannot be found,
    /// but does NOT fail on non-zero exit codes (which are captured in the result).
    fn run_unchecked_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command with inherited stdio, returning the exit code.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command cannot be spawned.
    fn run_streamed(&self, program: &str, args: &[&str], spec: &StreamSpec) -> Result<i32>;
}

/// The real system executor that delegates to process spawning.
#[derive(Debug)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        run(program, args)
    }

    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        run_in(dir, program, args)
    }

    fn run_unchecked_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        run_unchecked_in(dir, program, args)
    }

    fn run_streamed(&self, program: &str, args: &[&str], spec: &StreamSpec) -> Result<i32> {
        run_streamed(program, args, spec)
    }
}
