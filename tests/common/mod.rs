// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed task directory plus a scripted
// executor so each integration test can exercise the pipeline without a
// real compiler. Used by all integration test binaries that declare
// `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use stave::exec::{ExecResult, Executor, StreamSpec};

/// A representative task file: default target, alias, typed arguments, and
/// a namespace.
pub const SIMPLE_TASKS: &str = r#"//! Demo project tasks.

pub const DEFAULT: &str = "build";

pub const ALIASES: &[(&str, &str)] = &[("b", "build")];

/// Compile the project.
pub fn build(ctx: &crate::stave::Context) -> crate::stave::TaskResult {
    let _ = ctx;
    Ok(())
}

/// Print a message a number of times.
pub fn say(msg: String, count: i64) {
    let _ = (msg, count);
}

pub struct Db;
impl crate::stave::Namespace for Db {}

impl Db {
    /// Apply migrations.
    pub fn migrate() {}
}
"#;

/// Create `<root>/stavefiles/tasks.rs` with [`SIMPLE_TASKS`] and return the
/// dedicated directory.
pub fn write_task_dir(root: &Path) -> PathBuf {
    let dir = root.join("stavefiles");
    std::fs::create_dir_all(&dir).expect("create task dir");
    std::fs::write(dir.join("tasks.rs"), SIMPLE_TASKS).expect("write tasks.rs");
    dir
}

fn ok_result(stdout: &str) -> ExecResult {
    ExecResult {
        stdout: stdout.to_string(),
        stderr: String::new(),
        success: true,
        code: Some(0),
    }
}

/// Scripted executor: answers `--version`, pretends to compile by creating
/// the `-o` output file, records streamed child invocations, and plays back
/// a canned exit code for them.
#[derive(Debug)]
pub struct FakeToolchain {
    /// How many compile invocations were made.
    pub compiles: Mutex<usize>,
    /// `(program, args)` of each streamed child run.
    pub streamed: Mutex<Vec<(String, Vec<String>)>>,
    /// Exit code played back for streamed children.
    pub child_exit: i32,
    /// Metadata JSON played back for `cargo metadata`, when imports are in
    /// play.
    pub metadata: Option<String>,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self {
            compiles: Mutex::new(0),
            streamed: Mutex::new(Vec::new()),
            child_exit: 0,
            metadata: None,
        }
    }
}

impl Executor for FakeToolchain {
    fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
        if args == ["--version"] {
            return Ok(ok_result(&format!("{program} 1.91.0 (fake)")));
        }
        panic!("unexpected run({program}, {args:?}) in test");
    }

    fn run_in(&self, _dir: &Path, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
        if program == "cargo" && args.first() == Some(&"metadata") {
            let metadata = self
                .metadata
                .as_ref()
                .expect("test did not configure metadata");
            return Ok(ok_result(metadata));
        }
        panic!("unexpected run_in({program}, {args:?}) in test");
    }

    fn run_unchecked_in(
        &self,
        _dir: &Path,
        _program: &str,
        args: &[&str],
    ) -> anyhow::Result<ExecResult> {
        *self.compiles.lock().unwrap() += 1;
        let out_at = args
            .iter()
            .position(|a| *a == "-o")
            .expect("compile invocation must carry -o");
        std::fs::write(args[out_at + 1], "fake driver binary").expect("write fake binary");
        Ok(ok_result(""))
    }

    fn run_streamed(&self, program: &str, args: &[&str], _spec: &StreamSpec) -> anyhow::Result<i32> {
        self.streamed.lock().unwrap().push((
            program.to_string(),
            args.iter().map(|a| (*a).to_string()).collect(),
        ));
        Ok(self.child_exit)
    }
}
