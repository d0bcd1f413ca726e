//! Arbitrary child processes with the assembled environment.

use anyhow::{Result, bail};

use crate::cli::RunOpts;
use crate::exec::{Executor, StreamSpec};

/// Run `cmd` with the same environment a compiled driver would see,
/// returning its exit code.
///
/// # Errors
///
/// Fails when no command was given or the command cannot be spawned.
pub fn run(opts: &RunOpts, cmd: &[String], exec: &dyn Executor) -> Result<i32> {
    let Some((program, args)) = cmd.split_first() else {
        bail!("exec needs a command to run");
    };
    let env = super::child_env(opts);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    exec.run_streamed(
        program,
        &arg_refs,
        &StreamSpec {
            dir: None,
            env: &env,
            stdin: None,
        },
    )
}
