//! Top-level command handlers: target execution, init, clean, hooks, exec.

pub mod clean;
pub mod exec;
pub mod hooks;
pub mod init;
pub mod run;

use crate::cli::RunOpts;
use crate::rt::env_names;

/// The tool's version string, embedded in the cache fingerprint.
#[must_use]
pub fn tool_version() -> &'static str {
    option_env!("STAVE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// The host compiler command: `STAVEFILE_RUSTC` override, else `rustc`.
#[must_use]
pub fn toolchain_command() -> String {
    std::env::var(env_names::RUSTC)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "rustc".to_string())
}

/// Environment re-exporting the flag state, handed to compiled drivers and
/// `exec` children.
#[must_use]
pub fn child_env(opts: &RunOpts) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    let mut flag = |name: &str, value: bool| {
        if value {
            env.push((name.to_string(), "1".to_string()));
        }
    };
    flag(env_names::VERBOSE, opts.verbose);
    flag(env_names::DEBUG, opts.debug);
    flag(env_names::LIST, opts.list);
    flag(env_names::INFO, opts.info);
    flag(env_names::DRYRUN, opts.dry_run);
    flag(env_names::HASHFAST, opts.hashfast);
    env.push((env_names::DRYRUN_POSSIBLE.to_string(), "1".to_string()));
    if let Some(timeout) = &opts.timeout {
        env.push((env_names::TIMEOUT.to_string(), timeout.clone()));
    }
    env.push((env_names::RUSTC.to_string(), toolchain_command()));
    let processors = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
    env.push((env_names::NUM_PROCESSORS.to_string(), processors.to_string()));
    env
}
