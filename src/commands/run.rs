//! Target execution: select, analyse, render, compile (or reuse the cached
//! driver), then hand off to the compiled binary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::analyse::{Analyser, select};
use crate::cli::RunOpts;
use crate::compile::{self, CompileRequest};
use crate::error::StaveError;
use crate::exec::{Executor, StreamSpec};
use crate::rt::env_names;
use crate::{cache, render};

/// Cargo command used to locate tagged imports.
const METADATA_COMMAND: &str = "cargo";

/// Run the target-execution pipeline, returning the exit code the process
/// should report.
///
/// # Errors
///
/// Fails on invalid flag combinations, selection/analysis/compile errors,
/// or when the compiled driver cannot be spawned.
pub fn run(opts: &RunOpts, args: &[String], exec: &dyn Executor) -> Result<i32> {
    validate(opts, args)?;

    let (task_dir, dedicated) = resolve_task_dir(opts)?;
    let task_dir = dunce::canonicalize(&task_dir)
        .map_err(|err| StaveError::io(task_dir.clone(), err))?;
    let platform = target_platform(opts.target.as_deref());
    let files = select::select_task_files(&task_dir, &platform, dedicated)?;
    if files.is_empty() {
        return Err(StaveError::Config(format!(
            "no task files found in {}",
            task_dir.display()
        ))
        .into());
    }

    let toolchain = super::toolchain_command();
    let hashfast =
        opts.hashfast || crate::rt::parse_bool_env(env_names::HASHFAST) == Some(true);
    let toolchain_version = if hashfast {
        None
    } else {
        Some(compile::toolchain_version(exec, &toolchain)?)
    };

    let template = render::template_source();
    let fingerprint = cache::fingerprint(
        &files,
        &template,
        toolchain_version.as_deref(),
        super::tool_version(),
    )?;
    let output = opts
        .compile_out
        .clone()
        .unwrap_or_else(|| cache::binary_path(&cache::cache_dir(), &fingerprint));

    let reuse = output.is_file() && !opts.force && opts.compile_out.is_none();
    if reuse {
        tracing::debug!("using cached driver {}", output.display());
    } else {
        build_driver(opts, exec, &task_dir, &platform, &files, &toolchain, &output)?;
    }

    if opts.compile_out.is_some() {
        println!("compiled driver to {}", output.display());
        return Ok(0);
    }

    relay_interrupts();
    let env = super::child_env(opts);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let code = exec.run_streamed(
        &output.display().to_string(),
        &arg_refs,
        &StreamSpec {
            dir: Some(&task_dir),
            env: &env,
            stdin: None,
        },
    )?;
    Ok(code)
}

fn validate(opts: &RunOpts, args: &[String]) -> Result<(), StaveError> {
    if (opts.target.is_some() || opts.link_args.is_some()) && opts.compile_out.is_none() {
        return Err(StaveError::Config(
            "cross-compilation flags require --compile-out".to_string(),
        ));
    }
    if opts.info && args.len() != 1 {
        return Err(StaveError::Config(
            "--info requires exactly one target".to_string(),
        ));
    }
    if let Some(timeout) = &opts.timeout {
        crate::rt::parse_duration(timeout).map_err(StaveError::Config)?;
    }
    Ok(())
}

/// The task directory and whether it follows the dedicated-directory
/// convention: an explicit `-C` directory is dedicated when it is named
/// `stavefiles`; otherwise `./stavefiles` is preferred when present.
fn resolve_task_dir(opts: &RunOpts) -> Result<(PathBuf, bool), StaveError> {
    if let Some(dir) = &opts.dir {
        let dedicated = dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == select::DEDICATED_DIR);
        return Ok((dir.clone(), dedicated));
    }
    let dedicated_dir = Path::new(select::DEDICATED_DIR);
    if dedicated_dir.is_dir() {
        return Ok((dedicated_dir.to_path_buf(), true));
    }
    Ok((PathBuf::from("."), false))
}

/// Map a cross-compilation triple to the platform token used for file
/// selection; the host OS when no triple is given.
fn target_platform(triple: Option<&str>) -> String {
    match triple {
        Some(triple) if triple.contains("windows") => "windows".to_string(),
        Some(triple) if triple.contains("apple") || triple.contains("darwin") => {
            "macos".to_string()
        }
        Some(triple) if triple.contains("linux") => "linux".to_string(),
        Some(_) | None => std::env::consts::OS.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_driver(
    opts: &RunOpts,
    exec: &dyn Executor,
    task_dir: &Path,
    platform: &str,
    files: &[PathBuf],
    toolchain: &str,
    output: &Path,
) -> Result<()> {
    let analyser = Analyser::new(exec, METADATA_COMMAND, platform);
    let package = analyser.analyse(files)?;
    tracing::debug!(
        "analysed {} targets across {} files",
        package.all_functions().len(),
        files.len()
    );

    let source = render::render(&render::RenderRequest {
        package: &package,
        binary_name: "stave",
        files,
        task_dir,
    });
    let driver_path = render::write_driver(task_dir, &source)?;

    let result = compile::compile(
        exec,
        &CompileRequest {
            toolchain,
            workdir: task_dir,
            driver: render::DRIVER_FILE,
            output,
            target: opts.target.as_deref(),
            link_args: opts.link_args.as_deref(),
        },
    );
    if !opts.keep {
        std::fs::remove_file(&driver_path).ok();
    }
    result?;
    Ok(())
}

/// First interrupt: let the child (which shares the terminal's process
/// group) wind down and report its status. Second interrupt: force exit.
fn relay_interrupts() {
    static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);
    ctrlc::set_handler(|| {
        let count = INTERRUPTS.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= 2 {
            eprintln!("exit forced");
            std::process::exit(1);
        }
    })
    .ok();
}
