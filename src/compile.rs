//! Invocation of the host compiler to produce a driver binary.

use std::path::Path;

use crate::error::StaveError;
use crate::exec::Executor;

/// Everything the compiler needs for one driver build.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    /// Compiler command, normally `rustc`.
    pub toolchain: &'a str,
    /// Directory holding the generated driver and task files.
    pub workdir: &'a Path,
    /// Basename of the generated driver source within `workdir`.
    pub driver: &'a str,
    /// Final binary path.
    pub output: &'a Path,
    /// Cross-compilation target triple.
    pub target: Option<&'a str>,
    /// Extra flags handed to the linker.
    pub link_args: Option<&'a str>,
}

/// Compile the driver (which mounts the task files as modules) into the
/// requested output path.
///
/// The compiler writes to a process-unique temporary name first and the
/// result is renamed into place, so concurrent builds of the same
/// fingerprint cannot observe a half-written binary.
///
/// # Errors
///
/// A non-zero compiler exit surfaces as `error compiling task files`
/// carrying the compiler's stderr; filesystem failures surface as I/O
/// errors.
pub fn compile(exec: &dyn Executor, request: &CompileRequest) -> Result<(), StaveError> {
    if let Some(parent) = request.output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| StaveError::io(parent.to_path_buf(), err))?;
    }
    let scratch = request.output.with_extension(format!("tmp{}", std::process::id()));
    let scratch_str = scratch.display().to_string();

    let mut args: Vec<String> = vec![
        "--edition".to_string(),
        "2024".to_string(),
        "-O".to_string(),
        request.driver.to_string(),
        "-o".to_string(),
        scratch_str,
    ];
    if let Some(target) = request.target {
        args.push("--target".to_string());
        args.push(target.to_string());
    }
    if let Some(link_args) = request.link_args {
        args.push("-C".to_string());
        args.push(format!("link-args={link_args}"));
    }
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    let result = exec
        .run_unchecked_in(request.workdir, request.toolchain, &arg_refs)
        .map_err(|err| StaveError::Compile {
            stderr: err.to_string(),
        })?;
    if !result.success {
        let _ = std::fs::remove_file(&scratch);
        return Err(StaveError::Compile {
            stderr: result.stderr.trim().to_string(),
        });
    }

    std::fs::rename(&scratch, request.output)
        .map_err(|err| StaveError::io(request.output.to_path_buf(), err))?;
    Ok(())
}

/// The toolchain's version line, used as a cache fingerprint component.
///
/// # Errors
///
/// Fails when the compiler cannot be invoked.
pub fn toolchain_version(exec: &dyn Executor, toolchain: &str) -> Result<String, StaveError> {
    let result = exec
        .run(toolchain, &["--version"])
        .map_err(|err| StaveError::Config(format!("cannot run {toolchain}: {err}")))?;
    Ok(result.stdout.trim().to_string())
}
