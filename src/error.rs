//! Domain-specific error types for the stave pipeline.
//!
//! Internal modules return typed errors ([`AnalysisError`], [`StaveError`])
//! while command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator. The entry point
//! translates the final value into a process exit code: errors carrying an
//! exit status contribute that status, everything else is 1, and usage
//! errors are 2.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the stave pipeline.
#[derive(Error, Debug)]
pub enum StaveError {
    /// Malformed configuration or an invalid flag combination.
    #[error("{0}")]
    Config(String),

    /// Task-file analysis failure.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The host compiler exited non-zero.
    #[error("error compiling task files: {stderr}")]
    Compile {
        /// Compiler stderr, trimmed.
        stderr: String,
    },

    /// A target returned an error or panicked; carries the exit code the
    /// process should report.
    #[error("{message}")]
    Execution {
        /// Exit code reported by the failed run.
        code: i32,
        /// Aggregated failure message.
        message: String,
    },

    /// The dependency graph has a cycle.
    #[error("circular dependency detected in tasks: {}", .nodes.join(", "))]
    CircularDependency {
        /// Implicated node identifiers, sorted.
        nodes: Vec<String>,
    },

    /// A declared dependency does not resolve.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Deadline exceeded before or during cleanup.
    #[error("{0}")]
    Timeout(String),

    /// A filesystem operation failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl StaveError {
    /// Wrap an I/O error with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The exit code this error wants the process to report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution { code, .. } => {
                if *code == 0 {
                    1
                } else {
                    *code
                }
            }
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Errors that arise while analysing task files.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// A task file does not parse as Rust.
    #[error("{}: parse error: {message}", .file.display())]
    Parse {
        /// File that failed to parse.
        file: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// Two functions compute the same case-insensitive target name.
    #[error("duplicate target {target:?} declared by {}", .sources.join(" and "))]
    DuplicateTarget {
        /// The colliding target name (lowercased).
        target: String,
        /// Human-readable declaration sites.
        sources: Vec<String>,
    },

    /// An alias collides with a target name or another alias.
    #[error("alias {alias:?} collides with {existing}")]
    AliasCollision {
        /// The colliding alias.
        alias: String,
        /// What it collided with.
        existing: String,
    },

    /// A function declares more than one cancellation-handle parameter.
    #[error("{function} in {}: too many context parameters", .file.display())]
    TooManyContexts {
        /// Offending function.
        function: String,
        /// Declaring file.
        file: PathBuf,
    },

    /// A function declares more than one return value.
    #[error("{function} in {}: too many return values", .file.display())]
    TooManyReturns {
        /// Offending function.
        function: String,
        /// Declaring file.
        file: PathBuf,
    },

    /// A parameter type outside the supported set appeared after the
    /// signature was already accepted.
    #[error("{function} in {}: unsupported argument type for {argument:?}", .file.display())]
    UnsupportedArgument {
        /// Offending function.
        function: String,
        /// Declaring file.
        file: PathBuf,
        /// Parameter name.
        argument: String,
    },

    /// `DEFAULT` names a target that was not discovered.
    #[error("default target {0:?} is not a known target")]
    UnknownDefault(String),

    /// `DEFAULT` was declared in more than one file.
    #[error("default target declared more than once")]
    DuplicateDefault,

    /// An alias maps to a target that was not discovered.
    #[error("alias {alias:?} maps to unknown target {target:?}")]
    UnknownAliasTarget {
        /// The alias key.
        alias: String,
        /// The unresolved target name.
        target: String,
    },

    /// Tagged imports form a cycle.
    #[error("import cycle detected: {}", .chain.join(" -> "))]
    ImportCycle {
        /// Package names along the cycle.
        chain: Vec<String>,
    },

    /// A tagged import could not be located by the toolchain.
    #[error("imported package {0:?} not found by the toolchain")]
    ImportNotFound(String),
}
