use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "stave",
    about = "Compiled task runner: discovers task functions, caches a driver binary, runs dependency graphs",
    version,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunOpts,

    /// Target to run followed by its arguments
    #[arg(value_name = "TARGET", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct RunOpts {
    /// Log dependency execution
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log pipeline internals
    #[arg(long, global = true)]
    pub debug: bool,

    /// List discovered targets
    #[arg(short, long)]
    pub list: bool,

    /// Print documentation for the named target
    #[arg(short, long)]
    pub info: bool,

    /// Retain the generated driver source file
    #[arg(short, long)]
    pub keep: bool,

    /// Ignore a cached driver binary and rebuild
    #[arg(short, long)]
    pub force: bool,

    /// Expose a dry-run flag to task code without suppressing compilation
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Cancel the run after the given duration (e.g. 30s, 5m)
    #[arg(short, long, value_name = "DUR")]
    pub timeout: Option<String>,

    /// Compile a standalone driver to this path instead of running
    #[arg(long, value_name = "PATH")]
    pub compile_out: Option<std::path::PathBuf>,

    /// Cross-compile for a target triple (requires --compile-out)
    #[arg(long, value_name = "TRIPLE")]
    pub target: Option<String>,

    /// Extra flags handed to the linker
    #[arg(long, value_name = "FLAGS")]
    pub link_args: Option<String>,

    /// Fingerprint only the task files, skipping the toolchain version
    #[arg(long)]
    pub hashfast: bool,

    /// Task directory (default: ./stavefiles when present, else .)
    #[arg(short = 'C', long, value_name = "PATH")]
    pub dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scaffold a starter task file
    Init,
    /// Remove compiled drivers from the cache directory
    Clean,
    /// Manage version-control hooks
    Hooks(HooksOpts),
    /// Run an arbitrary command with the assembled environment
    Exec(ExecOpts),
}

#[derive(Parser, Debug, Clone)]
pub struct HooksOpts {
    #[command(subcommand)]
    pub command: HooksCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HooksCommand {
    /// Write a starter hook plan at the repository root
    Init,
    /// Install shim scripts for every configured hook
    Install,
    /// Remove stave-managed shim scripts
    Uninstall,
    /// Print the configured hooks and their targets
    List,
    /// Run one hook's targets fail-fast
    Run {
        /// Hook name (pre-commit, pre-push, ...)
        hook: String,
        /// Arguments forwarded to every target
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct ExecOpts {
    /// Command and arguments to run
    #[arg(
        value_name = "CMD",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true
    )]
    pub cmd: Vec<String>,
}
