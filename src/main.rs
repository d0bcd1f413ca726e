//! Task-runner binary entry point.
use clap::Parser;
use stave::error::StaveError;
use stave::{cli, commands, exec, logging};

fn main() {
    enable_ansi_support::enable_ansi_support().ok(); // best-effort; no-op on non-Windows
    let args = cli::Cli::parse();
    logging::init_subscriber(args.run.verbose, args.run.debug);
    let executor = exec::SystemExecutor;

    let result = match &args.command {
        Some(cli::Command::Init) => commands::init::run().map(|()| 0),
        Some(cli::Command::Clean) => commands::clean::run().map(|()| 0),
        Some(cli::Command::Hooks(hooks)) => commands::hooks::run(&hooks.command, &executor),
        Some(cli::Command::Exec(exec_opts)) => {
            commands::exec::run(&args.run, &exec_opts.cmd, &executor)
        }
        None => commands::run::run(&args.run, &args.args, &executor),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<StaveError>()
                .map_or(1, StaveError::exit_code);
            std::process::exit(code);
        }
    }
}
