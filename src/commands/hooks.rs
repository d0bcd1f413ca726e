//! Hook subcommands: init, install, uninstall, list, run.

use std::path::Path;

use anyhow::{Context as _, Result, bail};

use crate::cli::HooksCommand;
use crate::exec::{Executor, StreamSpec};
use crate::hooks::{self, HookPlan, TargetRunner, script};
use crate::repo;
use crate::rt::env_names;

/// Starter hook plan written by `hooks init`.
const STARTER_PLAN: &str = r#"# Targets run by stave when version-control hooks fire.
# Each hook maps to an ordered list; the first failure stops the run.

[hooks]
pre-commit = []
pre-push = []
"#;

/// Dispatch one hooks subcommand, returning the exit code.
///
/// # Errors
///
/// Fails on repository discovery, plan, or filesystem errors.
pub fn run(command: &HooksCommand, exec: &dyn Executor) -> Result<i32> {
    match command {
        HooksCommand::Init => {
            let info = repo::discover(Path::new("."))?;
            let path = info.root.join(hooks::PLAN_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(&path, STARTER_PLAN)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("created {}", path.display());
            Ok(0)
        }
        HooksCommand::Install => {
            let info = repo::discover(Path::new("."))?;
            let plan = HookPlan::load(&info.root)?
                .context("no hook plan found; run `stave hooks init` first")?;
            let names: Vec<&str> = plan.hook_names().collect();
            if names.is_empty() {
                bail!("hook plan configures no hooks");
            }
            let installed = script::install(&info.hooks_dir(), &names)?;
            for path in installed {
                println!("installed {}", path.display());
            }
            Ok(0)
        }
        HooksCommand::Uninstall => {
            let info = repo::discover(Path::new("."))?;
            let removed = script::uninstall(&info.hooks_dir())?;
            if removed.is_empty() {
                println!("no stave-managed hooks found");
            }
            for name in removed {
                println!("removed {name}");
            }
            Ok(0)
        }
        HooksCommand::List => {
            let info = repo::discover(Path::new("."))?;
            match HookPlan::load(&info.root)? {
                None => println!("no hook plan found"),
                Some(plan) => {
                    for hook in plan.hook_names() {
                        let targets: Vec<String> = plan
                            .targets(hook)
                            .iter()
                            .map(|t| t.target.clone())
                            .collect();
                        println!("{hook}: {}", targets.join(", "));
                    }
                }
            }
            Ok(0)
        }
        HooksCommand::Run { hook, args } => run_one(hook, args, exec),
    }
}

fn run_one(hook: &str, args: &[String], exec: &dyn Executor) -> Result<i32> {
    let disabled = std::env::var(env_names::HOOKS).is_ok_and(|v| v == "0");
    if disabled {
        eprintln!("stave hooks disabled by {}=0", env_names::HOOKS);
    }
    let plan = match repo::discover(Path::new(".")) {
        Ok(info) => HookPlan::load(&info.root)?,
        Err(_) => HookPlan::load(Path::new("."))?,
    };
    let runner = SelfRunner { exec };
    let report = hooks::run_hook(plan.as_ref(), hook, args, &runner, disabled);
    if let Some(message) = report.failure_message() {
        eprintln!("{message}");
    }
    Ok(report.exit_code)
}

/// Runs hook targets by re-invoking this executable, so a hook target goes
/// through the normal compile-and-run pipeline.
#[derive(Debug)]
struct SelfRunner<'a> {
    exec: &'a dyn Executor,
}

impl TargetRunner for SelfRunner<'_> {
    fn run_target(&self, target: &str, args: &[String], pass_stdin: bool) -> Result<i32> {
        let this = std::env::current_exe().context("locating own executable")?;
        let mut child_args: Vec<&str> = vec![target];
        child_args.extend(args.iter().map(String::as_str));
        let env = vec![(env_names::HOOKS_RUNNING.to_string(), "1".to_string())];
        // An empty stdin payload pipes immediate EOF at the target, keeping
        // the hook's stdin for targets that declared pass_stdin.
        let spec = StreamSpec {
            dir: None,
            env: &env,
            stdin: if pass_stdin { None } else { Some(&[]) },
        };
        self.exec
            .run_streamed(&this.display().to_string(), &child_args, &spec)
    }
}
