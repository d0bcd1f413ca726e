//! Hook orchestration: mapping hook names to ordered target lists and
//! running them fail-fast.

pub mod script;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// File name of the hook plan at the repository root.
pub const PLAN_FILE: &str = "stave-hooks.toml";

/// One entry of a hook's ordered target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTarget {
    /// Target name handed to the runner.
    pub target: String,
    /// Configured arguments, prepended to invocation arguments.
    pub args: Vec<String>,
    /// Whether the target receives the hook's stdin.
    pub pass_stdin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Name(String),
    Full {
        target: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        pass_stdin: bool,
    },
}

impl From<RawTarget> for HookTarget {
    fn from(raw: RawTarget) -> Self {
        match raw {
            RawTarget::Name(target) => Self {
                target,
                args: Vec::new(),
                pass_stdin: false,
            },
            RawTarget::Full {
                target,
                args,
                pass_stdin,
            } => Self {
                target,
                args,
                pass_stdin,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPlan {
    #[serde(default)]
    hooks: BTreeMap<String, Vec<RawTarget>>,
}

/// The configured mapping from hook name to ordered target list.
#[derive(Debug, Default, Clone)]
pub struct HookPlan {
    hooks: BTreeMap<String, Vec<HookTarget>>,
}

impl HookPlan {
    /// Parse a plan from TOML text.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawPlan = toml::from_str(text).context("parsing hook plan")?;
        Ok(Self {
            hooks: raw
                .hooks
                .into_iter()
                .map(|(hook, targets)| {
                    (hook, targets.into_iter().map(HookTarget::from).collect())
                })
                .collect(),
        })
    }

    /// Load the plan from a repository root; `Ok(None)` when no plan file
    /// exists.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(PLAN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(Self::parse(&text)?))
    }

    /// The ordered targets configured for `hook`; empty when unconfigured.
    #[must_use]
    pub fn targets(&self, hook: &str) -> &[HookTarget] {
        self.hooks.get(hook).map_or(&[], Vec::as_slice)
    }

    /// Configured hook names, sorted.
    pub fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

/// Runs one resolved hook target, reporting its exit code.
///
/// Wired to the coordinator in production so a hook target goes through the
/// same compile-and-run pipeline as a direct invocation.
pub trait TargetRunner: std::fmt::Debug {
    /// Run `target` with `args`; `pass_stdin` wires the hook's stdin
    /// through.
    ///
    /// # Errors
    ///
    /// Returns an error only when the target could not be run at all; a
    /// non-zero exit is reported through the code.
    fn run_target(&self, target: &str, args: &[String], pass_stdin: bool) -> Result<i32>;
}

/// What happened to one target of a hook invocation.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    /// Target name.
    pub name: String,
    /// Full argument list it ran with.
    pub args: Vec<String>,
    /// Exit code (0 when the runner errored before producing one).
    pub exit_code: i32,
    /// Wall-clock duration of the target.
    pub duration: Duration,
    /// Runner error, when the target could not be run.
    pub error: Option<String>,
}

/// The reported outcome of one hook invocation.
#[derive(Debug, Clone)]
pub struct HookReport {
    /// Hook name.
    pub hook: String,
    /// Outcomes of the targets that actually ran, in order.
    pub targets: Vec<TargetOutcome>,
    /// Zero on success, else the first non-zero exit (or 1 for a runner
    /// error without an exit code).
    pub exit_code: i32,
    /// Total elapsed time.
    pub elapsed: Duration,
    /// Whether the hook master switch disabled the run.
    pub disabled: bool,
}

impl HookReport {
    /// The fail-fast diagnostic, when the hook failed.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        if self.exit_code == 0 {
            return None;
        }
        self.targets
            .iter()
            .find(|outcome| outcome.exit_code != 0 || outcome.error.is_some())
            .map(|outcome| {
                format!(
                    "hook {} failed at target {} (exit {})",
                    self.hook, outcome.name, self.exit_code
                )
            })
    }
}

/// Run `hook`'s configured targets sequentially, stopping at the first
/// failure.
///
/// `disabled` short-circuits to success with no targets run (the caller
/// prints the diagnostic); a missing plan or an unconfigured hook is also
/// success with no targets.
pub fn run_hook(
    plan: Option<&HookPlan>,
    hook: &str,
    invocation_args: &[String],
    runner: &dyn TargetRunner,
    disabled: bool,
) -> HookReport {
    let started = Instant::now();
    let mut report = HookReport {
        hook: hook.to_string(),
        targets: Vec::new(),
        exit_code: 0,
        elapsed: Duration::ZERO,
        disabled,
    };
    if disabled {
        return report;
    }
    let targets = plan.map_or(&[][..], |plan| plan.targets(hook));
    for target in targets {
        let mut args = target.args.clone();
        args.extend(invocation_args.iter().cloned());

        let target_started = Instant::now();
        let (exit_code, error) = match runner.run_target(&target.target, &args, target.pass_stdin)
        {
            Ok(code) => (code, None),
            Err(err) => (0, Some(format!("{err:#}"))),
        };
        let failed = exit_code != 0 || error.is_some();
        report.targets.push(TargetOutcome {
            name: target.target.clone(),
            args,
            exit_code,
            duration: target_started.elapsed(),
            error,
        });
        if failed {
            report.exit_code = if exit_code != 0 { exit_code } else { 1 };
            break;
        }
    }
    report.elapsed = started.elapsed();
    report
}
