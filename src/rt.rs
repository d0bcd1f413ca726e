//! Self-contained task runtime shared by the tool and every generated driver.
//!
//! This file is compiled twice: once as a normal module of this crate (so the
//! executor is unit-tested in-process), and once as the `stave` module that
//! the driver renderer embeds verbatim — minus the test module — into every
//! generated driver. The embedded copy is what task files address as
//! `crate::stave`. Because generated drivers must compile with nothing but
//! the standard library, nothing in this file may reference another crate.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// How long a cancelled target gets to clean up before the run is abandoned.
pub const CLEANUP_WINDOW: Duration = Duration::from_secs(5);

/// Pseudo-node representing the driver entry point in the dependency graph.
const ROOT_NODE: &str = "main";

/// Environment variable names understood by the driver and re-exported by the
/// coordinator when it spawns a compiled driver.
pub mod env_names {
    /// Mirror of the `--verbose` flag.
    pub const VERBOSE: &str = "STAVEFILE_VERBOSE";
    /// Mirror of the `--debug` flag.
    pub const DEBUG: &str = "STAVEFILE_DEBUG";
    /// Mirror of the `--list` flag.
    pub const LIST: &str = "STAVEFILE_LIST";
    /// Mirror of the `--info` flag.
    pub const INFO: &str = "STAVEFILE_INFO";
    /// Mirror of the `--timeout` flag (duration string).
    pub const TIMEOUT: &str = "STAVEFILE_TIMEOUT";
    /// When truthy, an undeclared target does not fall back to the default.
    pub const IGNORE_DEFAULT: &str = "STAVEFILE_IGNOREDEFAULT";
    /// Enables ANSI colour in target listings.
    pub const ENABLE_COLOR: &str = "STAVEFILE_ENABLE_COLOR";
    /// Colour name used for target names in listings.
    pub const TARGET_COLOR: &str = "STAVEFILE_TARGET_COLOR";
    /// Override for the cache directory.
    pub const CACHE: &str = "STAVEFILE_CACHE";
    /// When truthy, the cache fingerprint covers task files only.
    pub const HASHFAST: &str = "STAVEFILE_HASHFAST";
    /// Override for the host compiler command.
    pub const RUSTC: &str = "STAVEFILE_RUSTC";
    /// Set when the user asked for a dry run; observable by task code.
    pub const DRYRUN: &str = "STAVEFILE_DRYRUN";
    /// Advertises that the invoking tool understands dry runs.
    pub const DRYRUN_POSSIBLE: &str = "STAVEFILE_DRYRUN_POSSIBLE";
    /// Number of logical processors, exported for task code.
    pub const NUM_PROCESSORS: &str = "STAVEFILE_NUM_PROCESSORS";
    /// Hook master switch: `0` disables, `debug` traces generated scripts.
    pub const HOOKS: &str = "STAVE_HOOKS";
    /// Set while the hook orchestrator re-enters the tool.
    pub const HOOKS_RUNNING: &str = "STAVE_HOOKS_RUNNING";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a task or of the executor, carrying a process exit code.
///
/// Task functions return `Result<(), Error>` (aliased as [`TaskResult`]); the
/// executor aggregates these and panics recovered from task bodies into a
/// single `Error` whose message is the newline-joined list of failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    code: i32,
    message: String,
}

impl Error {
    /// An error with the conventional exit code 1.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    /// An error carrying a specific exit code.
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The exit code this failure wants the process to report.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// The human-readable failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

/// What a task function returns.
pub type TaskResult = Result<(), Error>;

/// Convert a task function's `Result<(), E>` into the runtime error type,
/// preserving the exit code when the error already is one. Used by generated
/// dispatch code, which cannot know the concrete error type.
///
/// # Errors
///
/// Propagates the converted failure.
pub fn into_task_result<E>(result: Result<(), E>) -> TaskResult
where
    E: fmt::Display + Any,
{
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(typed) = (&err as &dyn Any).downcast_ref::<Error>() {
                return Err(typed.clone());
            }
            Err(Error::msg(err.to_string()))
        }
    }
}

/// Combine two exit codes: zero yields to non-zero, and two different
/// non-zero codes collapse to 1.
#[must_use]
pub const fn combine_codes(a: i32, b: i32) -> i32 {
    if a == 0 {
        b
    } else if b == 0 || a == b {
        a
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Cancellation context
// ---------------------------------------------------------------------------

/// Cancellation and deadline handle passed to task functions.
///
/// Cancellation is cooperative: the executor never kills a running task, it
/// sets the flag and expects the body to poll [`Context::cancelled`].
#[derive(Debug, Clone)]
pub struct Context {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires.
    #[must_use]
    pub fn background() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Whether cancellation has been requested or the deadline has passed.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// The absolute deadline, if one was set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline; `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// Argument enumeration
// ---------------------------------------------------------------------------

/// The closed set of task argument types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArgKind {
    /// An arbitrary string.
    String,
    /// A signed 64-bit integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A boolean (`true`/`yes`/`1` vs `false`/`no`/`0`).
    Bool,
    /// A duration in `300ms` / `10s` / `1h30m` notation.
    Duration,
}

impl ArgKind {
    /// The name used in diagnostics (`can't convert argument "x" to int`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Duration => "duration",
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed task argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// See [`ArgKind::String`].
    String(String),
    /// See [`ArgKind::Int`].
    Int(i64),
    /// See [`ArgKind::Float`].
    Float(f64),
    /// See [`ArgKind::Bool`].
    Bool(bool),
    /// See [`ArgKind::Duration`].
    Duration(Duration),
}

impl ArgValue {
    /// The kind of this value.
    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::String(_) => ArgKind::String,
            Self::Int(_) => ArgKind::Int,
            Self::Float(_) => ArgKind::Float,
            Self::Bool(_) => ArgKind::Bool,
            Self::Duration(_) => ArgKind::Duration,
        }
    }

    /// Parse a raw command-line word into a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns the canonical `can't convert argument "raw" to kind`
    /// diagnostic when the word does not parse.
    pub fn parse(kind: ArgKind, raw: &str) -> Result<Self, ArgError> {
        let fail = || ArgError {
            raw: raw.to_string(),
            kind,
        };
        match kind {
            ArgKind::String => Ok(Self::String(raw.to_string())),
            ArgKind::Int => raw.parse().map(Self::Int).map_err(|_| fail()),
            ArgKind::Float => raw.parse().map(Self::Float).map_err(|_| fail()),
            ArgKind::Bool => parse_bool(raw).map(Self::Bool).ok_or_else(fail),
            ArgKind::Duration => parse_duration(raw).map(Self::Duration).map_err(|_| fail()),
        }
    }
}

/// A word on the command line that did not parse as its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgError {
    raw: String,
    kind: ArgKind,
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can't convert argument {:?} to {}", self.raw, self.kind)
    }
}

impl std::error::Error for ArgError {}

/// Parse a typed integer argument. Used by generated dispatch code.
///
/// # Errors
///
/// Returns the canonical conversion diagnostic.
pub fn parse_arg_int(raw: &str) -> Result<i64, ArgError> {
    match ArgValue::parse(ArgKind::Int, raw)? {
        ArgValue::Int(v) => Ok(v),
        _ => Err(ArgError {
            raw: raw.to_string(),
            kind: ArgKind::Int,
        }),
    }
}

/// Parse a typed float argument. Used by generated dispatch code.
///
/// # Errors
///
/// Returns the canonical conversion diagnostic.
pub fn parse_arg_float(raw: &str) -> Result<f64, ArgError> {
    match ArgValue::parse(ArgKind::Float, raw)? {
        ArgValue::Float(v) => Ok(v),
        _ => Err(ArgError {
            raw: raw.to_string(),
            kind: ArgKind::Float,
        }),
    }
}

/// Parse a typed bool argument. Used by generated dispatch code.
///
/// # Errors
///
/// Returns the canonical conversion diagnostic.
pub fn parse_arg_bool(raw: &str) -> Result<bool, ArgError> {
    match ArgValue::parse(ArgKind::Bool, raw)? {
        ArgValue::Bool(v) => Ok(v),
        _ => Err(ArgError {
            raw: raw.to_string(),
            kind: ArgKind::Bool,
        }),
    }
}

/// Parse a typed duration argument. Used by generated dispatch code.
///
/// # Errors
///
/// Returns the canonical conversion diagnostic.
pub fn parse_arg_duration(raw: &str) -> Result<Duration, ArgError> {
    match ArgValue::parse(ArgKind::Duration, raw)? {
        ArgValue::Duration(v) => Ok(v),
        _ => Err(ArgError {
            raw: raw.to_string(),
            kind: ArgKind::Duration,
        }),
    }
}

/// Case-insensitive boolean parsing shared by flags, env mirrors, and typed
/// arguments: `true`/`yes`/`1` and `false`/`no`/`0`.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Read and parse a boolean environment variable; unset or unparsable reads
/// as `None`.
#[must_use]
pub fn parse_bool_env(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_bool(&v))
}

/// Parse a duration written as one or more `<number><unit>` segments, where
/// the unit is `ns`, `us`, `ms`, `s`, `m`, or `h` (for example `1h30m`,
/// `300ms`, `1.5h`).
///
/// # Errors
///
/// Returns a description of the first malformed segment.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(format!("invalid duration {raw:?}"));
    }
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut total = 0.0f64;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        let number: f64 = s
            .get(start..i)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| format!("invalid duration {raw:?}"))?;
        let unit_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_digit() {
            i += 1;
        }
        let per_second = match s.get(unit_start..i) {
            Some("ns") => 1e-9,
            Some("us") => 1e-6,
            Some("ms") => 1e-3,
            Some("s") => 1.0,
            Some("m") => 60.0,
            Some("h") => 3600.0,
            _ => return Err(format!("invalid duration {raw:?}")),
        };
        total += number * per_second;
    }
    if total.is_finite() && total >= 0.0 {
        Ok(Duration::from_secs_f64(total))
    } else {
        Err(format!("invalid duration {raw:?}"))
    }
}

/// Render command-line words as the JSON array string used as a task's
/// argument-bound discriminator.
#[must_use]
pub fn args_id(args: &[String]) -> String {
    let mut out = String::from("[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        for c in arg.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => out.push(c),
            }
        }
        out.push('"');
    }
    out.push(']');
    out
}

// ---------------------------------------------------------------------------
// Task handles
// ---------------------------------------------------------------------------

/// Marker trait for a user-declared grouping type whose associated functions
/// become colon-prefixed targets.
pub trait Namespace {}

/// Runtime handle for one executable unit.
///
/// `(name, id)` uniquely identifies a logical invocation: the once-registry
/// guarantees each pair runs at most once per process lifetime.
#[derive(Clone)]
pub struct Task {
    name: String,
    id: String,
    f: Arc<dyn Fn(&Context) -> TaskResult + Send + Sync>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Wrap a callable with no bound arguments.
    pub fn new<M>(name: &str, f: impl TaskFn<M>) -> Self {
        Self {
            name: name.to_string(),
            id: "[]".to_string(),
            f: f.wrap().into(),
        }
    }

    /// Wrap a callable under an explicit argument discriminator. Used by
    /// generated dispatch code, where the id is the JSON of the raw words.
    pub fn with_id(
        name: &str,
        id: String,
        f: impl Fn(&Context) -> TaskResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            id,
            f: Arc::new(f),
        }
    }

    /// Wrap a callable together with a bound argument list, validating the
    /// values against the declared parameter kinds.
    ///
    /// # Errors
    ///
    /// Fails when the argument count or any positional kind does not match
    /// the declaration.
    pub fn with_args(
        name: &str,
        kinds: &[ArgKind],
        values: Vec<ArgValue>,
        f: impl Fn(&Context, &[ArgValue]) -> TaskResult + Send + Sync + 'static,
    ) -> Result<Self, Error> {
        if values.len() != kinds.len() {
            return Err(Error::msg(format!(
                "wrong number of arguments for {name}, expected {}, got {}",
                kinds.len(),
                values.len()
            )));
        }
        for (position, (kind, value)) in kinds.iter().zip(&values).enumerate() {
            if value.kind() != *kind {
                return Err(Error::msg(format!(
                    "argument {position} of {name} must be {kind}, got {}",
                    value.kind()
                )));
            }
        }
        let rendered: Vec<String> = values.iter().map(render_arg).collect();
        Ok(Self {
            name: name.to_string(),
            id: args_id(&rendered),
            f: Arc::new(move |ctx| f(ctx, &values)),
        })
    }

    /// Fully qualified task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument-bound discriminator.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A representation usable in failure reporting.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.id == "[]" {
            self.name.clone()
        } else {
            format!("{}{}", self.name, self.id)
        }
    }

    /// Invoke the underlying callable directly, bypassing once-semantics.
    ///
    /// # Errors
    ///
    /// Propagates the callable's failure.
    pub fn run(&self, ctx: &Context) -> TaskResult {
        (self.f)(ctx)
    }
}

fn render_arg(value: &ArgValue) -> String {
    match value {
        ArgValue::String(v) => v.clone(),
        ArgValue::Int(v) => v.to_string(),
        ArgValue::Float(v) => v.to_string(),
        ArgValue::Bool(v) => v.to_string(),
        ArgValue::Duration(v) => format!("{}ms", v.as_millis()),
    }
}

/// Convenience constructor: `func("build", build)` accepts any of the four
/// supported task shapes (with/without context, with/without error return).
pub fn func<M>(name: &str, f: impl TaskFn<M>) -> Task {
    Task::new(name, f)
}

/// A callable convertible into a [`Task`] body.
///
/// The marker parameter disambiguates the four accepted shapes; user code
/// never names it.
pub trait TaskFn<M> {
    /// Convert into the canonical body signature.
    fn wrap(self) -> Box<dyn Fn(&Context) -> TaskResult + Send + Sync>;
}

#[doc(hidden)]
pub struct CtxFallible;
#[doc(hidden)]
pub struct CtxInfallible;
#[doc(hidden)]
pub struct PlainFallible;
#[doc(hidden)]
pub struct PlainInfallible;

impl<F> TaskFn<CtxFallible> for F
where
    F: Fn(&Context) -> TaskResult + Send + Sync + 'static,
{
    fn wrap(self) -> Box<dyn Fn(&Context) -> TaskResult + Send + Sync> {
        Box::new(self)
    }
}

impl<F> TaskFn<CtxInfallible> for F
where
    F: Fn(&Context) + Send + Sync + 'static,
{
    fn wrap(self) -> Box<dyn Fn(&Context) -> TaskResult + Send + Sync> {
        Box::new(move |ctx| {
            self(ctx);
            Ok(())
        })
    }
}

impl<F> TaskFn<PlainFallible> for F
where
    F: Fn() -> TaskResult + Send + Sync + 'static,
{
    fn wrap(self) -> Box<dyn Fn(&Context) -> TaskResult + Send + Sync> {
        Box::new(move |_| self())
    }
}

impl<F> TaskFn<PlainInfallible> for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn wrap(self) -> Box<dyn Fn(&Context) -> TaskResult + Send + Sync> {
        Box::new(move |_| {
            self();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Once-registry and dependency graph
// ---------------------------------------------------------------------------

type OnceCell = Arc<OnceLock<Option<Error>>>;

static REGISTRY: Mutex<BTreeMap<(String, String), OnceCell>> = Mutex::new(BTreeMap::new());
static GRAPH: Mutex<BTreeMap<String, BTreeSet<String>>> = Mutex::new(BTreeMap::new());
static VERBOSE: AtomicBool = AtomicBool::new(false);
static DEBUG: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CURRENT: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn verbose dependency logging on or off.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::SeqCst);
}

/// Whether verbose dependency logging is on.
#[must_use]
pub fn verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Turn debug logging on or off.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::SeqCst);
}

/// Whether debug logging is on.
#[must_use]
pub fn debug() -> bool {
    DEBUG.load(Ordering::SeqCst)
}

/// Shorten a fully qualified name for log output: the last `::` segment
/// stands in for the whole path.
#[must_use]
pub fn display_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Forget every recorded execution and dependency edge. For re-entrant runs
/// (watch mode); never needed for single-run correctness.
pub fn reset_all() {
    lock(&REGISTRY).clear();
    lock(&GRAPH).clear();
}

/// Forget one recorded execution, keyed by name and argument id.
pub fn reset(name: &str, id: &str) {
    lock(&REGISTRY).remove(&(name.to_string(), id.to_string()));
}

/// Forget every recorded execution whose shortened display name matches.
pub fn reset_display_name(name: &str) {
    lock(&REGISTRY).retain(|(full, _), _| full != name && display_name(full) != name);
}

/// Run `tasks` concurrently, each at most once per process, blocking until
/// all of them have finished. Uses a context that never expires.
///
/// # Errors
///
/// Returns the aggregated failure of every task that errored or panicked,
/// or a circular-dependency error detected before anything ran.
pub fn deps(tasks: &[Task]) -> TaskResult {
    run_deps(&Context::background(), tasks, true)
}

/// [`deps`] with an externally supplied cancellation context.
///
/// # Errors
///
/// See [`deps`].
pub fn ctx_deps(ctx: &Context, tasks: &[Task]) -> TaskResult {
    run_deps(ctx, tasks, true)
}

/// Run `tasks` sequentially in argument order, each at most once per process.
///
/// # Errors
///
/// See [`deps`].
pub fn serial_deps(tasks: &[Task]) -> TaskResult {
    run_deps(&Context::background(), tasks, false)
}

/// [`serial_deps`] with an externally supplied cancellation context.
///
/// # Errors
///
/// See [`deps`].
pub fn serial_ctx_deps(ctx: &Context, tasks: &[Task]) -> TaskResult {
    run_deps(ctx, tasks, false)
}

fn run_deps(ctx: &Context, tasks: &[Task], parallel: bool) -> TaskResult {
    if tasks.is_empty() {
        return Ok(());
    }
    let caller = CURRENT
        .with(|c| c.borrow().clone())
        .unwrap_or_else(|| ROOT_NODE.to_string());

    {
        let mut graph = lock(&GRAPH);
        for task in tasks {
            if task.name() == caller {
                return Err(Error::msg(format!(
                    "circular dependency detected: task {:?} depends on itself",
                    caller
                )));
            }
            graph
                .entry(caller.clone())
                .or_default()
                .insert(task.name().to_string());
        }
        if let Some(nodes) = cycle_nodes(&graph) {
            return Err(Error::msg(format!(
                "circular dependency detected in tasks: {}",
                nodes.join(", ")
            )));
        }
    }

    let cells: Vec<OnceCell> = {
        let mut registry = lock(&REGISTRY);
        tasks
            .iter()
            .map(|task| {
                Arc::clone(
                    registry
                        .entry((task.name().to_string(), task.id().to_string()))
                        .or_default(),
                )
            })
            .collect()
    };

    let failures: Mutex<Vec<Error>> = Mutex::new(Vec::new());
    if parallel {
        std::thread::scope(|scope| {
            for (task, cell) in tasks.iter().zip(&cells) {
                let failures = &failures;
                scope.spawn(move || {
                    if let Some(err) = run_once(ctx, task, cell) {
                        lock(failures).push(err);
                    }
                });
            }
        });
    } else {
        for (task, cell) in tasks.iter().zip(&cells) {
            if let Some(err) = run_once(ctx, task, cell) {
                lock(&failures).push(err);
            }
        }
    }

    let failures = failures
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    if failures.is_empty() {
        return Ok(());
    }
    let code = failures
        .iter()
        .fold(0, |acc, err| combine_codes(acc, err.code()));
    let message = failures
        .iter()
        .map(Error::message)
        .collect::<Vec<_>>()
        .join("\n");
    Err(Error::with_code(if code == 0 { 1 } else { code }, message))
}

/// Resolve the task's once-cell: the first arrival runs the body, everyone
/// else blocks on the latch and observes the cached outcome.
fn run_once(ctx: &Context, task: &Task, cell: &OnceCell) -> Option<Error> {
    if verbose() {
        eprintln!("Running dependency: {}", display_name(task.name()));
    }
    cell.get_or_init(|| invoke(ctx, task)).clone()
}

fn invoke(ctx: &Context, task: &Task) -> Option<Error> {
    let previous = CURRENT.with(|c| c.replace(Some(task.name().to_string())));
    let outcome = catch_unwind(AssertUnwindSafe(|| task.run(ctx)));
    CURRENT.with(|c| *c.borrow_mut() = previous);
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(panic_to_error(task, payload.as_ref())),
    }
}

fn panic_to_error(task: &Task, payload: &(dyn Any + Send)) -> Error {
    if let Some(err) = payload.downcast_ref::<Error>() {
        return err.clone();
    }
    let text = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "task panicked".to_string());
    Error::msg(format!("{}: {}", task.describe(), text))
}

/// Kahn's algorithm over the accumulated caller→callee graph. Returns the
/// implicated node list (sorted) when a cycle remains, `None` otherwise.
fn cycle_nodes(graph: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (caller, callees) in graph {
        in_degree.entry(caller.as_str()).or_insert(0);
        for callee in callees {
            *in_degree.entry(callee.as_str()).or_insert(0) += 1;
        }
    }
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    while let Some(node) = ready.iter().next().copied() {
        ready.remove(node);
        in_degree.remove(node);
        if let Some(callees) = graph.get(node) {
            for callee in callees {
                if let Some(degree) = in_degree.get_mut(callee.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(callee.as_str());
                    }
                }
            }
        }
    }
    if in_degree.is_empty() {
        None
    } else {
        Some(in_degree.keys().map(|n| (*n).to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// Driver entry helpers
// ---------------------------------------------------------------------------

/// Run the requested target to completion, enforcing the context deadline
/// with a cooperative cleanup window, and translate the outcome into a
/// process exit code. Failures are printed to stderr prefixed `Error:`.
pub fn execute(ctx: &Context, task: Task) -> i32 {
    if verbose() {
        eprintln!("Running target: {}", display_name(task.name()));
    }
    let (tx, rx) = std::sync::mpsc::channel();
    let worker_ctx = ctx.clone();
    std::thread::spawn(move || {
        let result = serial_ctx_deps(&worker_ctx, &[task]);
        let _ = tx.send(result);
    });
    let result = match ctx.remaining() {
        None => rx
            .recv()
            .unwrap_or_else(|_| Err(Error::msg("task worker exited unexpectedly"))),
        Some(remaining) => match rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::msg("task worker exited unexpectedly"))
            }
            Err(RecvTimeoutError::Timeout) => {
                ctx.cancel();
                match rx.recv_timeout(CLEANUP_WINDOW) {
                    Ok(_) => Err(Error::msg("deadline exceeded")),
                    Err(_) => Err(Error::msg("cleanup timeout exceeded")),
                }
            }
        },
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err.message());
            if err.code() == 0 { 1 } else { err.code() }
        }
    }
}

/// Flags understood by a compiled driver, each with an environment mirror.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriverOpts {
    /// Log dependency execution to stderr.
    pub verbose: bool,
    /// Log driver internals to stderr.
    pub debug: bool,
    /// Print the target table and exit.
    pub list: bool,
    /// Print one target's documentation and exit.
    pub info: bool,
    /// Print usage and exit.
    pub help: bool,
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Target name followed by its arguments.
    pub args: Vec<String>,
}

/// Parse driver command-line words (exclusive of the program name), seeding
/// each flag from its environment mirror first. Flag parsing stops at the
/// first non-flag word so target arguments may begin with dashes.
///
/// # Errors
///
/// Returns a diagnostic for an unknown flag or a malformed timeout value.
pub fn parse_driver_opts<I>(argv: I) -> Result<DriverOpts, String>
where
    I: IntoIterator<Item = String>,
{
    let mut opts = DriverOpts {
        verbose: parse_bool_env(env_names::VERBOSE).unwrap_or(false),
        debug: parse_bool_env(env_names::DEBUG).unwrap_or(false),
        list: parse_bool_env(env_names::LIST).unwrap_or(false),
        info: parse_bool_env(env_names::INFO).unwrap_or(false),
        ..DriverOpts::default()
    };
    if let Ok(raw) = std::env::var(env_names::TIMEOUT) {
        if !raw.is_empty() {
            opts.timeout = Some(parse_duration(&raw)?);
        }
    }
    let words: Vec<String> = argv.into_iter().collect();
    let mut i = 0;
    while i < words.len() {
        let word = words[i].as_str();
        match word {
            "-v" | "--verbose" => opts.verbose = true,
            "-d" | "--debug" => opts.debug = true,
            "-l" | "--list" => opts.list = true,
            "-i" | "--info" => opts.info = true,
            "-h" | "--help" => opts.help = true,
            "-t" | "--timeout" => {
                i += 1;
                let value = words
                    .get(i)
                    .ok_or_else(|| format!("flag {word} needs a duration argument"))?;
                opts.timeout = Some(parse_duration(value)?);
            }
            _ if word.starts_with("--timeout=") => {
                let value = word.trim_start_matches("--timeout=");
                opts.timeout = Some(parse_duration(value)?);
            }
            _ if word.starts_with('-') && word != "-" => {
                return Err(format!("unknown flag {word}"));
            }
            _ => {
                opts.args.extend(words[i..].iter().cloned());
                break;
            }
        }
        i += 1;
    }
    Ok(opts)
}

// ---------------------------------------------------------------------------
// Target listing
// ---------------------------------------------------------------------------

/// One row of the `--list` table.
#[derive(Debug, Clone)]
pub struct ListRow {
    /// User-visible target name.
    pub target: String,
    /// One-line synopsis.
    pub synopsis: String,
}

/// ANSI SGR code for a colour name; `None` for unknown names.
#[must_use]
pub fn color_code(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "black" => Some("30"),
        "red" => Some("31"),
        "green" => Some("32"),
        "yellow" => Some("33"),
        "blue" => Some("34"),
        "magenta" => Some("35"),
        "cyan" => Some("36"),
        "white" => Some("37"),
        "brightblack" => Some("90"),
        "brightred" => Some("91"),
        "brightgreen" => Some("92"),
        "brightyellow" => Some("93"),
        "brightblue" => Some("94"),
        "brightmagenta" => Some("95"),
        "brightcyan" => Some("96"),
        "brightwhite" => Some("97"),
        _ => None,
    }
}

/// Resolve the listing colour from the environment: enabled by
/// `STAVEFILE_ENABLE_COLOR`, named by `STAVEFILE_TARGET_COLOR` (default cyan).
#[must_use]
pub fn resolve_color() -> Option<&'static str> {
    if parse_bool_env(env_names::ENABLE_COLOR) != Some(true) {
        return None;
    }
    let name = std::env::var(env_names::TARGET_COLOR).unwrap_or_default();
    color_code(&name).or(Some("36"))
}

/// Render the target table. The default target is marked with `*`.
#[must_use]
pub fn render_target_list(
    rows: &[ListRow],
    default_target: Option<&str>,
    color: Option<&str>,
) -> String {
    let width = rows
        .iter()
        .map(|row| row.target.len() + usize::from(Some(row.target.as_str()) == default_target))
        .max()
        .unwrap_or(0);
    let mut out = String::from("Targets:\n");
    for row in rows {
        let is_default = Some(row.target.as_str()) == default_target;
        let shown = if is_default {
            format!("{}*", row.target)
        } else {
            row.target.clone()
        };
        let padding = " ".repeat(width.saturating_sub(shown.len()) + 4);
        match color {
            Some(code) => {
                out.push_str(&format!(
                    "  \u{1b}[{code}m{shown}\u{1b}[0m{padding}{}\n",
                    row.synopsis
                ));
            }
            None => out.push_str(&format!("  {shown}{padding}{}\n", row.synopsis)),
        }
    }
    if default_target.is_some() {
        out.push_str("\n* default target\n");
    }
    out
}

/// Render the driver usage banner.
#[must_use]
pub fn render_usage(binary: &str) -> String {
    format!(
        "{binary} [options] [target [args]...]\n\n\
         Options:\n  \
         -l, --list           list targets\n  \
         -i, --info           print documentation for the named target\n  \
         -h, --help           print this help\n  \
         -v, --verbose        log dependency execution\n  \
         -d, --debug          log driver internals\n  \
         -t, --timeout <dur>  cancel the run after the given duration\n"
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted(name: &str, counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Task::new(name, move |_ctx: &Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(name: &str, code: i32, message: &str) -> Task {
        let message = message.to_string();
        Task::new(name, move |_ctx: &Context| -> TaskResult {
            Err(Error::with_code(code, message.clone()))
        })
    }

    // -----------------------------------------------------------------------
    // combine_codes
    // -----------------------------------------------------------------------

    #[test]
    fn into_task_result_preserves_error_code() {
        let typed: Result<(), Error> = Err(Error::with_code(6, "typed"));
        let err = into_task_result(typed).unwrap_err();
        assert_eq!(err.code(), 6);

        let stringly: Result<(), String> = Err("plain".to_string());
        let err = into_task_result(stringly).unwrap_err();
        assert_eq!(err.code(), 1);
        assert_eq!(err.message(), "plain");

        assert!(into_task_result::<String>(Ok(())).is_ok());
    }

    #[test]
    fn combine_zero_yields_to_nonzero() {
        assert_eq!(combine_codes(0, 3), 3);
        assert_eq!(combine_codes(3, 0), 3);
        assert_eq!(combine_codes(0, 0), 0);
    }

    #[test]
    fn combine_equal_nonzero_kept() {
        assert_eq!(combine_codes(4, 4), 4);
    }

    #[test]
    fn combine_different_nonzero_collapse_to_one() {
        assert_eq!(combine_codes(3, 4), 1);
    }

    // -----------------------------------------------------------------------
    // parsing helpers
    // -----------------------------------------------------------------------

    #[test]
    fn parse_bool_accepts_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("NO"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_duration_single_unit() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn parse_duration_compound_and_fractional() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(90 * 60)
        );
        assert_eq!(
            parse_duration("1.5s").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10parsecs").is_err());
    }

    #[test]
    fn arg_parse_diagnostics() {
        let err = ArgValue::parse(ArgKind::Int, "abc123").unwrap_err();
        assert_eq!(err.to_string(), "can't convert argument \"abc123\" to int");
        let err = ArgValue::parse(ArgKind::Bool, "10").unwrap_err();
        assert_eq!(err.to_string(), "can't convert argument \"10\" to bool");
    }

    #[test]
    fn arg_parse_accepts_each_kind() {
        assert_eq!(
            ArgValue::parse(ArgKind::Int, "-7").unwrap(),
            ArgValue::Int(-7)
        );
        assert_eq!(
            ArgValue::parse(ArgKind::Float, "2.5").unwrap(),
            ArgValue::Float(2.5)
        );
        assert_eq!(
            ArgValue::parse(ArgKind::Bool, "yes").unwrap(),
            ArgValue::Bool(true)
        );
        assert_eq!(
            ArgValue::parse(ArgKind::Duration, "1s").unwrap(),
            ArgValue::Duration(Duration::from_secs(1))
        );
    }

    #[test]
    fn args_id_escapes_and_orders() {
        let id = args_id(&["a\"b".to_string(), "c\\d".to_string()]);
        assert_eq!(id, "[\"a\\\"b\",\"c\\\\d\"]");
        assert_eq!(args_id(&[]), "[]");
    }

    // -----------------------------------------------------------------------
    // Task construction
    // -----------------------------------------------------------------------

    #[test]
    fn with_args_validates_count() {
        let err = Task::with_args(
            "say",
            &[ArgKind::String, ArgKind::Int],
            vec![ArgValue::String("hi".into())],
            |_, _| Ok(()),
        )
        .unwrap_err();
        assert!(err.message().contains("wrong number of arguments"));
    }

    #[test]
    fn with_args_validates_kinds() {
        let err = Task::with_args(
            "say",
            &[ArgKind::Int],
            vec![ArgValue::String("hi".into())],
            |_, _| Ok(()),
        )
        .unwrap_err();
        assert!(err.message().contains("must be int"));
    }

    #[test]
    fn with_args_binds_id() {
        let task = Task::with_args(
            "say",
            &[ArgKind::String, ArgKind::Int],
            vec![ArgValue::String("hi".into()), ArgValue::Int(3)],
            |_, _| Ok(()),
        )
        .unwrap();
        assert_eq!(task.id(), "[\"hi\",\"3\"]");
        assert_eq!(task.describe(), "say[\"hi\",\"3\"]");
    }

    #[test]
    fn func_accepts_all_shapes() {
        fn plain() {}
        fn plain_err() -> TaskResult {
            Ok(())
        }
        fn with_ctx(_ctx: &Context) {}
        fn with_ctx_err(_ctx: &Context) -> TaskResult {
            Ok(())
        }
        let ctx = Context::background();
        for task in [
            func("a", plain),
            func("b", plain_err),
            func("c", with_ctx),
            func("d", with_ctx_err),
        ] {
            assert!(task.run(&ctx).is_ok());
        }
    }

    // -----------------------------------------------------------------------
    // Once semantics and aggregation
    // -----------------------------------------------------------------------
    //
    // The registry and graph are process-global, so every test task name in
    // this module is unique to its test.

    #[test]
    fn deps_runs_each_task_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let shared = counted("once::shared", &count);
        let left = {
            let shared = shared.clone();
            Task::new("once::left", move |_: &Context| {
                serial_deps(&[shared.clone()])
            })
        };
        let right = {
            let shared = shared.clone();
            Task::new("once::right", move |_: &Context| {
                serial_deps(&[shared.clone()])
            })
        };
        deps(&[left, right]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_call_observes_cached_error() {
        let count = Arc::new(AtomicUsize::new(0));
        let boom = {
            let count = Arc::clone(&count);
            Task::new("cached::boom", move |_: &Context| -> TaskResult {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Error::with_code(3, "boom"))
            })
        };
        let first = serial_deps(&[boom.clone()]).unwrap_err();
        let second = serial_deps(&[boom]).unwrap_err();
        assert_eq!(first.code(), 3);
        assert_eq!(second.code(), 3);
        assert_eq!(second.message(), "boom");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_arg_ids_run_separately() {
        let count = Arc::new(AtomicUsize::new(0));
        let make = |value: i64| {
            let count = Arc::clone(&count);
            Task::with_args(
                "ids::emit",
                &[ArgKind::Int],
                vec![ArgValue::Int(value)],
                move |_, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap()
        };
        serial_deps(&[make(1), make(2), make(1)]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_aggregation_combines_codes_and_messages() {
        let err = deps(&[
            failing("agg::a", 3, "first failed"),
            failing("agg::b", 4, "second failed"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), 1);
        assert!(err.message().contains("first failed"));
        assert!(err.message().contains("second failed"));
    }

    #[test]
    fn single_failure_preserves_code() {
        let err = deps(&[failing("solo::fail", 7, "nope")]).unwrap_err();
        assert_eq!(err.code(), 7);
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn panic_is_recovered_as_error() {
        let task = Task::new("panic::one", |_: &Context| -> () {
            panic!("kaboom");
        });
        let err = serial_deps(&[task]).unwrap_err();
        assert!(err.message().contains("kaboom"));
    }

    #[test]
    fn panic_with_error_payload_preserves_code() {
        let task = Task::new("panic::typed", |_: &Context| -> () {
            std::panic::panic_any(Error::with_code(9, "typed"));
        });
        let err = serial_deps(&[task]).unwrap_err();
        assert_eq!(err.code(), 9);
        assert_eq!(err.message(), "typed");
    }

    #[test]
    fn failed_sibling_does_not_stop_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let err = deps(&[
            failing("mix::bad", 1, "bad"),
            counted("mix::good", &count),
        ])
        .unwrap_err();
        assert_eq!(err.code(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // Cycle detection
    // -----------------------------------------------------------------------

    #[test]
    fn self_dependency_detected() {
        let task = Task::new("cycle::selfish", |_: &Context| {
            serial_deps(&[Task::new("cycle::selfish", |_: &Context| Ok(()))])
        });
        let err = serial_deps(&[task]).unwrap_err();
        assert!(err.message().contains("circular dependency detected"));
        assert!(err.message().contains("depends on itself"));
    }

    #[test]
    fn two_task_cycle_detected_before_any_body_runs() {
        // cycle::a depends on cycle::b; when cycle::b runs it declares a
        // dependency back on cycle::a, which must be rejected before the
        // inner body executes.
        let inner_ran = Arc::new(AtomicUsize::new(0));
        let a = {
            let inner_ran = Arc::clone(&inner_ran);
            Task::new("cycle::a", move |_: &Context| {
                let inner_ran = Arc::clone(&inner_ran);
                let b = Task::new("cycle::b", move |_: &Context| {
                    let inner_ran = Arc::clone(&inner_ran);
                    let back = Task::new("cycle::a", move |_: &Context| {
                        inner_ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                    serial_deps(&[back])
                });
                serial_deps(&[b])
            })
        };
        let err = serial_deps(&[a]).unwrap_err();
        assert!(err.message().contains("circular dependency detected"));
        assert_eq!(inner_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cycle_nodes_reports_only_implicated() {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        graph
            .entry("x".into())
            .or_default()
            .insert("y".to_string());
        graph
            .entry("y".into())
            .or_default()
            .insert("x".to_string());
        graph
            .entry("free".into())
            .or_default()
            .insert("x".to_string());
        let nodes = cycle_nodes(&graph).unwrap();
        assert_eq!(nodes, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        graph.entry("top".into()).or_default().extend([
            "left".to_string(),
            "right".to_string(),
        ]);
        graph
            .entry("left".into())
            .or_default()
            .insert("bottom".to_string());
        graph
            .entry("right".into())
            .or_default()
            .insert("bottom".to_string());
        assert!(cycle_nodes(&graph).is_none());
    }

    // -----------------------------------------------------------------------
    // Registry maintenance
    // -----------------------------------------------------------------------

    #[test]
    fn reset_allows_rerun() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counted("reset::target", &count);
        serial_deps(&[task.clone()]).unwrap();
        serial_deps(&[task.clone()]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        reset("reset::target", "[]");
        serial_deps(&[task]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_display_name_matches_short_form() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counted("display::deep::target", &count);
        serial_deps(&[task.clone()]).unwrap();
        reset_display_name("target");
        serial_deps(&[task]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn display_name_shortens_path() {
        assert_eq!(display_name("tasks::ci::lint"), "lint");
        assert_eq!(display_name("build"), "build");
    }

    // -----------------------------------------------------------------------
    // execute: deadlines and cleanup
    // -----------------------------------------------------------------------

    #[test]
    fn execute_success_is_zero() {
        let ctx = Context::background();
        let code = execute(&ctx, Task::new("exec::ok", |_: &Context| Ok(())));
        assert_eq!(code, 0);
    }

    #[test]
    fn execute_failure_code_propagates() {
        let ctx = Context::background();
        let code = execute(&ctx, failing("exec::fail", 5, "expected failure"));
        assert_eq!(code, 5);
    }

    #[test]
    fn execute_cooperative_task_stops_at_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let code = execute(
            &ctx,
            Task::new("exec::cooperative", |ctx: &Context| {
                while !ctx.cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }),
        );
        // The body returns inside the cleanup window; the run still failed
        // with the deadline.
        assert_eq!(code, 1);
    }

    #[test]
    fn context_cancel_is_observable() {
        let ctx = Context::background();
        assert!(!ctx.cancelled());
        ctx.cancel();
        assert!(ctx.cancelled());
    }

    #[test]
    fn context_deadline_passes() {
        let ctx = Context::with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    // -----------------------------------------------------------------------
    // Driver option parsing
    // -----------------------------------------------------------------------

    fn parse_words(words: &[&str]) -> Result<DriverOpts, String> {
        parse_driver_opts(words.iter().map(|w| (*w).to_string()))
    }

    #[test]
    fn driver_opts_flags_and_target() {
        let opts = parse_words(&["-v", "--list", "build", "--flag-for-task"]).unwrap();
        assert!(opts.verbose);
        assert!(opts.list);
        assert_eq!(opts.args, vec!["build", "--flag-for-task"]);
    }

    #[test]
    fn driver_opts_timeout_forms() {
        let opts = parse_words(&["-t", "10s", "build"]).unwrap();
        assert_eq!(opts.timeout, Some(Duration::from_secs(10)));
        let opts = parse_words(&["--timeout=2m"]).unwrap();
        assert_eq!(opts.timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn driver_opts_unknown_flag_rejected() {
        let err = parse_words(&["--wat"]).unwrap_err();
        assert!(err.contains("unknown flag"));
    }

    #[test]
    fn driver_opts_args_after_target_not_parsed() {
        let opts = parse_words(&["say", "-v"]).unwrap();
        assert!(!opts.verbose);
        assert_eq!(opts.args, vec!["say", "-v"]);
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn target_list_marks_default_and_aligns() {
        let rows = vec![
            ListRow {
                target: "build".into(),
                synopsis: "compile the thing".into(),
            },
            ListRow {
                target: "db:migrate".into(),
                synopsis: "".into(),
            },
        ];
        let out = render_target_list(&rows, Some("build"), None);
        assert!(out.contains("build*"));
        assert!(out.contains("db:migrate"));
        assert!(out.contains("* default target"));
        assert!(out.contains("compile the thing"));
    }

    #[test]
    fn target_list_colour_wraps_names() {
        let rows = vec![ListRow {
            target: "build".into(),
            synopsis: "".into(),
        }];
        let out = render_target_list(&rows, None, Some("36"));
        assert!(out.contains("\u{1b}[36mbuild\u{1b}[0m"));
        assert!(!out.contains("* default target"));
    }

    #[test]
    fn colour_names_resolve() {
        assert_eq!(color_code("cyan"), Some("36"));
        assert_eq!(color_code("BrightRed"), Some("91"));
        assert_eq!(color_code("mauve"), None);
    }
}
