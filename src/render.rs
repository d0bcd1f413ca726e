//! Deterministic rendering of the self-contained driver program.
//!
//! The driver is one Rust source file: the embedded runtime (`pub mod
//! stave`), one `#[path]` module per task file, and a generated `main` that
//! parses flags, resolves the target, parses typed arguments at invocation,
//! and hands the wrapped task to the runtime executor. Identical inputs
//! must render byte-identical output — the rendered text participates in
//! the cache fingerprint — so every map is sorted before iteration.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::analyse::{ImportedPackage, PackageDescription, TaskFunction};
use crate::error::StaveError;
use crate::rt::ArgKind;

pub use crate::analyse::select::DRIVER_FILE;

/// Bumped whenever the shape of the generated skeleton changes, so existing
/// cache entries are invalidated even though the runtime text is unchanged.
const TEMPLATE_REVISION: &str = "stave-driver-template-1";

/// Timestamp forced onto the rendered file so the toolchain treats it as
/// older than any task source.
const RENDER_EPOCH: Duration = Duration::from_secs(1);

/// The runtime source embedded into every driver, test module stripped.
#[must_use]
pub fn runtime_source() -> &'static str {
    static SOURCE: &str = include_str!("rt.rs");
    SOURCE.split("#[cfg(test)]").next().unwrap_or(SOURCE)
}

/// The template text participating in the cache fingerprint.
#[must_use]
pub fn template_source() -> String {
    format!("{}\n{TEMPLATE_REVISION}\n", runtime_source())
}

/// Inputs to one render.
#[derive(Debug)]
pub struct RenderRequest<'a> {
    /// The validated analysis.
    pub package: &'a PackageDescription,
    /// Binary name shown in help text.
    pub binary_name: &'a str,
    /// Local task files, absolute and sorted.
    pub files: &'a [PathBuf],
    /// Directory the driver will be written into.
    pub task_dir: &'a Path,
}

/// Render the driver source.
#[must_use]
pub fn render(request: &RenderRequest) -> String {
    let modules = module_map(request);
    let functions = request.package.all_functions();

    let mut out = String::new();
    out.push_str("// Code generated by stave; DO NOT EDIT.\n");
    out.push_str("// Regenerated on every cache miss from the task files in this directory.\n\n");

    // Runtime.
    out.push_str("#[allow(dead_code)]\npub mod stave {\n");
    out.push_str(runtime_source());
    out.push_str("}\n\n");

    // Task file modules.
    for (file, ident) in &modules.mounts {
        let path = mount_path(file, request.task_dir);
        let _ = writeln!(
            out,
            "#[allow(dead_code, unused_imports)]\n#[path = {path:?}]\nmod {ident};"
        );
    }
    out.push('\n');

    // Facade modules so `use crate::<package>;` in task files resolves.
    render_facades(&mut out, &request.package.imports, &modules);

    // Static descriptions.
    let _ = writeln!(out, "const BINARY_NAME: &str = {:?};", request.binary_name);
    match &request.package.default {
        Some(default) => {
            let _ = writeln!(out, "const DEFAULT_TARGET: Option<&str> = Some({default:?});");
        }
        None => {
            let _ = writeln!(out, "const DEFAULT_TARGET: Option<&str> = None;");
        }
    }
    out.push('\n');

    render_main(&mut out, request, &functions, &modules);
    out
}

/// Write the driver into the task directory with its timestamp forced far
/// into the past.
///
/// # Errors
///
/// Fails when the file cannot be written or its timestamp cannot be set.
pub fn write_driver(task_dir: &Path, content: &str) -> Result<PathBuf, StaveError> {
    let path = task_dir.join(DRIVER_FILE);
    std::fs::write(&path, content).map_err(|err| StaveError::io(path.clone(), err))?;
    let file = std::fs::File::options()
        .write(true)
        .open(&path)
        .map_err(|err| StaveError::io(path.clone(), err))?;
    file.set_modified(SystemTime::UNIX_EPOCH + RENDER_EPOCH)
        .map_err(|err| StaveError::io(path.clone(), err))?;
    Ok(path)
}

/// File-to-module-identifier assignments for everything the driver mounts.
#[derive(Debug, Default)]
struct ModuleMap {
    /// `(file, module ident)` in render order.
    mounts: Vec<(PathBuf, String)>,
    /// Lookup from file to module ident.
    by_file: BTreeMap<PathBuf, String>,
}

impl ModuleMap {
    fn insert(&mut self, file: &Path, wanted: String) {
        let mut ident = wanted;
        while self.mounts.iter().any(|(_, existing)| *existing == ident) {
            ident.push('_');
        }
        self.mounts.push((file.to_path_buf(), ident.clone()));
        self.by_file.insert(file.to_path_buf(), ident);
    }
}

fn module_map(request: &RenderRequest) -> ModuleMap {
    let mut map = ModuleMap::default();
    for file in request.files {
        map.insert(file, sanitize_ident(file_stem(file)));
    }
    for (symbol, files) in request.package.imported_files() {
        for file in files {
            map.insert(
                &file,
                format!("{symbol}_{}", sanitize_ident(file_stem(&file))),
            );
        }
    }
    map
}

fn file_stem(file: &Path) -> &str {
    file.file_stem().and_then(|s| s.to_str()).unwrap_or("task")
}

/// Make a file stem usable as a module identifier.
fn sanitize_ident(stem: &str) -> String {
    let mut ident: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    const KEYWORDS: &[&str] = &[
        "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
        "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod",
        "move", "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait",
        "true", "type", "unsafe", "use", "where", "while",
    ];
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// The `#[path]` value: basename for files beside the driver, absolute
/// (forward-slashed) elsewhere.
fn mount_path(file: &Path, task_dir: &Path) -> String {
    if file.parent() == Some(task_dir) {
        if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
            return name.to_string();
        }
    }
    file.display().to_string().replace('\\', "/")
}

fn render_facades(out: &mut String, imports: &[ImportedPackage], modules: &ModuleMap) {
    let mut rendered: Vec<String> = Vec::new();
    render_facades_inner(out, imports, modules, &mut rendered);
}

fn render_facades_inner(
    out: &mut String,
    imports: &[ImportedPackage],
    modules: &ModuleMap,
    rendered: &mut Vec<String>,
) {
    for import in imports {
        if rendered.contains(&import.import_path) {
            continue;
        }
        rendered.push(import.import_path.clone());
        // The runtime module already answers for `crate::stave`.
        if import.import_path == "stave" {
            continue;
        }
        let _ = writeln!(out, "#[allow(unused_imports, dead_code)]\nmod {} {{", import.import_path);
        for file in &import.files {
            if let Some(ident) = modules.by_file.get(file) {
                let _ = writeln!(out, "    pub use crate::{ident}::*;");
            }
        }
        out.push_str("}\n\n");
        render_facades_inner(out, &import.description.imports, modules, rendered);
    }
}

fn render_main(
    out: &mut String,
    request: &RenderRequest,
    functions: &[TaskFunction],
    modules: &ModuleMap,
) {
    out.push_str("fn main() {\n");
    out.push_str(
        "    let opts = match stave::parse_driver_opts(std::env::args().skip(1)) {\n        \
         Ok(opts) => opts,\n        \
         Err(message) => {\n            \
         eprintln!(\"Error: {message}\");\n            \
         std::process::exit(2);\n        }\n    };\n",
    );
    out.push_str("    stave::set_verbose(opts.verbose);\n");
    out.push_str("    stave::set_debug(opts.debug);\n");

    // List rows, sorted by target name already.
    out.push_str("    let rows = vec![\n");
    for function in functions {
        let _ = writeln!(
            out,
            "        stave::ListRow {{ target: {:?}.to_string(), synopsis: {:?}.to_string() }},",
            function.target_name(),
            function.documentation
        );
    }
    out.push_str("    ];\n\n");

    out.push_str(
        "    if opts.help {\n        \
         print!(\"{}\", stave::render_usage(BINARY_NAME));\n        \
         print!(\"\\n{}\", stave::render_target_list(&rows, DEFAULT_TARGET, stave::resolve_color()));\n        \
         return;\n    }\n",
    );
    out.push_str(
        "    if opts.list {\n        \
         print!(\"{}\", stave::render_target_list(&rows, DEFAULT_TARGET, stave::resolve_color()));\n        \
         return;\n    }\n\n",
    );

    out.push_str(
        "    let ignore_default =\n        \
         stave::parse_bool_env(stave::env_names::IGNORE_DEFAULT) == Some(true);\n",
    );
    out.push_str(
        "    let requested = match opts.args.first() {\n        \
         Some(name) => name.clone(),\n        \
         None => match DEFAULT_TARGET {\n            \
         Some(default) if !ignore_default => default.to_string(),\n            \
         _ => {\n                \
         print!(\"{}\", stave::render_target_list(&rows, DEFAULT_TARGET, stave::resolve_color()));\n                \
         return;\n            }\n        },\n    };\n",
    );

    // Alias rewriting, then case-insensitive resolution.
    out.push_str("    let resolved = match requested.to_lowercase().as_str() {\n");
    for (alias, target) in &request.package.aliases {
        let _ = writeln!(
            out,
            "        {:?} => {:?}.to_string(),",
            alias.to_lowercase(),
            target.to_lowercase()
        );
    }
    out.push_str("        other => other.to_string(),\n    };\n\n");

    // --info: documentation plus usage for one target.
    out.push_str("    if opts.info {\n        match resolved.as_str() {\n");
    for function in functions {
        let target = function.target_name();
        let doc = if function.documentation.is_empty() {
            format!("{target} has no documentation")
        } else {
            function.documentation.clone()
        };
        let _ = writeln!(
            out,
            "            {:?} => {{\n                println!(\"{{}}\", {doc:?});\n                println!();\n                println!(\"Usage: {{}} {}\", BINARY_NAME);\n            }}",
            target.to_lowercase(),
            usage_suffix(function),
        );
    }
    out.push_str(
        "            _ => {\n                \
         eprintln!(\"Unknown target specified: {requested:?}\");\n                \
         std::process::exit(2);\n            }\n        }\n        return;\n    }\n\n",
    );

    out.push_str("    let rest: Vec<String> = opts.args.iter().skip(1).cloned().collect();\n");
    out.push_str("    let task = match resolved.as_str() {\n");
    for function in functions {
        render_arm(out, function, modules);
    }
    out.push_str(
        "        _ => {\n            \
         eprintln!(\"Unknown target specified: {requested:?}\");\n            \
         std::process::exit(2);\n        }\n    };\n\n",
    );

    out.push_str(
        "    let ctx = match opts.timeout {\n        \
         Some(timeout) => stave::Context::with_timeout(timeout),\n        \
         None => stave::Context::background(),\n    };\n",
    );
    out.push_str("    std::process::exit(stave::execute(&ctx, task));\n");
    out.push_str("}\n");
}

/// `<name type>` words appended to a usage line.
fn usage_suffix(function: &TaskFunction) -> String {
    let mut out = function.target_name();
    for argument in &function.arguments {
        let _ = write!(out, " <{} {}>", argument.name, argument.kind.as_str());
    }
    out
}

/// One dispatch arm: count checks, typed parsing, and the wrapped call.
fn render_arm(out: &mut String, function: &TaskFunction, modules: &ModuleMap) {
    let target = function.target_name();
    let lower = target.to_lowercase();
    let expected = function.arguments.len();

    let _ = writeln!(out, "        {lower:?} => {{");
    if expected > 0 {
        let _ = writeln!(
            out,
            "            if rest.len() < {expected} {{\n                eprintln!(\"not enough arguments for target \\\"{target}\\\", expected {expected}, got {{}}\", rest.len());\n                std::process::exit(2);\n            }}"
        );
    }
    let _ = writeln!(
        out,
        "            if rest.len() > {expected} {{\n                eprintln!(\"too many arguments for target \\\"{target}\\\", expected {expected}, got {{}}\", rest.len());\n                std::process::exit(2);\n            }}"
    );

    for (index, argument) in function.arguments.iter().enumerate() {
        match argument.kind {
            ArgKind::String => {
                let _ = writeln!(out, "            let arg{index} = rest[{index}].clone();");
            }
            kind => {
                let parser = match kind {
                    ArgKind::Int => "parse_arg_int",
                    ArgKind::Float => "parse_arg_float",
                    ArgKind::Bool => "parse_arg_bool",
                    ArgKind::Duration => "parse_arg_duration",
                    ArgKind::String => unreachable!("handled above"),
                };
                let _ = writeln!(
                    out,
                    "            let arg{index} = match stave::{parser}(&rest[{index}]) {{\n                Ok(value) => value,\n                Err(message) => {{\n                    eprintln!(\"{{message}}\");\n                    std::process::exit(2);\n                }}\n            }};"
                );
            }
        }
    }

    let call = call_expression(function, modules);
    let body = if function.returns_error {
        format!("stave::into_task_result({call})")
    } else {
        format!("{{ {call}; Ok(()) }}")
    };
    let param = if function.takes_context { "ctx" } else { "_ctx" };
    let _ = writeln!(
        out,
        "            stave::Task::with_id({lower:?}, stave::args_id(&rest), move |{param}| {body})"
    );
    out.push_str("        }\n");
}

fn call_expression(function: &TaskFunction, modules: &ModuleMap) -> String {
    let module = modules
        .by_file
        .get(&function.file)
        .cloned()
        .unwrap_or_else(|| "unknown_module".to_string());
    let mut path = format!("crate::{module}");
    if !function.receiver.is_empty() {
        let _ = write!(path, "::{}", function.receiver);
    }
    let _ = write!(path, "::{}", function.name);

    let mut args: Vec<String> = Vec::new();
    if function.takes_context {
        args.push("ctx".to_string());
    }
    for (index, argument) in function.arguments.iter().enumerate() {
        if argument.kind == ArgKind::String {
            args.push(format!("arg{index}.clone()"));
        } else {
            args.push(format!("arg{index}"));
        }
    }
    format!("{path}({})", args.join(", "))
}
