//! Task-file analysis: discovery of task functions, namespaces, defaults,
//! aliases, and tagged imports.
//!
//! The analyser is a pure function of the selected files' contents (plus the
//! toolchain metadata used to locate tagged imports); it never mutates the
//! filesystem. Its output, [`PackageDescription`], feeds the conflict
//! checker, the cache keyer, and the driver renderer.

pub mod conflict;
pub mod imports;
pub mod parse;
pub mod select;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, StaveError};
use crate::exec::Executor;
use crate::rt::ArgKind;

/// Packages that are linked into the driver when imported but whose exported
/// functions are never exposed as targets: they export helper functions, not
/// tasks. `stave` is the embedded runtime itself; `stave_sh` is the shell
/// helper package.
pub const SILENT_IMPORTS: &[&str] = &["stave", "stave_sh"];

/// One typed parameter of a task function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Parameter name as declared.
    pub name: String,
    /// Parameter type from the closed set.
    pub kind: ArgKind,
}

/// A discovered executable unit.
#[derive(Debug, Clone)]
pub struct TaskFunction {
    /// Identifier as declared in source (case preserved).
    pub name: String,
    /// Grouping type the function is attached to; empty for free functions.
    pub receiver: String,
    /// Short name of the originating import; empty for local functions.
    pub package_alias: String,
    /// Logical path of the originating package; empty for local functions.
    pub import_path: String,
    /// Whether the first parameter is the cancellation handle.
    pub takes_context: bool,
    /// Whether the function reports failure via its return value.
    pub returns_error: bool,
    /// Ordered typed parameters, context excluded.
    pub arguments: Vec<Argument>,
    /// Whether this is the fallback target when none is given.
    pub is_default: bool,
    /// One-line synopsis from the leading doc comment.
    pub documentation: String,
    /// File the function was declared in.
    pub file: PathBuf,
}

impl TaskFunction {
    /// The user-visible target name: alias, receiver, and function name
    /// joined with `:`, empty components dropped, first letter of each
    /// component lowercased.
    #[must_use]
    pub fn target_name(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if !self.package_alias.is_empty() {
            parts.push(lower_first(&self.package_alias));
        }
        if !self.receiver.is_empty() {
            parts.push(lower_first(&self.receiver));
        }
        parts.push(lower_first(&self.name));
        parts.join(":")
    }

    /// Declaration site for conflict diagnostics.
    #[must_use]
    pub fn source_label(&self) -> String {
        let qualified = if self.receiver.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.receiver, self.name)
        };
        format!("{qualified} ({})", self.file.display())
    }
}

/// Lowercase the first character of an identifier component.
#[must_use]
pub fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// A reference to a secondary analysis rooted at another package.
#[derive(Debug, Clone)]
pub struct ImportedPackage {
    /// User-chosen short name; empty means "contribute only root-level,
    /// receiver-less functions".
    pub alias: String,
    /// Generator-assigned identifier, unique across all imports, used by the
    /// driver renderer to name the mounted file modules.
    pub unique_symbol: String,
    /// Logical package path.
    pub import_path: String,
    /// Nested analysis of the imported package.
    pub description: PackageDescription,
    /// Files belonging to the imported package, sorted.
    pub files: Vec<PathBuf>,
}

/// Output of the analyser for one package of task files.
#[derive(Debug, Clone, Default)]
pub struct PackageDescription {
    /// One-line package summary from the first file-level doc comment.
    pub description: String,
    /// Local task functions, sorted by target name.
    pub functions: Vec<TaskFunction>,
    /// Canonical target name of the default target, if one is declared.
    pub default: Option<String>,
    /// Alias string to canonical target name, resolved and validated.
    pub aliases: BTreeMap<String, String>,
    /// Tagged imports in first-seen order.
    pub imports: Vec<ImportedPackage>,
}

impl PackageDescription {
    /// The full contributed target set: local functions plus, per import,
    /// the import's own functions under the contribution rules (root imports
    /// contribute only receiver-less functions; named imports contribute all
    /// of theirs prefixed by the alias). Silent imports contribute nothing.
    #[must_use]
    pub fn all_functions(&self) -> Vec<TaskFunction> {
        let mut out = self.functions.clone();
        for import in &self.imports {
            for function in &import.description.functions {
                if import.alias.is_empty() && !function.receiver.is_empty() {
                    continue;
                }
                let mut contributed = function.clone();
                contributed.package_alias = import.alias.clone();
                contributed.import_path = import.import_path.clone();
                out.push(contributed);
            }
        }
        out.sort_by_key(TaskFunction::target_name);
        out
    }

    /// Every file that must be mounted into the driver, local files excluded:
    /// the import set, recursively, in deterministic order.
    #[must_use]
    pub fn imported_files(&self) -> Vec<(String, Vec<PathBuf>)> {
        let mut out = Vec::new();
        for import in &self.imports {
            out.push((import.unique_symbol.clone(), import.files.clone()));
            out.extend(import.description.imported_files());
        }
        out
    }
}

/// Analyses task files into a [`PackageDescription`], following tagged
/// imports through the injected executor.
#[derive(Debug)]
pub struct Analyser<'a> {
    exec: &'a dyn Executor,
    toolchain: String,
    platform: String,
}

impl<'a> Analyser<'a> {
    /// Create an analyser that locates imported packages with `toolchain`
    /// (the cargo command) and filters files for `platform`.
    pub fn new(exec: &'a dyn Executor, toolchain: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            exec,
            toolchain: toolchain.into(),
            platform: platform.into(),
        }
    }

    /// Analyse the selected files of the root package.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or unparsable files, degenerate signatures,
    /// duplicate targets, alias collisions, unresolvable defaults or
    /// aliases, and import cycles.
    pub fn analyse(&self, files: &[PathBuf]) -> Result<PackageDescription, StaveError> {
        let mut symbols = 0usize;
        let mut visited: Vec<String> = Vec::new();
        self.analyse_files(files, &mut symbols, &mut visited)
    }

    fn analyse_files(
        &self,
        files: &[PathBuf],
        symbols: &mut usize,
        visited: &mut Vec<String>,
    ) -> Result<PackageDescription, StaveError> {
        let mut functions: Vec<TaskFunction> = Vec::new();
        let mut default_name: Option<String> = None;
        let mut alias_decls: BTreeMap<String, String> = BTreeMap::new();
        let mut description = String::new();
        let mut raw_imports: Vec<imports::RawImport> = Vec::new();

        for file in files {
            let content =
                std::fs::read_to_string(file).map_err(|err| StaveError::io(file.clone(), err))?;
            raw_imports.extend(imports::scan_imports(&content, file)?);
            let parsed = parse::parse_task_file(file, &content)?;
            if description.is_empty() {
                if let Some(d) = parsed.description {
                    description = d;
                }
            }
            if let Some(d) = parsed.default {
                if default_name.is_some() {
                    return Err(AnalysisError::DuplicateDefault.into());
                }
                default_name = Some(d);
            }
            for (alias, target) in parsed.aliases {
                if alias_decls.insert(alias.clone(), target).is_some() {
                    return Err(AnalysisError::AliasCollision {
                        alias,
                        existing: "another alias declaration".to_string(),
                    }
                    .into());
                }
            }
            functions.extend(parsed.functions);
        }

        let imports = self.resolve_imports(&raw_imports, symbols, visited)?;

        functions.sort_by_key(TaskFunction::target_name);
        let mut package = PackageDescription {
            description,
            functions,
            default: None,
            aliases: BTreeMap::new(),
            imports,
        };

        let contributed = package.all_functions();
        conflict::check(&contributed, &alias_decls)?;

        if let Some(wanted) = default_name {
            let canonical = contributed
                .iter()
                .map(TaskFunction::target_name)
                .find(|t| t.eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| AnalysisError::UnknownDefault(wanted.clone()))?;
            for function in &mut package.functions {
                if function.target_name() == canonical {
                    function.is_default = true;
                }
            }
            package.default = Some(canonical);
        }

        for (alias, wanted) in alias_decls {
            let canonical = contributed
                .iter()
                .map(TaskFunction::target_name)
                .find(|t| t.eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| AnalysisError::UnknownAliasTarget {
                    alias: alias.clone(),
                    target: wanted.clone(),
                })?;
            package.aliases.insert(alias, canonical);
        }

        Ok(package)
    }

    fn resolve_imports(
        &self,
        raw: &[imports::RawImport],
        symbols: &mut usize,
        visited: &mut Vec<String>,
    ) -> Result<Vec<ImportedPackage>, StaveError> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::new();
        for import in raw {
            if !seen.insert(import.package.clone()) {
                continue;
            }
            if SILENT_IMPORTS.contains(&import.package.as_str()) {
                out.push(ImportedPackage {
                    alias: String::new(),
                    unique_symbol: String::new(),
                    import_path: import.package.clone(),
                    description: PackageDescription::default(),
                    files: Vec::new(),
                });
                continue;
            }
            if visited.contains(&import.package) {
                let mut chain = visited.clone();
                chain.push(import.package.clone());
                return Err(AnalysisError::ImportCycle { chain }.into());
            }
            let start_dir = import.file.parent().unwrap_or_else(|| Path::new("."));
            let dir = imports::locate_package(self.exec, &self.toolchain, start_dir, &import.package)?;
            let files = select_import_files(&dir, &self.platform)?;
            *symbols += 1;
            let unique_symbol = format!("imp{symbols}");
            visited.push(import.package.clone());
            let description = self.analyse_files(&files, symbols, visited)?;
            visited.pop();
            out.push(ImportedPackage {
                alias: import.alias.clone().unwrap_or_default(),
                unique_symbol,
                import_path: import.package.clone(),
                description,
                files,
            });
        }
        Ok(out)
    }
}

/// Select the task files of an imported package: its dedicated `stavefiles`
/// directory when present, otherwise marker-carrying files at its root.
fn select_import_files(dir: &Path, platform: &str) -> Result<Vec<PathBuf>, StaveError> {
    let dedicated = dir.join(select::DEDICATED_DIR);
    if dedicated.is_dir() {
        select::select_task_files(&dedicated, platform, true)
    } else {
        select::select_task_files(dir, platform, false)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn free_fn(name: &str) -> TaskFunction {
        TaskFunction {
            name: name.to_string(),
            receiver: String::new(),
            package_alias: String::new(),
            import_path: String::new(),
            takes_context: false,
            returns_error: false,
            arguments: Vec::new(),
            is_default: false,
            documentation: String::new(),
            file: PathBuf::from("tasks.rs"),
        }
    }

    // -----------------------------------------------------------------------
    // Target name computation
    // -----------------------------------------------------------------------

    #[test]
    fn target_name_free_function() {
        assert_eq!(free_fn("Build").target_name(), "build");
        assert_eq!(free_fn("deploy").target_name(), "deploy");
    }

    #[test]
    fn target_name_with_receiver() {
        let mut f = free_fn("Migrate");
        f.receiver = "Db".to_string();
        assert_eq!(f.target_name(), "db:migrate");
    }

    #[test]
    fn target_name_with_alias_and_receiver() {
        let mut f = free_fn("Lint");
        f.receiver = "CI".to_string();
        f.package_alias = "Shared".to_string();
        assert_eq!(f.target_name(), "shared:cI:lint");
    }

    #[test]
    fn lower_first_only_touches_first_letter() {
        assert_eq!(lower_first("BuildAll"), "buildAll");
        assert_eq!(lower_first(""), "");
    }

    // -----------------------------------------------------------------------
    // Contribution rules
    // -----------------------------------------------------------------------

    fn import_with(alias: &str, functions: Vec<TaskFunction>) -> ImportedPackage {
        ImportedPackage {
            alias: alias.to_string(),
            unique_symbol: "imp1".to_string(),
            import_path: "shared".to_string(),
            description: PackageDescription {
                functions,
                ..PackageDescription::default()
            },
            files: vec![PathBuf::from("/shared/tasks.rs")],
        }
    }

    #[test]
    fn root_import_contributes_only_free_functions() {
        let mut grouped = free_fn("Migrate");
        grouped.receiver = "Db".to_string();
        let package = PackageDescription {
            functions: vec![free_fn("Build")],
            imports: vec![import_with("", vec![free_fn("Clean"), grouped])],
            ..PackageDescription::default()
        };
        let names: Vec<String> = package
            .all_functions()
            .iter()
            .map(TaskFunction::target_name)
            .collect();
        assert_eq!(names, vec!["build", "clean"]);
    }

    #[test]
    fn named_import_prefixes_all_functions() {
        let mut grouped = free_fn("Migrate");
        grouped.receiver = "Db".to_string();
        let package = PackageDescription {
            functions: vec![free_fn("Build")],
            imports: vec![import_with("shared", vec![free_fn("Clean"), grouped])],
            ..PackageDescription::default()
        };
        let names: Vec<String> = package
            .all_functions()
            .iter()
            .map(TaskFunction::target_name)
            .collect();
        assert_eq!(names, vec!["build", "shared:clean", "shared:db:migrate"]);
    }

    #[test]
    fn all_functions_is_sorted_by_target_name() {
        let package = PackageDescription {
            functions: vec![free_fn("Zeta"), free_fn("Alpha")],
            ..PackageDescription::default()
        };
        let names: Vec<String> = package
            .all_functions()
            .iter()
            .map(TaskFunction::target_name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn silent_import_list_is_fixed() {
        assert!(SILENT_IMPORTS.contains(&"stave"));
        assert!(SILENT_IMPORTS.contains(&"stave_sh"));
    }
}
