//! Tagged-import directives and toolchain-backed package location.
//!
//! Directive comments (`// stave:import [alias]`) do not survive into the
//! AST, so they are scanned textually, attached to the `use` declaration
//! they lead or trail. Locating the imported package shells out to the
//! toolchain's metadata command through the injected executor.

use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, StaveError};
use crate::exec::Executor;

/// Directive prefix marking an import to be followed.
pub const IMPORT_DIRECTIVE: &str = "// stave:import";

/// One tagged import found in a task file, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImport {
    /// Package name, the last segment of the `use` path.
    pub package: String,
    /// Alias from the directive; `None` marks a root import.
    pub alias: Option<String>,
    /// File the directive appeared in.
    pub file: PathBuf,
    /// 1-based line of the `use` declaration.
    pub line: usize,
}

/// Scan a file's text for tagged imports.
///
/// # Errors
///
/// Fails on a malformed directive: extra tokens, an alias that is not an
/// identifier, or a leading directive with no `use` declaration under it.
pub fn scan_imports(content: &str, file: &Path) -> Result<Vec<RawImport>, AnalysisError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if let Some(directive) = trimmed.strip_prefix(IMPORT_DIRECTIVE) {
            // Leading form: the next non-blank line must be the use item.
            let alias = parse_directive_args(directive, file, i + 1)?;
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            let target = lines.get(j).map(|l| l.trim()).unwrap_or_default();
            let Some(package) = use_path_package(target) else {
                return Err(malformed(file, i + 1, "directive is not attached to a use declaration"));
            };
            out.push(RawImport {
                package,
                alias,
                file: file.to_path_buf(),
                line: j + 1,
            });
            i = j + 1;
            continue;
        }
        // Trailing form: `use ...; // stave:import [alias]`.
        if let Some(comment_at) = lines[i].find(IMPORT_DIRECTIVE) {
            let code = &lines[i][..comment_at];
            if let Some(package) = use_path_package(code.trim()) {
                let directive = &lines[i][comment_at + IMPORT_DIRECTIVE.len()..];
                let alias = parse_directive_args(directive, file, i + 1)?;
                out.push(RawImport {
                    package,
                    alias,
                    file: file.to_path_buf(),
                    line: i + 1,
                });
            }
        }
        i += 1;
    }
    Ok(out)
}

fn malformed(file: &Path, line: usize, reason: &str) -> AnalysisError {
    AnalysisError::Parse {
        file: file.to_path_buf(),
        message: format!("line {line}: invalid stave:import directive: {reason}"),
    }
}

/// Parse the directive's trailing tokens: nothing (root import) or a single
/// identifier alias.
fn parse_directive_args(
    rest: &str,
    file: &Path,
    line: usize,
) -> Result<Option<String>, AnalysisError> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Ok(None),
        [alias] => {
            if is_identifier(alias) {
                Ok(Some((*alias).to_string()))
            } else {
                Err(malformed(file, line, "alias must be an identifier"))
            }
        }
        _ => Err(malformed(file, line, "too many tokens")),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The package name referenced by a `use` line: the last path segment, with
/// `crate::` prefixes, visibility qualifiers, renames, and glob/brace forms
/// rejected.
fn use_path_package(line: &str) -> Option<String> {
    let line = line.strip_prefix("pub ").unwrap_or(line);
    let rest = line.strip_prefix("use ")?;
    let path = rest.split(';').next()?.trim();
    let path = path.split(" as ").next()?.trim();
    if path.contains('{') || path.contains('*') {
        return None;
    }
    let last = path.rsplit("::").next()?.trim();
    if is_identifier(last) && last != "crate" {
        Some(last.to_string())
    } else {
        None
    }
}

/// Locate an imported package's directory by asking the toolchain for
/// workspace metadata, run from the importing file's directory.
///
/// # Errors
///
/// Fails when the metadata command fails, its output is not valid JSON, or
/// the package is not listed.
pub fn locate_package(
    exec: &dyn Executor,
    toolchain: &str,
    start_dir: &Path,
    name: &str,
) -> Result<PathBuf, StaveError> {
    let result = exec
        .run_in(start_dir, toolchain, &["metadata", "--format-version", "1"])
        .map_err(|_| AnalysisError::ImportNotFound(name.to_string()))?;
    package_dir_from_metadata(&result.stdout, name)
}

/// Extract one package's directory from `cargo metadata` JSON.
///
/// # Errors
///
/// Fails when the JSON does not parse or the package is absent.
pub fn package_dir_from_metadata(metadata: &str, name: &str) -> Result<PathBuf, StaveError> {
    let parsed: serde_json::Value = serde_json::from_str(metadata)
        .map_err(|_| AnalysisError::ImportNotFound(name.to_string()))?;
    let packages = parsed
        .get("packages")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| AnalysisError::ImportNotFound(name.to_string()))?;
    for package in packages {
        if package.get("name").and_then(serde_json::Value::as_str) != Some(name) {
            continue;
        }
        let manifest = package
            .get("manifest_path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AnalysisError::ImportNotFound(name.to_string()))?;
        let dir = Path::new(manifest)
            .parent()
            .ok_or_else(|| AnalysisError::ImportNotFound(name.to_string()))?;
        return Ok(dir.to_path_buf());
    }
    Err(AnalysisError::ImportNotFound(name.to_string()).into())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn scan(content: &str) -> Vec<RawImport> {
        scan_imports(content, &PathBuf::from("tasks.rs")).expect("scan imports")
    }

    // -----------------------------------------------------------------------
    // Directive forms
    // -----------------------------------------------------------------------

    #[test]
    fn trailing_directive_root_import() {
        let found = scan("use crate::helpers; // stave:import\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].package, "helpers");
        assert_eq!(found[0].alias, None);
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn trailing_directive_with_alias() {
        let found = scan("use crate::shared_tasks; // stave:import shared\n");
        assert_eq!(found[0].package, "shared_tasks");
        assert_eq!(found[0].alias.as_deref(), Some("shared"));
    }

    #[test]
    fn leading_directive() {
        let found = scan("// stave:import ci\nuse crate::ci_tasks;\n");
        assert_eq!(found[0].package, "ci_tasks");
        assert_eq!(found[0].alias.as_deref(), Some("ci"));
        assert_eq!(found[0].line, 2);
    }

    #[test]
    fn untagged_use_is_ignored() {
        assert!(scan("use std::time::Duration;\nuse crate::helpers;\n").is_empty());
    }

    #[test]
    fn nested_path_takes_last_segment() {
        let found = scan("use crate::vendor::ci; // stave:import\n");
        assert_eq!(found[0].package, "ci");
    }

    // -----------------------------------------------------------------------
    // Directive validation
    // -----------------------------------------------------------------------

    #[test]
    fn dangling_leading_directive_is_an_error() {
        let err = scan_imports("// stave:import ci\npub fn build() {}\n", &PathBuf::from("t.rs"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid stave:import directive"));
    }

    #[test]
    fn non_identifier_alias_is_an_error() {
        let err = scan_imports(
            "use crate::x; // stave:import 1bad\n",
            &PathBuf::from("t.rs"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("alias must be an identifier"));
    }

    #[test]
    fn extra_tokens_are_an_error() {
        let err = scan_imports(
            "use crate::x; // stave:import a b\n",
            &PathBuf::from("t.rs"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("too many tokens"));
    }

    #[test]
    fn glob_and_brace_uses_are_rejected() {
        assert!(use_path_package("use crate::x::*;").is_none());
        assert!(use_path_package("use crate::{a, b};").is_none());
        assert!(use_path_package("use crate::x as y;").map(|p| p == "x").unwrap_or(false));
    }

    // -----------------------------------------------------------------------
    // Metadata lookup
    // -----------------------------------------------------------------------

    const METADATA: &str = r#"{
        "packages": [
            {"name": "other", "manifest_path": "/work/other/Cargo.toml"},
            {"name": "ci_tasks", "manifest_path": "/work/ci/Cargo.toml"}
        ]
    }"#;

    #[test]
    fn package_dir_found_in_metadata() {
        let dir = package_dir_from_metadata(METADATA, "ci_tasks").unwrap();
        assert_eq!(dir, PathBuf::from("/work/ci"));
    }

    #[test]
    fn missing_package_is_import_not_found() {
        let err = package_dir_from_metadata(METADATA, "absent").unwrap_err();
        assert!(err.to_string().contains("absent"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn invalid_json_is_import_not_found() {
        let err = package_dir_from_metadata("not json", "x").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
