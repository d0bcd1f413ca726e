//! Scaffolding a starter task file.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::analyse::select;

/// Contents of the scaffolded task file. It compiles inside the generated
/// driver, where the runtime is reachable as `crate::stave`.
const STARTER: &str = r#"//! Project tasks.

use crate::stave;

pub const DEFAULT: &str = "build";

/// Build the project.
pub fn build(ctx: &stave::Context) -> stave::TaskResult {
    stave::ctx_deps(ctx, &[stave::func("clean", clean)])?;
    println!("building");
    Ok(())
}

/// Remove build artifacts.
pub fn clean() {
    println!("cleaning");
}
"#;

/// Create `stavefiles/tasks.rs` under `base`, refusing to overwrite.
///
/// # Errors
///
/// Fails when the task file already exists or cannot be written.
pub fn run_in(base: &Path) -> Result<PathBuf> {
    let dir = base.join(select::DEDICATED_DIR);
    let path = dir.join("tasks.rs");
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, STARTER)?;
    Ok(path)
}

/// Scaffold into the current directory and report the created path.
///
/// # Errors
///
/// See [`run_in`].
pub fn run() -> Result<()> {
    let path = run_in(Path::new("."))?;
    println!("created {}", path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::analyse::parse;

    #[test]
    fn scaffold_creates_task_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = run_in(tmp.path()).unwrap();
        assert!(path.ends_with("stavefiles/tasks.rs"));
        assert!(path.is_file());
    }

    #[test]
    fn scaffold_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        run_in(tmp.path()).unwrap();
        let err = run_in(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn starter_file_analyses_cleanly() {
        let parsed = parse::parse_task_file(Path::new("tasks.rs"), STARTER).unwrap();
        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["build", "clean"]);
        assert_eq!(parsed.default.as_deref(), Some("build"));
        assert!(parsed.functions[0].takes_context);
        assert!(parsed.functions[0].returns_error);
    }

    #[test]
    fn starter_file_parses_as_rust() {
        syn::parse_file(STARTER).expect("starter must be valid Rust");
    }
}
