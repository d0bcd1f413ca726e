//! Task-file selection: which `.rs` files in a directory feed the analyser.

use std::path::{Path, PathBuf};

use crate::error::StaveError;

/// Name of the dedicated task directory convention.
pub const DEDICATED_DIR: &str = "stavefiles";

/// Marker comment that opts a file into the task build outside the dedicated
/// directory. Must appear in the file's leading comment block.
pub const TASKFILE_MARKER: &str = "// stave:taskfile";

/// File name of the generated driver; never selected as input.
pub const DRIVER_FILE: &str = "stave_driver.rs";

/// Enumerate the task source files of `dir` for `platform`.
///
/// Inside a dedicated task directory every `.rs` file participates; anywhere
/// else only files carrying [`TASKFILE_MARKER`] do — the set difference
/// between "visible with the task constraint" and "visible without it",
/// which lets helper files stay with the main build. Platform-suffixed
/// files (`_windows`, `_linux`, `_macos`, `_unix`) are filtered against the
/// build platform. The result is absolute and sorted.
///
/// # Errors
///
/// Fails when the directory cannot be read; an empty selection is not an
/// error.
pub fn select_task_files(
    dir: &Path,
    platform: &str,
    dedicated: bool,
) -> Result<Vec<PathBuf>, StaveError> {
    let entries =
        std::fs::read_dir(dir).map_err(|err| StaveError::io(dir.to_path_buf(), err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| StaveError::io(dir.to_path_buf(), err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || name == DRIVER_FILE || !name.ends_with(".rs") {
            continue;
        }
        let stem = name.trim_end_matches(".rs");
        if !platform_matches(stem, platform) {
            continue;
        }
        if !dedicated {
            let content = std::fs::read_to_string(&path)
                .map_err(|err| StaveError::io(path.clone(), err))?;
            if !has_taskfile_marker(&content) {
                continue;
            }
        }
        let absolute = dunce::canonicalize(&path)
            .map_err(|err| StaveError::io(path.clone(), err))?;
        files.push(absolute);
    }
    files.sort();
    Ok(files)
}

/// Whether a platform-suffixed file stem is visible for `platform`.
fn platform_matches(stem: &str, platform: &str) -> bool {
    for suffix in ["windows", "linux", "macos", "unix"] {
        if let Some(base) = stem.strip_suffix(suffix) {
            if !base.ends_with('_') {
                continue;
            }
            return match suffix {
                "unix" => platform != "windows",
                other => platform == other,
            };
        }
    }
    true
}

/// Whether the file's leading comment block carries the task marker.
fn has_taskfile_marker(content: &str) -> bool {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("//") {
            if trimmed == TASKFILE_MARKER {
                return true;
            }
            continue;
        }
        // First real code line ends the leading block.
        return false;
    }
    false
}
