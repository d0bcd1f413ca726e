//! Content-addressed naming of compiled driver binaries.
//!
//! The fingerprint covers every task source file, the driver template, the
//! toolchain version, and the tool's own version, so any change to any of
//! them lands on a fresh cache entry. The cache itself is a flat directory
//! of hex-named executables.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::StaveError;
use crate::rt::env_names;

/// Hex digest of a byte string.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Compute the cache fingerprint for a set of task files.
///
/// File digests are computed in parallel and hex-sorted before hashing so
/// the result is independent of enumeration order. `toolchain_version` is
/// `None` under `--hashfast`, in which case only the task files and the
/// template participate.
///
/// # Errors
///
/// Fails when any task file cannot be read.
pub fn fingerprint(
    files: &[PathBuf],
    template: &str,
    toolchain_version: Option<&str>,
    tool_version: &str,
) -> Result<String, StaveError> {
    let mut digests = files
        .par_iter()
        .map(|file| {
            std::fs::read(file)
                .map(|bytes| hex_digest(&bytes))
                .map_err(|err| StaveError::io(file.clone(), err))
        })
        .collect::<Result<Vec<String>, StaveError>>()?;
    digests.sort();

    let mut combined = digests.concat();
    combined.push_str(&hex_digest(template.as_bytes()));
    if let Some(version) = toolchain_version {
        combined.push_str(version);
    }
    combined.push_str(tool_version);
    Ok(hex_digest(combined.as_bytes()))
}

/// The on-disk path of the driver binary for a fingerprint.
#[must_use]
pub fn binary_path(cache_dir: &Path, fingerprint: &str) -> PathBuf {
    cache_dir.join(format!("{fingerprint}{}", std::env::consts::EXE_SUFFIX))
}

/// Resolve the cache directory: the `STAVEFILE_CACHE` override, then
/// `$XDG_CACHE_HOME/stave`, then the home-relative default.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(env_names::CACHE) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Path::new(&xdg).join("stave");
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".cache").join("stave")
}

/// Remove every non-directory entry from the cache directory, returning how
/// many were deleted. A missing cache directory is treated as already clean.
///
/// # Errors
///
/// Fails when the directory exists but cannot be enumerated, or an entry
/// cannot be removed.
pub fn clean(dir: &Path) -> Result<usize, StaveError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(StaveError::io(dir.to_path_buf(), err)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|err| StaveError::io(dir.to_path_buf(), err))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        std::fs::remove_file(&path).map_err(|err| StaveError::io(path.clone(), err))?;
        removed += 1;
    }
    Ok(removed)
}
