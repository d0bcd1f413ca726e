//! Version-control repository discovery.
//!
//! The pipeline only needs three facts about a repository: its working-tree
//! root, its metadata directory, and whether a hook-directory override is
//! configured. Everything else about git stays behind this module.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

/// The facts the hook installer needs about a repository.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    /// Working-tree root (the metadata directory for bare repositories).
    pub root: PathBuf,
    /// The internal metadata directory (`.git`).
    pub git_dir: PathBuf,
    /// `core.hooksPath` override, when configured.
    pub hooks_override: Option<PathBuf>,
}

impl RepoInfo {
    /// The directory hook scripts belong in: the configured override
    /// (resolved against the root when relative), else `.git/hooks`.
    #[must_use]
    pub fn hooks_dir(&self) -> PathBuf {
        match &self.hooks_override {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.root.join(path),
            None => self.git_dir.join("hooks"),
        }
    }
}

/// Discover the repository containing `start`.
///
/// # Errors
///
/// Fails when `start` is not inside a git repository.
pub fn discover(start: &Path) -> Result<RepoInfo> {
    let repo = git2::Repository::discover(start)
        .with_context(|| format!("{} is not inside a git repository", start.display()))?;
    let git_dir = repo.path().to_path_buf();
    let root = repo
        .workdir()
        .map_or_else(|| git_dir.clone(), Path::to_path_buf);
    let hooks_override = repo
        .config()
        .ok()
        .and_then(|config| config.get_path("core.hookspath").ok());
    Ok(RepoInfo {
        root,
        git_dir,
        hooks_override,
    })
}
