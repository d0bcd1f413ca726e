//! Generated hook shim scripts: rendering, installation, removal.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

/// Marker identifying a script as ours; must appear within the first five
/// lines. Its presence is the criterion for "stave-managed" on uninstall.
pub const MARKER: &str = "Installed by Stave: DO NOT EDIT BY HAND";

/// Render the portable shim for one hook.
///
/// The script sources the optional user init file from the XDG config path,
/// honours the hook master switch (`0` disables, `debug` traces), and
/// replaces itself with the tool's hook-run subcommand.
#[must_use]
pub fn render_script(hook: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # {MARKER}\n\
         # Hook: {hook}\n\
         \n\
         if [ -n \"$XDG_CONFIG_HOME\" ]; then\n\
         \tstave_init=\"$XDG_CONFIG_HOME/stave/init.sh\"\n\
         else\n\
         \tstave_init=\"$HOME/.config/stave/init.sh\"\n\
         fi\n\
         if [ -f \"$stave_init\" ]; then\n\
         \t. \"$stave_init\"\n\
         fi\n\
         \n\
         if [ \"$STAVE_HOOKS\" = \"0\" ]; then\n\
         \texit 0\n\
         fi\n\
         if [ \"$STAVE_HOOKS\" = \"debug\" ]; then\n\
         \tset -x\n\
         fi\n\
         \n\
         STAVE_HOOKS_RUNNING=1 exec stave hooks run {hook} -- \"$@\"\n"
    )
}

/// Whether file contents identify a stave-managed script.
#[must_use]
pub fn is_managed(content: &str) -> bool {
    content.lines().take(5).any(|line| line.contains(MARKER))
}

/// Install shims for `hooks` into the hook directory, creating it if
/// needed. Existing stave-managed scripts are replaced.
///
/// # Errors
///
/// Refuses to overwrite a foreign hook script; fails on filesystem errors.
pub fn install(hooks_dir: &Path, hooks: &[&str]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(hooks_dir)
        .with_context(|| format!("creating {}", hooks_dir.display()))?;
    let mut installed = Vec::new();
    for hook in hooks {
        let path = hooks_dir.join(hook);
        if path.exists() {
            let existing = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            if !is_managed(&existing) {
                bail!(
                    "refusing to overwrite foreign hook script {}",
                    path.display()
                );
            }
        }
        std::fs::write(&path, render_script(hook))
            .with_context(|| format!("writing {}", path.display()))?;
        make_executable(&path)?;
        installed.push(path);
    }
    Ok(installed)
}

/// Remove every stave-managed script from the hook directory, returning the
/// names removed. Foreign scripts are left alone.
///
/// # Errors
///
/// Fails on filesystem errors other than a missing hook directory.
pub fn uninstall(hooks_dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(hooks_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", hooks_dir.display()));
        }
    };
    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", hooks_dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if !is_managed(&content) {
            continue;
        }
        std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            removed.push(name.to_string());
        }
    }
    removed.sort();
    Ok(removed)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .with_context(|| format!("reading metadata: {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("setting permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
