//! Cache cleaning.

use anyhow::Result;

use crate::cache;

/// Remove every compiled driver from the cache directory.
///
/// # Errors
///
/// Fails when the cache directory cannot be enumerated or an entry cannot
/// be removed.
pub fn run() -> Result<()> {
    let dir = cache::cache_dir();
    let removed = cache::clean(&dir)?;
    println!("removed {removed} cache entries from {}", dir.display());
    Ok(())
}
