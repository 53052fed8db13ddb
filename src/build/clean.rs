//! Build artifact cleanup.
//!
//! `nest clean` removes the project's `build/` folder: generated backend
//! projects, outputs and the dependency cache (`build/.deps`).

use crate::error::{IoContext, Result};
use crate::graph::OUTPUT_DIR;
use colored::*;
use std::fs;
use std::path::Path;

/// Remove `<root>/build`. Returns whether anything was removed.
pub fn clean(root: &Path) -> Result<bool> {
    let build = root.join(OUTPUT_DIR);
    if !build.exists() {
        println!("{} Nothing to clean", "!".yellow());
        return Ok(false);
    }
    fs::remove_dir_all(&build).with_path(&build)?;
    println!("{} Removed {}", "🗑️".red(), build.display());
    println!("{} Clean complete.", "✓".green());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_removes_build_folder_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build/.deps/zlib")).unwrap();
        fs::write(dir.path().join("nest.toml"), "").unwrap();

        assert!(clean(dir.path()).unwrap());
        assert!(!dir.path().join("build").exists());
        assert!(dir.path().join("nest.toml").exists());
        assert!(!clean(dir.path()).unwrap());
    }
}
