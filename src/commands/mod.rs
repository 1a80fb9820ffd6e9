pub mod run;
pub mod status;
pub mod worktrees;

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Repository root: explicit flag or the current directory.
pub fn resolve_repo(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("getting current directory"),
    }
}
