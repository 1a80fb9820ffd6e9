use std::path::PathBuf;

use clap::Args;

use crate::commands::resolve_repo;
use crate::plan::PlanStore;
use crate::tickets::{self, TICKETS_IN_PROGRESS};

#[derive(Debug, Args)]
pub struct WorktreesArgs {
    /// Repository root (defaults to the current directory)
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

impl WorktreesArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let repo = resolve_repo(self.repo.as_deref())?;
        let store = PlanStore::new(&repo);

        let in_progress: Vec<String> = store
            .list_markdown_files()?
            .into_iter()
            .filter(|f| f.starts_with(&format!("{TICKETS_IN_PROGRESS}/")))
            .collect();

        if in_progress.is_empty() {
            println!("No ticket worktrees.");
            return Ok(());
        }
        for file in in_progress {
            let body = store.read_file(&file)?;
            let worktree = tickets::parse_worktree_path(&body)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(no worktree recorded)".to_string());
            let name = file.rsplit('/').next().unwrap_or(&file);
            println!("{name}  {worktree}");
        }
        Ok(())
    }
}
