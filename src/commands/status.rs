use std::path::PathBuf;

use clap::Args;

use crate::commands::resolve_repo;
use crate::plan::{PLAN_BRANCH, PlanStore};
use crate::tickets::{
    AREAS_DIR, QUEUE_ACTIVE, QUEUE_PENDING, TICKETS_DONE, TICKETS_IN_PROGRESS, TICKETS_OPEN,
};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Repository root (defaults to the current directory)
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let repo = resolve_repo(self.repo.as_deref())?;
        let store = PlanStore::new(&repo);
        let files = store.list_markdown_files()?;

        let in_prefix = |prefix: &str| {
            files
                .iter()
                .filter(|f| f.starts_with(&format!("{prefix}/")))
                .cloned()
                .collect::<Vec<_>>()
        };
        let areas = in_prefix(AREAS_DIR);
        let open = in_prefix(TICKETS_OPEN);
        let in_progress = in_prefix(TICKETS_IN_PROGRESS);
        let done = in_prefix(TICKETS_DONE);
        let pending = in_prefix(QUEUE_PENDING);
        let active = store
            .try_read_file(QUEUE_ACTIVE)?
            .unwrap_or_default()
            .trim()
            .to_string();

        println!("Plan branch: {PLAN_BRANCH}");
        println!("Areas:       {}", areas.len());
        println!(
            "Tickets:     open {} | in-progress {} | done {}",
            open.len(),
            in_progress.len(),
            done.len()
        );
        println!(
            "Queue:       {} pending, active: {}",
            pending.len(),
            if active.is_empty() { "(idle)" } else { active.as_str() }
        );

        for (label, list) in [("open", &open), ("in-progress", &in_progress)] {
            if list.is_empty() {
                continue;
            }
            println!("\n{label}:");
            for file in list {
                println!("  {file}");
            }
        }
        Ok(())
    }
}
