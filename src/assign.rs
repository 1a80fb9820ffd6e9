//! Ticket assignment: oldest open ticket gets a branch, an isolated
//! worktree, and an `in-progress` move on the plan branch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::error::Error;
use crate::git::Git;
use crate::plan::PlanStore;
use crate::tickets::{
    self, PendingEntry, TICKETS_IN_PROGRESS, TICKETS_OPEN, pending_entry_name, ticket_branch,
};

/// Where per-ticket worktrees live, relative to the repo root.
pub const WORKTREE_ROOT: &str = ".scriptorium/worktrees";

#[derive(Debug, Clone)]
pub struct Assignment {
    pub ticket_id: u32,
    pub slug: String,
    pub branch: String,
    pub worktree: PathBuf,
    /// Plan-relative path of the ticket file after the move.
    pub in_progress_ticket: String,
}

/// Assign the lexicographically smallest open ticket: branch off master,
/// add a worktree, move the ticket to `in-progress` with its worktree
/// recorded. `NoTicketsAvailable` when `tickets/open/` is empty.
pub fn assign_oldest_open_ticket(repo: &Path) -> anyhow::Result<Assignment> {
    let store = PlanStore::new(repo);
    store.with_worktree(|plan| {
        let open = tickets::list_state(plan, TICKETS_OPEN)?;
        let mut candidates = open
            .iter()
            .filter_map(|name| tickets::parse_ticket_filename(name).map(|(id, slug)| (name, id, slug)));
        let Some((name, ticket_id, slug)) = candidates.next() else {
            return Err(Error::NoTicketsAvailable.into());
        };

        let branch = ticket_branch(ticket_id);
        let worktree = ticket_worktree_path(repo, ticket_id);
        create_ticket_checkout(repo, &branch, &worktree)?;

        let open_path = plan.join(TICKETS_OPEN).join(name);
        let mut body = fs::read_to_string(&open_path)
            .with_context(|| format!("reading {}", open_path.display()))?;
        if !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&format!("**Worktree:** {}\n", worktree.display()));

        let in_progress_name = name.clone();
        fs::write(plan.join(TICKETS_IN_PROGRESS).join(&in_progress_name), body)?;
        fs::remove_file(&open_path)?;
        store.commit_if_changed(plan, &format!("scriptorium: assign ticket {ticket_id:04}"))?;

        info!(ticket = ticket_id, branch = %branch, "assigned ticket");
        Ok(Assignment {
            ticket_id,
            slug,
            branch,
            worktree,
            in_progress_ticket: format!("{TICKETS_IN_PROGRESS}/{in_progress_name}"),
        })
    })
}

/// Record a completed agent run in the merge queue.
pub fn enqueue_merge_request(
    repo: &Path,
    assignment: &Assignment,
    summary: &str,
) -> anyhow::Result<()> {
    let store = PlanStore::new(repo);
    let entry = PendingEntry {
        ticket_id: assignment.ticket_id,
        ticket_path: assignment.in_progress_ticket.clone(),
        branch: assignment.branch.clone(),
        worktree: assignment.worktree.clone(),
        summary: summary.to_string(),
    };
    store.with_worktree(|plan| {
        let pending = plan.join(tickets::QUEUE_PENDING);
        fs::create_dir_all(&pending)?;
        fs::write(
            pending.join(pending_entry_name(assignment.ticket_id)),
            entry.render(),
        )?;
        store.commit_if_changed(
            plan,
            &format!("scriptorium: enqueue ticket {:04}", assignment.ticket_id),
        )?;
        Ok(())
    })
}

pub fn ticket_worktree_path(repo: &Path, ticket_id: u32) -> PathBuf {
    repo.join(WORKTREE_ROOT).join(format!("{ticket_id:04}"))
}

/// Create (or re-create after a crash) the ticket branch and worktree.
pub fn create_ticket_checkout(repo: &Path, branch: &str, worktree: &Path) -> anyhow::Result<()> {
    let git = Git::new(repo);
    if !git.ref_exists(&format!("refs/heads/{branch}"))? {
        git.run(&["branch", branch, "master"])?;
    }
    if worktree.exists() {
        let _ = git.try_run(&["worktree", "remove", "--force", &worktree.display().to_string()]);
        let _ = fs::remove_dir_all(worktree);
        let _ = git.try_run(&["worktree", "prune"]);
    }
    ensure_scriptorium_ignored(repo)?;
    if let Some(parent) = worktree.parent() {
        fs::create_dir_all(parent)?;
    }
    git.run(&["worktree", "add", &worktree.display().to_string(), branch])?;
    Ok(())
}

/// `.scriptorium/` holds worktrees and logs inside the main checkout; a
/// self-ignoring marker keeps them out of product commits.
fn ensure_scriptorium_ignored(repo: &Path) -> anyhow::Result<()> {
    let dir = repo.join(".scriptorium");
    fs::create_dir_all(&dir)?;
    let marker = dir.join(".gitignore");
    if !marker.exists() {
        fs::write(marker, "*\n")?;
    }
    Ok(())
}

/// Drop a ticket's checkout. `delete_branch` on reopen so a later
/// assignment branches from the then-current master.
pub fn remove_ticket_checkout(repo: &Path, branch: &str, worktree: &Path, delete_branch: bool) {
    let git = Git::new(repo);
    let _ = git.try_run(&["worktree", "remove", "--force", &worktree.display().to_string()]);
    let _ = fs::remove_dir_all(worktree);
    let _ = git.try_run(&["worktree", "prune"]);
    if delete_branch {
        let _ = git.try_run(&["branch", "-D", branch]);
    }
}
