//! Single-flight merge pipeline over `queue/merge/`.
//!
//! One call drains at most one pending entry. `active.md` names the entry in
//! flight; every plan-branch transition lands as a single commit so a crashed
//! run leaves state the next call converges from.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use crate::assign;
use crate::config::HealthConfig;
use crate::git::{Git, run_command};
use crate::plan::PlanStore;
use crate::tickets::{
    self, PendingEntry, QUEUE_ACTIVE, QUEUE_PENDING, TICKETS_DONE, TICKETS_IN_PROGRESS,
    TICKETS_OPEN,
};

/// Outcome of the project health command.
#[derive(Debug)]
pub struct Health {
    pub green: bool,
    pub output: String,
}

/// Run `make test` (and `make integration-test` when configured) in the main
/// checkout. Non-zero exit from either means red master.
pub fn run_health_check(repo: &Path, config: &HealthConfig) -> anyhow::Result<Health> {
    let result = run_command("make", &["test"], repo).context("running project health command")?;
    if !result.success() {
        return Ok(Health {
            green: false,
            output: result.output,
        });
    }
    let mut output = result.output;
    if config.integration_test {
        let integration = run_command("make", &["integration-test"], repo)
            .context("running integration health command")?;
        let green = integration.success();
        output.push_str(&integration.output);
        return Ok(Health { green, output });
    }
    Ok(Health {
        green: true,
        output,
    })
}

enum Selection {
    /// Nothing pending; queue is idle.
    Idle,
    /// Crash recovery finished an already-done ticket; tick consumed.
    Converged(u32),
    Entry(PendingEntry, String),
}

/// Drain one pending entry. Returns false when the queue is idle, true when
/// a tick was consumed (even if the ticket did not advance, e.g. red
/// master).
pub fn process_merge_queue(repo: &Path, health_config: &HealthConfig) -> anyhow::Result<bool> {
    let store = PlanStore::new(repo);

    let selection = store.with_worktree(|plan| select_entry(&store, plan))?;
    let (entry, entry_rel) = match selection {
        Selection::Idle => return Ok(false),
        Selection::Converged(id) => {
            info!(ticket = id, "merge queue converged already-done ticket");
            return Ok(true);
        }
        Selection::Entry(entry, rel) => (entry, rel),
    };

    // Master health gate: a red master halts the queue without advancing it.
    let health = run_health_check(repo, health_config)?;
    if !health.green {
        warn!(ticket = entry.ticket_id, "red master, merge queue halted");
        return Ok(true);
    }

    let git = Git::new(repo);

    // Bring the ticket branch up to date with master first.
    if !entry.worktree.is_dir() {
        assign::create_ticket_checkout(repo, &entry.branch, &entry.worktree)?;
    }
    let update = git.try_run_in(&entry.worktree, &["merge", "master", "--no-edit"])?;
    if !update.success() {
        let _ = git.try_run_in(&entry.worktree, &["merge", "--abort"]);
        warn!(ticket = entry.ticket_id, "master -> ticket merge conflict");
        reopen_with_failure(repo, &entry, &entry_rel, "CONFLICT", &update.output)?;
        assign::remove_ticket_checkout(repo, &entry.branch, &entry.worktree, true);
        return Ok(true);
    }

    // Merge into master.
    let pre_merge = git.run(&["rev-parse", "HEAD"])?.trim().to_string();
    let merge = git.try_run(&["merge", &entry.branch, "--no-ff", "--no-edit"])?;
    if !merge.success() {
        let _ = git.try_run(&["merge", "--abort"]);
        warn!(ticket = entry.ticket_id, "ticket -> master merge conflict");
        reopen_with_failure(repo, &entry, &entry_rel, "CONFLICT", &merge.output)?;
        assign::remove_ticket_checkout(repo, &entry.branch, &entry.worktree, true);
        return Ok(true);
    }

    // Post-merge health gate: back out the merge if master went red.
    let health = run_health_check(repo, health_config)?;
    if !health.green {
        git.run(&["reset", "--hard", &pre_merge])?;
        warn!(ticket = entry.ticket_id, "post-merge health failed, merge reverted");
        reopen_with_failure(repo, &entry, &entry_rel, "FAIL", &health.output)?;
        assign::remove_ticket_checkout(repo, &entry.branch, &entry.worktree, true);
        return Ok(true);
    }

    // Success: done-move, pending delete, and marker clear in one commit.
    store.with_worktree(|plan| {
        if let Some(name) =
            tickets::find_ticket_in_state(plan, TICKETS_IN_PROGRESS, entry.ticket_id)?
        {
            fs::rename(
                plan.join(TICKETS_IN_PROGRESS).join(&name),
                plan.join(TICKETS_DONE).join(&name),
            )?;
        }
        let pending = plan.join(&entry_rel);
        if pending.is_file() {
            fs::remove_file(pending)?;
        }
        fs::write(plan.join(QUEUE_ACTIVE), "")?;
        store.commit_if_changed(
            plan,
            &format!("scriptorium: complete ticket {:04}", entry.ticket_id),
        )?;
        Ok(())
    })?;
    assign::remove_ticket_checkout(repo, &entry.branch, &entry.worktree, false);
    info!(ticket = entry.ticket_id, branch = %entry.branch, "ticket merged to master");
    Ok(true)
}

/// Steps 1–2: honor a live `active.md` marker, otherwise pick the smallest
/// pending entry and mark it active. Stale markers are cleared.
fn select_entry(store: &PlanStore, plan: &Path) -> anyhow::Result<Selection> {
    let active_path = plan.join(QUEUE_ACTIVE);
    let active = fs::read_to_string(&active_path)
        .unwrap_or_default()
        .trim()
        .to_string();

    let chosen = if !active.is_empty() && plan.join(&active).is_file() {
        Some(active.clone())
    } else {
        list_pending(plan)?
            .first()
            .map(|name| format!("{QUEUE_PENDING}/{name}"))
    };

    let Some(rel) = chosen else {
        if !active.is_empty() {
            fs::write(&active_path, "")?;
            store.commit_if_changed(plan, "scriptorium: clear stale merge marker")?;
        }
        return Ok(Selection::Idle);
    };

    fs::write(&active_path, format!("{rel}\n"))?;
    let entry_name = Path::new(&rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&rel)
        .to_string();
    store.commit_if_changed(plan, &format!("scriptorium: start merge {entry_name}"))?;

    let body = fs::read_to_string(plan.join(&rel))
        .with_context(|| format!("reading queue entry {rel}"))?;
    let entry = PendingEntry::parse(&body)?;

    // A crash between the done-move and the queue cleanup leaves the ticket
    // in done with the entry still pending; finish the cleanup here.
    if tickets::find_ticket_in_state(plan, TICKETS_DONE, entry.ticket_id)?.is_some() {
        fs::remove_file(plan.join(&rel))?;
        fs::write(&active_path, "")?;
        store.commit_if_changed(
            plan,
            &format!("scriptorium: complete ticket {:04}", entry.ticket_id),
        )?;
        return Ok(Selection::Converged(entry.ticket_id));
    }

    Ok(Selection::Entry(entry, rel))
}

/// Sorted pending entry filenames.
fn list_pending(plan: &Path) -> anyhow::Result<Vec<String>> {
    let dir = plan.join(QUEUE_PENDING);
    let mut names = Vec::new();
    if dir.is_dir() {
        for dirent in fs::read_dir(&dir)? {
            let name = dirent?.file_name().to_string_lossy().into_owned();
            if tickets::is_queue_entry_name(&name) {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Failure path: ticket back to `open` with the worktree line stripped and a
/// failure section appended; pending entry and active marker cleared. One
/// commit.
fn reopen_with_failure(
    repo: &Path,
    entry: &PendingEntry,
    entry_rel: &str,
    diagnostic: &str,
    detail: &str,
) -> anyhow::Result<()> {
    let store = PlanStore::new(repo);
    store.with_worktree(|plan| {
        if let Some(name) =
            tickets::find_ticket_in_state(plan, TICKETS_IN_PROGRESS, entry.ticket_id)?
        {
            let src = plan.join(TICKETS_IN_PROGRESS).join(&name);
            let body = fs::read_to_string(&src)?;
            let body = tickets::strip_worktree_line(&body);
            let body = tickets::append_failure_section(&body, &entry.summary, diagnostic, detail);
            fs::write(plan.join(TICKETS_OPEN).join(&name), body)?;
            fs::remove_file(src)?;
        }
        let pending = plan.join(entry_rel);
        if pending.is_file() {
            fs::remove_file(pending)?;
        }
        fs::write(plan.join(QUEUE_ACTIVE), "")?;
        store.commit_if_changed(
            plan,
            &format!("scriptorium: reopen ticket {:04}", entry.ticket_id),
        )?;
        Ok(())
    })
}
