#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use scriptorium::git::run_command;
use scriptorium::plan::PlanStore;
use scriptorium::tickets::TICKETS_OPEN;

/// Throwaway git repository with a passing Makefile committed on master.
pub fn init_repo() -> TempDir {
    let temp = TempDir::new().unwrap();
    git(temp.path(), &["init", "-b", "master"]);
    git(temp.path(), &["config", "user.email", "test@test.com"]);
    git(temp.path(), &["config", "user.name", "Test"]);
    write_makefile(temp.path(), true);
    commit_all(temp.path(), "init");
    temp
}

/// Run git, panicking on failure; returns combined output.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let out = run_command("git", args, repo).unwrap();
    assert!(
        out.success(),
        "git {args:?} failed (exit {}):\n{}",
        out.exit_code,
        out.output
    );
    out.output
}

/// Write a Makefile whose `test` target passes or fails.
pub fn write_makefile(repo: &Path, passing: bool) {
    let content = if passing {
        "test:\n\t@echo PASS\n"
    } else {
        "test:\n\t@echo FAIL\n\t@exit 1\n"
    };
    fs::write(repo.join("Makefile"), content).unwrap();
}

pub fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-m", message]);
}

/// Bootstrap the plan branch with a stub spec.
pub fn bootstrap_plan(repo: &Path) -> PlanStore {
    let store = PlanStore::new(repo);
    store.bootstrap("# Spec\n\nBuild the thing.\n").unwrap();
    store
}

/// Drop a ticket into `tickets/open/` on the plan branch.
pub fn add_open_ticket(store: &PlanStore, id: u32, slug: &str, area: &str) {
    store
        .with_worktree(|plan| {
            let name = format!("{id:04}-{slug}.md");
            let body = format!("# Ticket {id:04}\n\n**Area:** {area}\n\nDo the work.\n");
            fs::write(plan.join(TICKETS_OPEN).join(name), body)?;
            store.commit_if_changed(plan, &format!("test: add ticket {id:04}"))?;
            Ok(())
        })
        .unwrap();
}

/// Read one file from the plan branch tip, `None` when absent.
pub fn plan_file(store: &PlanStore, rel: &str) -> Option<String> {
    store.try_read_file(rel).unwrap()
}

pub fn plan_has(store: &PlanStore, rel: &str) -> bool {
    plan_file(store, rel).is_some()
}

/// Commit count on the plan branch.
pub fn plan_commit_count(repo: &Path) -> u64 {
    git(repo, &["rev-list", "--count", "scriptorium/plan"])
        .trim()
        .parse()
        .unwrap()
}
