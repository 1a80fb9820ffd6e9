//! CLI surface tests.

mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;

fn scriptorium() -> Command {
    Command::cargo_bin("scriptorium").unwrap()
}

#[test]
fn status_requires_plan_branch() {
    let repo = init_repo();
    scriptorium()
        .arg("status")
        .arg("--repo")
        .arg(repo.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("plan branch"));
}

#[test]
fn status_reports_plan_counts() {
    let repo = init_repo();
    let store = bootstrap_plan(repo.path());
    add_open_ticket(&store, 1, "first", "core");

    scriptorium()
        .arg("status")
        .arg("--repo")
        .arg(repo.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("open 1 | in-progress 0 | done 0"))
        .stdout(predicate::str::contains("0001-first.md"));
}

#[test]
fn worktrees_lists_nothing_on_fresh_plan() {
    let repo = init_repo();
    bootstrap_plan(repo.path());

    scriptorium()
        .arg("worktrees")
        .arg("--repo")
        .arg(repo.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No ticket worktrees."));
}

#[test]
fn worktrees_shows_in_progress_paths() {
    let repo = init_repo();
    let store = bootstrap_plan(repo.path());
    add_open_ticket(&store, 1, "first", "core");
    let assignment = scriptorium::assign::assign_oldest_open_ticket(repo.path()).unwrap();

    scriptorium()
        .arg("worktrees")
        .arg("--repo")
        .arg(repo.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0001-first.md"))
        .stdout(predicate::str::contains(
            assignment.worktree.display().to_string(),
        ));
}

#[test]
fn run_prints_banner_and_honors_tick_bound() {
    let repo = init_repo();
    // No plan branch yet: the first run bootstraps it. The single tick then
    // idles through: the configured models select the unimplemented typoi
    // harness, so area generation fails fast and nothing gets assigned.
    std::fs::write(repo.path().join("spec.md"), "# Spec\n").unwrap();
    std::fs::write(
        repo.path().join("scriptorium.json"),
        r#"{"models": {"architect": "typoi-default", "coding": "typoi-default", "manager": "typoi-default"}}"#,
    )
    .unwrap();
    commit_all(repo.path(), "add spec");

    scriptorium()
        .arg("run")
        .arg("--repo")
        .arg(repo.path())
        .arg("--ticks")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("scriptorium: listening on"));

    // The bootstrap seeded the plan branch from the repo spec.
    let store = scriptorium::plan::PlanStore::new(repo.path());
    assert!(store.branch_exists().unwrap());
    assert_eq!(store.read_file("spec.md").unwrap(), "# Spec\n");
}

#[test]
fn run_rejects_bad_endpoint_config() {
    let repo = init_repo();
    std::fs::write(
        repo.path().join("scriptorium.json"),
        r#"{"endpoints": {"local": "not-a-url"}}"#,
    )
    .unwrap();

    scriptorium()
        .arg("run")
        .arg("--repo")
        .arg(repo.path())
        .arg("--ticks")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("scheme"));
}
