//! Git plan store: all orchestration state lives as committed files on the
//! plan branch. Mutations go through short-lived scoped worktrees; reads go
//! through `git show` / `git ls-tree` so the main checkout is never touched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::Error;
use crate::git::Git;
use crate::tickets;

pub const PLAN_BRANCH: &str = "scriptorium/plan";

pub struct PlanStore {
    repo: PathBuf,
}

impl PlanStore {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }

    fn git(&self) -> Git {
        Git::new(&self.repo)
    }

    pub fn branch_exists(&self) -> anyhow::Result<bool> {
        self.git()
            .ref_exists(&format!("refs/heads/{PLAN_BRANCH}"))
    }

    /// Run `op` against a scoped worktree of the plan branch. The worktree is
    /// registered in a fresh temporary directory and force-removed on every
    /// exit path.
    pub fn with_worktree<T>(
        &self,
        op: impl FnOnce(&Path) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        if !self.branch_exists()? {
            return Err(Error::PlanBranchMissing(PLAN_BRANCH.to_string()).into());
        }

        let tmp = tempfile::Builder::new()
            .prefix("scriptorium-plan-")
            .tempdir()
            .context("creating plan worktree directory")?;
        let worktree = tmp.path().join("plan");
        let git = self.git();
        git.run(&[
            "worktree",
            "add",
            &worktree.display().to_string(),
            PLAN_BRANCH,
        ])?;

        let result = op(&worktree);

        let _ = git.try_run(&["worktree", "remove", "--force", &worktree.display().to_string()]);
        result
    }

    /// Read one file from the plan branch tip. `GitCommandFailed` when the
    /// path does not exist.
    pub fn read_file(&self, rel: &str) -> anyhow::Result<String> {
        if !self.branch_exists()? {
            return Err(Error::PlanBranchMissing(PLAN_BRANCH.to_string()).into());
        }
        self.git().run(&["show", &format!("{PLAN_BRANCH}:{rel}")])
    }

    /// Read one file from the plan branch tip, `None` when absent.
    pub fn try_read_file(&self, rel: &str) -> anyhow::Result<Option<String>> {
        if !self.branch_exists()? {
            return Err(Error::PlanBranchMissing(PLAN_BRANCH.to_string()).into());
        }
        let out = self
            .git()
            .try_run(&["show", &format!("{PLAN_BRANCH}:{rel}")])?;
        if out.success() {
            Ok(Some(out.output))
        } else {
            Ok(None)
        }
    }

    /// All markdown files on the plan branch, sorted lexicographically by
    /// full relative path.
    pub fn list_markdown_files(&self) -> anyhow::Result<Vec<String>> {
        if !self.branch_exists()? {
            return Err(Error::PlanBranchMissing(PLAN_BRANCH.to_string()).into());
        }
        let out = self
            .git()
            .run(&["ls-tree", "-r", "--name-only", PLAN_BRANCH])?;
        let mut files: Vec<String> = out
            .lines()
            .filter(|l| l.to_ascii_lowercase().ends_with(".md"))
            .map(|l| l.to_string())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Stage everything in `worktree` and commit iff the index differs from
    /// HEAD. Returns whether a commit was made; empty commits are never
    /// produced.
    pub fn commit_if_changed(&self, worktree: &Path, message: &str) -> anyhow::Result<bool> {
        let git = self.git();
        git.run_in(worktree, &["add", "-A"])?;
        let diff = git.try_run_in(worktree, &["diff", "--cached", "--quiet"])?;
        if diff.success() {
            return Ok(false);
        }
        git.run_in(worktree, &["commit", "-m", message])?;
        Ok(true)
    }

    /// Create the plan branch from an empty tree and seed the standard
    /// layout, taking `spec` as the initial spec.md content.
    pub fn bootstrap(&self, spec: &str) -> anyhow::Result<()> {
        if self.branch_exists()? {
            return Ok(());
        }
        let git = self.git();
        let empty_tree = git.run(&["hash-object", "-t", "tree", "/dev/null"])?;
        let commit = git.run(&[
            "commit-tree",
            empty_tree.trim(),
            "-m",
            "scriptorium: initialize plan branch",
        ])?;
        git.run(&[
            "update-ref",
            &format!("refs/heads/{PLAN_BRANCH}"),
            commit.trim(),
        ])?;

        self.with_worktree(|plan| {
            fs::write(plan.join("spec.md"), spec)?;
            for dir in [
                tickets::AREAS_DIR,
                tickets::TICKETS_OPEN,
                tickets::TICKETS_IN_PROGRESS,
                tickets::TICKETS_DONE,
                tickets::QUEUE_PENDING,
                "decisions",
            ] {
                let full = plan.join(dir);
                fs::create_dir_all(&full)?;
                fs::write(full.join(".gitkeep"), "")?;
            }
            fs::write(plan.join(tickets::QUEUE_ACTIVE), "")?;
            self.commit_if_changed(plan, "scriptorium: seed plan layout")?;
            Ok(())
        })
    }
}
