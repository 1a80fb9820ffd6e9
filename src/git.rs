use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;

use crate::error::Error;

/// Captured result of a subprocess run.
#[derive(Debug)]
pub struct CmdOutput {
    /// Combined stdout + stderr.
    pub output: String,
    pub exit_code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command, capturing combined stdout+stderr. Non-zero exit is not an
/// error here; callers inspect `exit_code`.
pub fn run_command(program: &str, args: &[&str], cwd: &Path) -> anyhow::Result<CmdOutput> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("running {program} in {}", cwd.display()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CmdOutput {
        output: combined,
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Git invocations rooted at one repository.
pub struct Git {
    repo: PathBuf,
}

impl Git {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }

    /// Run git in the repository root; raise `GitCommandFailed` on non-zero
    /// exit. Returns the combined output.
    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let repo = self.repo.clone();
        self.run_in(&repo, args)
    }

    /// Run git in an arbitrary directory (a worktree); raise
    /// `GitCommandFailed` on non-zero exit.
    pub fn run_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        let result = run_command("git", args, dir)?;
        if result.success() {
            Ok(result.output)
        } else {
            Err(Error::GitCommandFailed {
                args: args.iter().map(|s| s.to_string()).collect(),
                output: result.output,
            }
            .into())
        }
    }

    /// Run git in the repository root, tolerating non-zero exit.
    pub fn try_run(&self, args: &[&str]) -> anyhow::Result<CmdOutput> {
        run_command("git", args, &self.repo)
    }

    /// Run git in an arbitrary directory, tolerating non-zero exit.
    pub fn try_run_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<CmdOutput> {
        run_command("git", args, dir)
    }

    /// Check whether a ref resolves.
    pub fn ref_exists(&self, reference: &str) -> anyhow::Result<bool> {
        Ok(self
            .try_run(&["rev-parse", "--verify", "--quiet", reference])?
            .success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_combined_output() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_command("sh", &["-c", "echo out; echo err >&2"], tmp.path()).unwrap();
        assert!(out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[test]
    fn run_command_reports_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_command("sh", &["-c", "exit 3"], tmp.path()).unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn git_run_raises_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let git = Git::new(tmp.path());
        let err = git.run(&["rev-parse", "--verify", "no-such-ref"]).unwrap_err();
        let git_err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(git_err, Error::GitCommandFailed { .. }));
    }

    #[test]
    fn ref_exists_false_outside_history() {
        let tmp = tempfile::tempdir().unwrap();
        run_command("git", &["init"], tmp.path()).unwrap();
        let git = Git::new(tmp.path());
        assert!(!git.ref_exists("refs/heads/nope").unwrap());
    }
}
