//! Agent process supervisor: runs the coding-agent CLI with streaming
//! capture, dual watchdogs, and bounded retries.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, warn};

use crate::error::Error;

/// Agent CLI binary name. Requests may point elsewhere (tests use scripts).
pub const DEFAULT_AGENT_BINARY: &str = "codex";

/// How long the supervising thread waits for the next output chunk.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;
const EXCERPT_CHARS: usize = 1200;
const DEFAULT_CONTINUATION: &str = "Continue from the previous attempt and complete the ticket.";

/// Which watchdog fired, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    None,
    NoOutput,
    Hard,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeoutKind::None => "none",
            TimeoutKind::NoOutput => "no-output",
            TimeoutKind::Hard => "hard",
        };
        f.write_str(s)
    }
}

/// Agent CLI family, selected from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Harness {
    Codex,
    Claude,
    Typoi,
}

pub fn harness_for_model(model: &str) -> Harness {
    if model.starts_with("claude-") {
        Harness::Claude
    } else if model.starts_with("codex-") || model.starts_with("gpt-") {
        Harness::Codex
    } else {
        Harness::Typoi
    }
}

/// One agent run request. `max_attempts` bounds retries; timeouts of zero
/// disable the corresponding watchdog.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub workdir: PathBuf,
    pub model: String,
    pub ticket_id: String,
    /// Agent CLI binary. Usually just "codex"; tests point this at a script.
    pub binary: String,
    pub skip_git_repo_check: bool,
    pub log_root: PathBuf,
    pub no_output_timeout: Duration,
    pub hard_timeout: Duration,
    pub mcp_endpoint: Option<String>,
    pub max_attempts: u32,
    pub continuation: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Outcome of the final attempt.
#[derive(Debug)]
pub struct AgentOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub log_path: PathBuf,
    pub last_message_path: PathBuf,
    pub last_message: String,
    pub timeout_kind: TimeoutKind,
    pub attempts: u32,
}

impl AgentOutcome {
    pub fn completed(&self) -> bool {
        self.exit_code == 0 && self.timeout_kind == TimeoutKind::None
    }
}

/// Run the agent, retrying with a continuation prompt until it completes or
/// attempts run out. Returns the final attempt's outcome.
pub fn run_agent(request: &AgentRequest) -> anyhow::Result<AgentOutcome> {
    if request.model.is_empty() {
        return Err(Error::InvalidInput("agent model is empty".into()).into());
    }
    match harness_for_model(&request.model) {
        Harness::Codex => {}
        Harness::Claude => return Err(Error::BackendUnimplemented("claude-code".into()).into()),
        Harness::Typoi => return Err(Error::BackendUnimplemented("typoi".into()).into()),
    }
    if !request.workdir.is_dir() {
        return Err(Error::InvalidInput(format!(
            "agent working directory {} does not exist",
            request.workdir.display()
        ))
        .into());
    }

    let max_attempts = request.max_attempts.max(1);
    let mut prompt = request.prompt.clone();
    let mut attempt = 1;
    loop {
        let outcome = run_attempt(request, &prompt, attempt)?;
        if outcome.completed() || attempt >= max_attempts {
            return Ok(AgentOutcome {
                attempts: attempt,
                ..outcome
            });
        }
        debug!(
            attempt,
            exit_code = outcome.exit_code,
            timeout = %outcome.timeout_kind,
            "agent attempt failed, retrying"
        );
        prompt = continuation_prompt(&request.prompt, &outcome, attempt, request.continuation.as_deref());
        attempt += 1;
    }
}

fn run_attempt(request: &AgentRequest, prompt: &str, attempt: u32) -> anyhow::Result<AgentOutcome> {
    let ticket_dir = request
        .log_root
        .join(sanitize_ticket_id(&request.ticket_id));
    fs::create_dir_all(&ticket_dir)
        .with_context(|| format!("creating {}", ticket_dir.display()))?;
    let log_path = ticket_dir.join(format!("attempt-{attempt:02}.jsonl"));
    let last_message_path = ticket_dir.join(format!("attempt-{attempt:02}.last_message.txt"));

    let args = codex_args(request, &last_message_path);
    let mut child = Command::new(&request.binary)
        .args(&args)
        .current_dir(&request.workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {}", request.binary))?;

    // Send the prompt, then close stdin. A separate thread so a child that
    // talks before it reads cannot deadlock against a large prompt.
    if let Some(mut stdin) = child.stdin.take() {
        let prompt = prompt.to_string();
        thread::spawn(move || {
            let _ = stdin.write_all(prompt.as_bytes());
        });
    }

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let stdout = child.stdout.take().context("capturing agent stdout")?;
    let stderr = child.stderr.take().context("capturing agent stderr")?;
    spawn_reader(stdout, tx.clone());
    spawn_reader(stderr, tx);

    let (buffer, timeout_kind) = supervise(&mut child, &rx, &log_path, request)?;

    let status = child.wait().context("reaping agent process")?;
    let exit_code = status.code().unwrap_or(-1);

    let last_message = fs::read_to_string(&last_message_path).unwrap_or_default();

    Ok(AgentOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&buffer).into_owned(),
        log_path,
        last_message_path,
        last_message,
        timeout_kind,
        attempts: attempt,
    })
}

/// Drain output chunks until the child is done or a watchdog fires.
fn supervise(
    child: &mut Child,
    rx: &Receiver<Vec<u8>>,
    log_path: &Path,
    request: &AgentRequest,
) -> anyhow::Result<(Vec<u8>, TimeoutKind)> {
    let mut log_file =
        fs::File::create(log_path).with_context(|| format!("creating {}", log_path.display()))?;
    let mut buffer = Vec::new();
    let start = Instant::now();
    let mut last_output = Instant::now();
    let mut timeout_kind = TimeoutKind::None;

    loop {
        if !request.hard_timeout.is_zero() && start.elapsed() >= request.hard_timeout {
            timeout_kind = TimeoutKind::Hard;
            kill(child);
            break;
        }
        if !request.no_output_timeout.is_zero()
            && last_output.elapsed() >= request.no_output_timeout
        {
            timeout_kind = TimeoutKind::NoOutput;
            kill(child);
            break;
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                log_file.write_all(&chunk)?;
                buffer.extend_from_slice(&chunk);
                last_output = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                // No pending data this interval; if the child is gone too
                // (a grandchild may still hold the pipe open), stop waiting.
                if child.try_wait().context("polling agent process")?.is_some() {
                    while let Ok(chunk) = rx.try_recv() {
                        log_file.write_all(&chunk)?;
                        buffer.extend_from_slice(&chunk);
                    }
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok((buffer, timeout_kind))
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to kill agent process: {e}");
    }
}

fn spawn_reader(mut source: impl Read + Send + 'static, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
}

/// Per-ticket agent logs live under `<repo>/.scriptorium/logs/`.
pub fn agent_log_root(repo: &Path) -> PathBuf {
    repo.join(".scriptorium").join("logs")
}

/// Ticket ids become directory names; anything outside `[A-Za-z0-9_-]` maps
/// to `-`, and an empty id becomes "adhoc".
pub fn sanitize_ticket_id(id: &str) -> String {
    if id.is_empty() {
        return "adhoc".to_string();
    }
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Codex CLI argv, in fixed order: the empty-instructions pair, the MCP
/// servers pair, the optional reasoning-effort pair, then the exec
/// subcommand and its flags, then `-` for the stdin prompt.
fn codex_args(request: &AgentRequest, last_message_path: &Path) -> Vec<String> {
    let mut args = vec!["-c".to_string(), "instructions=\"\"".to_string()];

    let mcp = match &request.mcp_endpoint {
        None => "mcp_servers={}".to_string(),
        Some(endpoint) => format!(
            "mcp_servers={{scriptorium={{type=\"http\",url=\"{endpoint}/mcp\",enabled=true,required=true}}}}"
        ),
    };
    args.push("-c".to_string());
    args.push(mcp);

    if let Some(effort) = &request.reasoning_effort {
        args.push("-c".to_string());
        args.push(format!("model_reasoning_effort=\"{effort}\""));
    }

    args.extend(
        [
            "exec",
            "--json",
            "--output-last-message",
        ]
        .map(String::from),
    );
    args.push(last_message_path.display().to_string());
    args.push("-C".to_string());
    args.push(request.workdir.display().to_string());
    args.push("-m".to_string());
    args.push(request.model.clone());
    args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
    if request.skip_git_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }
    args.push("-".to_string());
    args
}

fn continuation_prompt(
    original: &str,
    outcome: &AgentOutcome,
    attempt: u32,
    continuation: Option<&str>,
) -> String {
    let source = if outcome.last_message.is_empty() {
        &outcome.stdout
    } else {
        &outcome.last_message
    };
    let excerpt = crate::tickets::tail(source, EXCERPT_CHARS);
    let continuation = continuation.unwrap_or(DEFAULT_CONTINUATION);
    format!(
        "{original}\n\nAttempt {attempt} failed with exit code {code} (timeout: {kind}).\nLast output excerpt:\n{excerpt}\n\n{continuation}\n",
        code = outcome.exit_code,
        kind = outcome.timeout_kind,
    )
}
