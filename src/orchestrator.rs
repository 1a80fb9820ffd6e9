//! The tick loop: health, plan sync, assignment, execution, queue drain, in
//! that order, one pass per tick.
//!
//! All orchestration state lives on the plan branch; the loop re-reads what
//! it needs every tick and caches nothing in memory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info};

use crate::assign::{self, Assignment};
use crate::config::Config;
use crate::error::Error;
use crate::mcp;
use crate::plan::PlanStore;
use crate::planner::{self, AreaGenerator, TicketGenerator};
use crate::queue;
use crate::runner::{self, AgentOutcome, AgentRequest};
use crate::tickets::{self, AREAS_DIR, TICKETS_IN_PROGRESS, TICKETS_OPEN};

/// Shutdown flag. Process global: signal handlers cannot take parameters.
/// Written by the `ctrlc` handler, read by the loop between sleeps.
static SHOULD_RUN: AtomicBool = AtomicBool::new(true);

/// Sleep between ticks.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(200);

const AGENT_NO_OUTPUT_TIMEOUT: Duration = Duration::from_secs(600);
const AGENT_HARD_TIMEOUT: Duration = Duration::from_secs(3600);
const AGENT_MAX_ATTEMPTS: u32 = 3;

/// Runs one agent request; injected so tests can fake agent behavior.
pub type AgentInvoker = Box<dyn Fn(&AgentRequest) -> anyhow::Result<AgentOutcome>>;

pub fn install_signal_handlers() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        SHOULD_RUN.store(false, Ordering::SeqCst);
    })
    .context("installing signal handlers")
}

pub fn request_shutdown() {
    SHOULD_RUN.store(false, Ordering::SeqCst);
}

/// Re-arm the loop; test bootstrap only.
pub fn reset_shutdown_flag() {
    SHOULD_RUN.store(true, Ordering::SeqCst);
}

/// A ticket currently in progress, as read from the plan branch.
#[derive(Debug, Clone)]
pub struct InProgressTicket {
    pub ticket_id: u32,
    pub slug: String,
    pub file_name: String,
    pub body: String,
    pub worktree: Option<PathBuf>,
}

pub struct Orchestrator {
    repo: PathBuf,
    config: Config,
    area_generator: AreaGenerator,
    ticket_generator: TicketGenerator,
    invoker: AgentInvoker,
    mcp_endpoint: Option<String>,
}

impl Orchestrator {
    /// Production wiring: codex-backed generators and the real supervisor.
    pub fn new(repo: &Path, config: Config, mcp_endpoint: Option<String>) -> anyhow::Result<Self> {
        let log_root = runner::agent_log_root(repo);
        let area_generator = planner::codex_area_generator(&config, repo, &log_root);
        let ticket_generator = planner::codex_ticket_generator(&config, repo, &log_root);
        Self::with_parts(
            repo,
            config,
            area_generator,
            ticket_generator,
            Box::new(|request| runner::run_agent(request)),
            mcp_endpoint,
        )
    }

    /// Fully injected wiring; tests substitute fakes here.
    pub fn with_parts(
        repo: &Path,
        config: Config,
        area_generator: AreaGenerator,
        ticket_generator: TicketGenerator,
        invoker: AgentInvoker,
        mcp_endpoint: Option<String>,
    ) -> anyhow::Result<Self> {
        let repo = repo
            .canonicalize()
            .map_err(|_| Error::InvalidInput(format!("working directory {} not found", repo.display())))?;
        Ok(Self {
            repo,
            config,
            area_generator,
            ticket_generator,
            invoker,
            mcp_endpoint,
        })
    }

    /// Run until shutdown is requested.
    pub fn run(&self) {
        self.run_loop(None);
    }

    /// Run at most `ticks` passes; used to bound tests and scripted runs.
    pub fn run_for_ticks(&self, ticks: u64) {
        self.run_loop(Some(ticks));
    }

    fn run_loop(&self, limit: Option<u64>) {
        let mut completed = 0u64;
        while SHOULD_RUN.load(Ordering::SeqCst) {
            self.tick();
            completed += 1;
            if let Some(limit) = limit
                && completed >= limit
            {
                break;
            }
            thread::sleep(IDLE_INTERVAL);
        }
        info!(ticks = completed, "orchestrator loop finished");
    }

    /// One pass. Phase failures are logged and never skip later phases.
    pub fn tick(&self) {
        let master_green = match queue::run_health_check(&self.repo, &self.config.health) {
            Ok(health) => health.green,
            Err(err) => {
                error!("health check failed: {err:#}");
                false
            }
        };

        self.phase("sync areas", || self.sync_areas());
        self.phase("sync tickets", || self.sync_tickets());
        if master_green {
            self.phase("assign", || self.assign_phase());
        } else {
            debug!("red master, skipping assignment");
        }
        self.phase("execute", || self.execute_phase());
        self.phase("drain", || {
            queue::process_merge_queue(&self.repo, &self.config.health).map(|_| ())
        });
    }

    fn phase(&self, name: &str, op: impl FnOnce() -> anyhow::Result<()>) {
        if let Err(err) = op() {
            match err.downcast_ref::<Error>() {
                Some(e) if e.is_idle_condition() => debug!("{name}: {e}"),
                _ => error!("{name} failed: {err:#}"),
            }
        }
    }

    /// Generate areas from the spec when `areas/` holds no markdown yet.
    fn sync_areas(&self) -> anyhow::Result<()> {
        let store = PlanStore::new(&self.repo);
        store.with_worktree(|plan| {
            if !tickets::walk_markdown(plan, Path::new(AREAS_DIR))?.is_empty() {
                return Ok(());
            }
            let spec = fs::read_to_string(plan.join("spec.md")).map_err(|_| Error::SpecMissing)?;
            let docs = (self.area_generator)(&self.config.models.architect, &spec)?;
            if docs.is_empty() {
                return Ok(());
            }
            let areas_dir = plan.join(AREAS_DIR);
            fs::create_dir_all(&areas_dir)?;
            for doc in &docs {
                let id = tickets::normalize_slug(&doc.id)?;
                fs::write(areas_dir.join(format!("{id}.md")), with_newline(&doc.content))?;
            }
            if store.commit_if_changed(plan, "scriptorium: update areas from spec")? {
                info!(count = docs.len(), "generated areas from spec");
            }
            Ok(())
        })
    }

    /// Generate tickets for every area with no open or in-progress ticket.
    fn sync_tickets(&self) -> anyhow::Result<()> {
        let store = PlanStore::new(&self.repo);
        store.with_worktree(|plan| {
            let needing = tickets::areas_needing_tickets(plan)?;
            if needing.is_empty() {
                return Ok(());
            }
            let mut next_id = tickets::next_ticket_id(plan)?;
            let mut written = 0usize;
            for area_rel in &needing {
                let rel_str = area_rel.to_string_lossy();
                let checked = tickets::normalize_area_path(&rel_str)?;
                let area_id = checked
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let content = fs::read_to_string(plan.join(&checked))?;
                let docs =
                    (self.ticket_generator)(&self.config.models.manager, &rel_str, &content)?;
                for doc in docs {
                    let slug = tickets::normalize_slug(&doc.slug)?;
                    let body = ensure_area_line(&doc.content, &area_id);
                    fs::write(
                        plan.join(TICKETS_OPEN)
                            .join(format!("{next_id:04}-{slug}.md")),
                        body,
                    )?;
                    next_id += 1;
                    written += 1;
                }
            }
            if written > 0
                && store.commit_if_changed(plan, "scriptorium: create tickets from areas")?
            {
                info!(count = written, "created tickets from areas");
            }
            Ok(())
        })
    }

    /// Assign the oldest open ticket, but only while nothing is in progress.
    fn assign_phase(&self) -> anyhow::Result<()> {
        if self.current_in_progress()?.is_some() {
            return Ok(());
        }
        assign::assign_oldest_open_ticket(&self.repo)?;
        Ok(())
    }

    /// Run the coding agent on the in-progress ticket, then route its
    /// completion signal.
    fn execute_phase(&self) -> anyhow::Result<()> {
        let Some(ticket) = self.current_in_progress()? else {
            return Ok(());
        };
        let worktree = ticket.worktree.clone().ok_or_else(|| {
            Error::InvalidInput(format!(
                "ticket {:04} is in progress but records no worktree",
                ticket.ticket_id
            ))
        })?;

        mcp::clear_submit_pr_summary();
        let request = AgentRequest {
            prompt: build_ticket_prompt(&ticket),
            workdir: worktree.clone(),
            model: self.config.models.coding.clone(),
            ticket_id: format!("{:04}", ticket.ticket_id),
            binary: runner::DEFAULT_AGENT_BINARY.to_string(),
            skip_git_repo_check: false,
            log_root: runner::agent_log_root(&self.repo),
            no_output_timeout: AGENT_NO_OUTPUT_TIMEOUT,
            hard_timeout: AGENT_HARD_TIMEOUT,
            mcp_endpoint: self.mcp_endpoint.clone(),
            max_attempts: AGENT_MAX_ATTEMPTS,
            continuation: None,
            reasoning_effort: self.config.reasoning_effort.coding.clone(),
        };
        let outcome = (self.invoker)(&request)?;

        match mcp::consume_submit_pr_summary() {
            Some(summary) if !summary.trim().is_empty() => {
                info!(ticket = ticket.ticket_id, "agent submitted, enqueueing merge");
                let assignment = Assignment {
                    ticket_id: ticket.ticket_id,
                    slug: ticket.slug.clone(),
                    branch: tickets::ticket_branch(ticket.ticket_id),
                    worktree,
                    in_progress_ticket: format!("{TICKETS_IN_PROGRESS}/{}", ticket.file_name),
                };
                assign::enqueue_merge_request(&self.repo, &assignment, summary.trim())?;
            }
            _ => {
                // The ticket stays in progress; the next tick resumes it.
                info!(ticket = ticket.ticket_id, "agent ended without submit_pr");
                self.note_ticket(&ticket, &outcome)?;
            }
        }
        Ok(())
    }

    fn current_in_progress(&self) -> anyhow::Result<Option<InProgressTicket>> {
        let store = PlanStore::new(&self.repo);
        store.with_worktree(|plan| {
            let names = tickets::list_state(plan, TICKETS_IN_PROGRESS)?;
            for name in names {
                let Some((ticket_id, slug)) = tickets::parse_ticket_filename(&name) else {
                    continue;
                };
                let body = fs::read_to_string(plan.join(TICKETS_IN_PROGRESS).join(&name))?;
                let worktree = tickets::parse_worktree_path(&body);
                return Ok(Some(InProgressTicket {
                    ticket_id,
                    slug,
                    file_name: name,
                    body,
                    worktree,
                }));
            }
            Ok(None)
        })
    }

    fn note_ticket(&self, ticket: &InProgressTicket, outcome: &AgentOutcome) -> anyhow::Result<()> {
        let store = PlanStore::new(&self.repo);
        store.with_worktree(|plan| {
            let path = plan.join(TICKETS_IN_PROGRESS).join(&ticket.file_name);
            if !path.is_file() {
                return Ok(());
            }
            let mut body = fs::read_to_string(&path)?;
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(&format!(
                "> note: agent attempt {} ended without submit_pr (exit {}, timeout {})\n",
                outcome.attempts, outcome.exit_code, outcome.timeout_kind
            ));
            fs::write(&path, body)?;
            store.commit_if_changed(
                plan,
                &format!("scriptorium: note ticket {:04}", ticket.ticket_id),
            )?;
            Ok(())
        })
    }
}

fn build_ticket_prompt(ticket: &InProgressTicket) -> String {
    format!(
        "You are a coding agent working in an isolated git worktree on branch \
         {branch}. Your assignment is ticket {id:04} ({slug}), reproduced below.\n\n\
         {body}\n\n\
         Commit your work on this branch as you go. When the ticket is complete, \
         call the `submit_pr` tool with a short summary of the change. Do not \
         merge to master yourself; the orchestrator owns the merge queue.\n",
        branch = tickets::ticket_branch(ticket.ticket_id),
        id = ticket.ticket_id,
        slug = ticket.slug,
        body = ticket.body.trim_end(),
    )
}

fn with_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

/// Tickets must reference their area; append the marker line when the
/// generator left it out.
fn ensure_area_line(content: &str, area_id: &str) -> String {
    let mut body = with_newline(content);
    if tickets::parse_area_id(&body).is_empty() {
        body.push_str(&format!("\n**Area:** {area_id}\n"));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_line_preserved_or_appended() {
        let with_line = ensure_area_line("# T\n\n**Area:** core\n", "other");
        assert_eq!(tickets::parse_area_id(&with_line), "core");

        let appended = ensure_area_line("# T\nbody only", "core");
        assert_eq!(tickets::parse_area_id(&appended), "core");
        assert!(appended.ends_with("**Area:** core\n"));
    }

    #[test]
    fn ticket_prompt_names_branch_and_tool() {
        let ticket = InProgressTicket {
            ticket_id: 12,
            slug: "fix-parser".into(),
            file_name: "0012-fix-parser.md".into(),
            body: "# Fix parser\n\n**Area:** core\n".into(),
            worktree: None,
        };
        let prompt = build_ticket_prompt(&ticket);
        assert!(prompt.contains("scriptorium/ticket-0012"));
        assert!(prompt.contains("submit_pr"));
        assert!(prompt.contains("# Fix parser"));
    }
}
