//! Tick-loop behavior with injected generators and agent invokers.

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// The submit_pr summary slot is process global; tests that drive the
/// execute phase take this lock so they cannot race on it.
static MCP_SLOT_LOCK: Mutex<()> = Mutex::new(());

use common::*;
use scriptorium::config::Config;
use scriptorium::orchestrator::{self, AgentInvoker, Orchestrator};
use scriptorium::planner::{AreaDoc, AreaGenerator, TicketDoc, TicketGenerator};
use scriptorium::runner::{AgentOutcome, TimeoutKind};

fn empty_generators() -> (AreaGenerator, TicketGenerator) {
    (
        Box::new(|_, _| Ok(Vec::new())),
        Box::new(|_, _, _| Ok(Vec::new())),
    )
}

fn one_area_generators() -> (AreaGenerator, TicketGenerator) {
    (
        Box::new(|_, _| {
            Ok(vec![AreaDoc {
                id: "core".into(),
                content: "# Core\n\nEverything.\n".into(),
            }])
        }),
        Box::new(|_, _, _| {
            Ok(vec![TicketDoc {
                slug: "first-task".into(),
                content: "# First task\n\n**Area:** core\n".into(),
            }])
        }),
    )
}

fn unreachable_invoker() -> AgentInvoker {
    Box::new(|_| anyhow::bail!("agent must not run in this test"))
}

fn completed_outcome() -> AgentOutcome {
    AgentOutcome {
        exit_code: 0,
        stdout: String::new(),
        log_path: PathBuf::new(),
        last_message_path: PathBuf::new(),
        last_message: String::new(),
        timeout_kind: TimeoutKind::None,
        attempts: 1,
    }
}

#[test]
fn red_master_halts_assignment() {
    let repo = init_repo();
    write_makefile(repo.path(), false);
    commit_all(repo.path(), "red master");

    let store = bootstrap_plan(repo.path());
    add_open_ticket(&store, 1, "first", "core");

    orchestrator::reset_shutdown_flag();
    let (areas, tickets) = empty_generators();
    let orch = Orchestrator::with_parts(
        repo.path(),
        Config::default(),
        areas,
        tickets,
        unreachable_invoker(),
        None,
    )
    .unwrap();
    orch.run_for_ticks(1);

    assert!(plan_has(&store, "tickets/open/0001-first.md"));
    assert!(!plan_has(&store, "tickets/in-progress/0001-first.md"));
}

#[test]
fn plan_sync_is_idempotent() {
    let repo = init_repo();
    // Red master keeps assignment out of the picture; only sync commits.
    write_makefile(repo.path(), false);
    commit_all(repo.path(), "red master");
    let store = bootstrap_plan(repo.path());

    orchestrator::reset_shutdown_flag();
    let (areas, tickets) = one_area_generators();
    let orch = Orchestrator::with_parts(
        repo.path(),
        Config::default(),
        areas,
        tickets,
        unreachable_invoker(),
        None,
    )
    .unwrap();

    orch.tick();
    assert!(plan_has(&store, "areas/core.md"));
    assert!(plan_has(&store, "tickets/open/0001-first-task.md"));
    let after_first = plan_commit_count(repo.path());

    // Same inputs, zero new commits.
    orch.tick();
    assert_eq!(plan_commit_count(repo.path()), after_first);
}

#[test]
fn ticket_ids_stay_monotonic_across_areas() {
    let repo = init_repo();
    write_makefile(repo.path(), false);
    commit_all(repo.path(), "red master");
    let store = bootstrap_plan(repo.path());

    let areas: AreaGenerator = Box::new(|_, _| {
        Ok(vec![
            AreaDoc {
                id: "alpha".into(),
                content: "# Alpha\n".into(),
            },
            AreaDoc {
                id: "beta".into(),
                content: "# Beta\n".into(),
            },
        ])
    });
    // One ticket per area; the body omits the area line to exercise the
    // orchestrator's backfill.
    let tickets: TicketGenerator = Box::new(|_, _, _| {
        Ok(vec![TicketDoc {
            slug: "task".into(),
            content: "# Task\n".into(),
        }])
    });

    orchestrator::reset_shutdown_flag();
    let orch = Orchestrator::with_parts(
        repo.path(),
        Config::default(),
        areas,
        tickets,
        unreachable_invoker(),
        None,
    )
    .unwrap();
    orch.tick();

    let alpha = plan_file(&store, "tickets/open/0001-task.md").unwrap();
    let beta = plan_file(&store, "tickets/open/0002-task.md").unwrap();
    assert!(alpha.contains("**Area:** alpha"));
    assert!(beta.contains("**Area:** beta"));
}

#[test]
fn assignment_is_single_flight_and_tickets_resume() {
    let _guard = MCP_SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let repo = init_repo();
    let store = bootstrap_plan(repo.path());
    add_open_ticket(&store, 1, "first", "core");
    add_open_ticket(&store, 2, "second", "ui");

    let runs = Arc::new(AtomicU32::new(0));
    let runs_in_invoker = Arc::clone(&runs);
    // The fake agent finishes cleanly but never calls submit_pr.
    let invoker: AgentInvoker = Box::new(move |_| {
        runs_in_invoker.fetch_add(1, Ordering::SeqCst);
        Ok(completed_outcome())
    });

    orchestrator::reset_shutdown_flag();
    let (areas, tickets) = empty_generators();
    let orch =
        Orchestrator::with_parts(repo.path(), Config::default(), areas, tickets, invoker, None)
            .unwrap();

    orch.tick();
    // 0001 assigned and executed once; no second assignment while it is in
    // progress.
    assert!(plan_has(&store, "tickets/in-progress/0001-first.md"));
    assert!(plan_has(&store, "tickets/open/0002-second.md"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    orch.tick();
    // Still single-flight: the same ticket resumed, 0002 untouched.
    assert!(plan_has(&store, "tickets/in-progress/0001-first.md"));
    assert!(!plan_has(&store, "tickets/in-progress/0002-second.md"));
    assert!(plan_has(&store, "tickets/open/0002-second.md"));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // The no-submit note trail is on the ticket.
    let body = plan_file(&store, "tickets/in-progress/0001-first.md").unwrap();
    assert!(body.contains("ended without submit_pr"));
}

#[test]
fn submit_pr_over_mcp_enqueues_and_drains() {
    let _guard = MCP_SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let repo = init_repo();
    let store = bootstrap_plan(repo.path());
    add_open_ticket(&store, 1, "first", "core");

    let server = scriptorium::mcp::McpServer::start("127.0.0.1", 0).unwrap();
    let endpoint = server.base_url();

    // The fake agent calls submit_pr over HTTP exactly like the child CLI
    // would, using the endpoint handed to it in the request.
    let invoker: AgentInvoker = Box::new(|request| {
        let endpoint = request
            .mcp_endpoint
            .as_ref()
            .expect("execute phase passes the MCP endpoint");
        let response: serde_json::Value = ureq::post(&format!("{endpoint}/mcp"))
            .send_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "submit_pr", "arguments": {"summary": "agent finished"}}
            }))
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(response["result"]["isError"], serde_json::json!(false));
        Ok(completed_outcome())
    });

    orchestrator::reset_shutdown_flag();
    let (areas, tickets) = empty_generators();
    let orch = Orchestrator::with_parts(
        repo.path(),
        Config::default(),
        areas,
        tickets,
        invoker,
        Some(endpoint),
    )
    .unwrap();

    // One tick: assign -> execute (submit_pr) -> enqueue -> drain.
    orch.tick();

    assert!(plan_has(&store, "tickets/done/0001-first.md"));
    assert!(!plan_has(&store, "tickets/in-progress/0001-first.md"));
    assert!(!plan_has(&store, "queue/merge/pending/0001-0001.md"));

    server.shutdown();
}
