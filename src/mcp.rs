//! HTTP MCP endpoint exposing the single `submit_pr` tool.
//!
//! The server runs on one dedicated background thread that owns a
//! current-thread tokio runtime; the tick loop talks to it only through the
//! process-wide summary slot and the shutdown channel.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::thread::JoinHandle;

use anyhow::Context;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::info;

/// MCP protocol version.
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "scriptorium";

/// Completion summary handed from the child agent's `submit_pr` call to the
/// tick loop. Process global: the HTTP handler cannot take parameters from
/// the orchestrator. One writer (handler), one reader-clearer (tick loop).
static SUBMIT_PR_SUMMARY: Mutex<Option<String>> = Mutex::new(None);

fn summary_slot() -> std::sync::MutexGuard<'static, Option<String>> {
    SUBMIT_PR_SUMMARY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Atomically read and clear the summary slot.
pub fn consume_submit_pr_summary() -> Option<String> {
    summary_slot().take()
}

/// Drop any stale summary before an agent run starts.
pub fn clear_submit_pr_summary() {
    *summary_slot() = None;
}

fn store_submit_pr_summary(summary: String) {
    *summary_slot() = Some(summary);
}

// === JSON-RPC types ===

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

fn submit_pr_tool() -> Value {
    json!({
        "name": "submit_pr",
        "description": "Signal ticket completion with a one-paragraph summary of the work.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "summary": { "type": "string" }
            },
            "required": ["summary"]
        }
    })
}

async fn handle_mcp(Json(payload): Json<Value>) -> Json<Value> {
    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => {
            let resp = JsonRpcResponse::error(None, -32700, format!("parse error: {e}"));
            return Json(serde_json::to_value(resp).unwrap_or_default());
        }
    };

    // Notifications get no response body.
    if request.id.is_none() {
        return Json(Value::Null);
    }

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        ),
        "ping" => JsonRpcResponse::success(request.id, json!({})),
        "tools/list" => {
            JsonRpcResponse::success(request.id, json!({ "tools": [submit_pr_tool()] }))
        }
        "tools/call" => handle_tool_call(request.id, request.params.unwrap_or(Value::Null)),
        other => JsonRpcResponse::error(
            request.id,
            -32601,
            format!("method not found: {other}"),
        ),
    };

    Json(serde_json::to_value(response).unwrap_or_default())
}

fn handle_tool_call(id: Option<Value>, params: Value) -> JsonRpcResponse {
    let name = params["name"].as_str().unwrap_or("");
    if name != "submit_pr" {
        return JsonRpcResponse::error(id, -32602, format!("unknown tool: {name}"));
    }
    let Some(summary) = params["arguments"]["summary"].as_str() else {
        return JsonRpcResponse::error(
            id,
            -32602,
            "submit_pr requires a string 'summary' argument".to_string(),
        );
    };
    info!("submit_pr received ({} chars)", summary.len());
    store_submit_pr_summary(summary.to_string());
    JsonRpcResponse::success(
        id,
        json!({
            "content": [{ "type": "text", "text": "summary recorded" }],
            "isError": false
        }),
    )
}

// === Server lifecycle ===

/// Handle to the background MCP server thread.
pub struct McpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl McpServer {
    /// Bind and start serving on a background thread. Returns after the bind
    /// has succeeded (or failed), so startup errors surface here.
    pub fn start(host: &str, port: u16) -> anyhow::Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let host = host.to_string();

        let thread = std::thread::Builder::new()
            .name("scriptorium-mcp".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(e).context("building MCP server runtime")
                        ));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let app = Router::new().route("/mcp", post(handle_mcp));
                    let listener =
                        match tokio::net::TcpListener::bind((host.as_str(), port)).await {
                            Ok(l) => l,
                            Err(e) => {
                                let _ = ready_tx.send(Err(anyhow::Error::new(e)
                                    .context(format!("binding MCP server to {host}:{port}"))));
                                return;
                            }
                        };
                    let addr = match listener.local_addr() {
                        Ok(a) => a,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.into()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(addr));

                    let _ = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                });
            })
            .context("spawning MCP server thread")?;

        let addr = ready_rx
            .recv()
            .context("MCP server thread exited before reporting bind status")??;

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the endpoint (the MCP route lives at `<base>/mcp`).
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signal the server to stop and join its thread.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
