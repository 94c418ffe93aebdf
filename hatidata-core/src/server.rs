//! Stdio JSON-RPC loop
//!
//! Line-delimited JSON-RPC 2.0, one frame per line in both directions.
//! stdout carries frames only; diagnostics go to stderr via `tracing`.
//! Protocol-level errors (unknown method) are the only structured
//! errors; tool failures travel inside tool-result envelopes.

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::io::{BufRead, Write};

/// MCP protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn result(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

/// Handle one request. Returns None for notifications, which get no
/// response frame.
pub fn handle_request(dispatcher: &Dispatcher, request: &JsonValue) -> Option<JsonValue> {
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = request.get("id").cloned().unwrap_or(JsonValue::Null);

    let response = match method {
        "initialize" => RpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "hatidata",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {"tools": {}},
            }),
        ),
        "tools/list" => RpcResponse::result(id, json!({"tools": dispatcher.tools()})),
        "tools/call" => {
            let params = request.get("params");
            let name = params
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("");
            let arguments = params
                .and_then(|p| p.get("arguments"))
                .cloned()
                .unwrap_or(json!({}));

            tracing::debug!(tool = name, "Dispatching tool call");
            let result = dispatcher.call(name, &arguments);
            let payload = serde_json::to_value(result)
                .unwrap_or_else(|_| json!({"content": [], "isError": true}));
            RpcResponse::result(id, payload)
        }
        "notifications/initialized" => return None,
        other => RpcResponse::error(id, -32601, format!("Method not found: {}", other)),
    };

    serde_json::to_value(response).ok()
}

/// Drive the loop over arbitrary streams (unit-testable).
pub fn run<R: BufRead, W: Write>(dispatcher: &Dispatcher, reader: R, writer: &mut W) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonValue = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed request line");
                continue;
            }
        };

        if let Some(response) = handle_request(dispatcher, &request) {
            writeln!(writer, "{}", response)?;
            writer.flush()?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Bind the loop to this process's stdio.
pub fn run_stdio(dispatcher: &Dispatcher) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(dispatcher, stdin.lock(), &mut out)
}
