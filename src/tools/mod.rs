pub mod catalog;
pub mod protocol;

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::config::TOOLS_PROTOCOL_VERSION;
use crate::state::SharedState;
use protocol::{
    tool_result, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};

/// Query/action front-end speaking line-delimited JSON-RPC over stdio.
pub struct ToolServer {
    state: SharedState,
}

impl ToolServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Handle one inbound line. Returns the serialized response, or `None`
    /// for notifications and blank lines.
    pub fn handle_frame(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => Some(RpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", e),
            )),
            Ok(raw) => match serde_json::from_value::<RpcRequest>(raw.clone()) {
                Ok(request) => self.handle_request(request),
                Err(e) => Some(RpcResponse::failure(
                    raw.get("id").cloned().unwrap_or(Value::Null),
                    INVALID_REQUEST,
                    format!("invalid request: {}", e),
                )),
            },
        };
        response.and_then(|r| match serde_json::to_string(&r) {
            Ok(s) => Some(s),
            Err(e) => {
                error!("Failed to serialize tool response: {}", e);
                None
            }
        })
    }

    pub fn handle_request(&self, request: RpcRequest) -> Option<RpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(RpcResponse::failure(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                format!("unsupported jsonrpc version {:?}", request.jsonrpc),
            ));
        }
        let Some(id) = request.id else {
            debug!(method = %request.method, "Tool notification");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::success(
                id,
                json!({
                    "protocolVersion": TOOLS_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "qontinui-feedback",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(id, json!({ "tools": catalog::tool_definitions() })),
            "tools/call" => self.call(id, request.params),
            other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("unknown method {}", other)),
        };
        Some(response)
    }

    fn call(&self, id: Value, params: Value) -> RpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return RpcResponse::failure(id, INVALID_PARAMS, "tools/call requires a tool name");
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        match catalog::call_tool(&self.state, name, args) {
            Ok(Some(value)) => RpcResponse::success(id, tool_result(&value, false)),
            Ok(None) => RpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool {}", name)),
            Err(e) if e.is_client_error() => {
                debug!(tool = name, "Tool call rejected: {}", e);
                RpcResponse::success(id, tool_result(&e.to_json(), true))
            }
            Err(e) => {
                error!(tool = name, "Tool call failed: {}", e);
                RpcResponse::failure(id, INTERNAL_ERROR, e.to_string())
            }
        }
    }

    /// Serve until stdin closes.
    pub async fn serve_stdio(self: Arc<Self>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        info!("Tool interface attached to stdio");

        while let Some(line) = lines.next_line().await? {
            let server = self.clone();
            let response =
                match tokio::task::spawn_blocking(move || server.handle_frame(&line)).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Tool handler panicked: {}", e);
                        Some(
                            serde_json::to_string(&RpcResponse::failure(
                                Value::Null,
                                INTERNAL_ERROR,
                                "handler panicked",
                            ))?,
                        )
                    }
                };
            if let Some(response) = response {
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        info!("Stdin closed, tool interface stopping");
        Ok(())
    }
}
