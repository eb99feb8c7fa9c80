//! Collaboration server: MCP (JSON-RPC 2.0) over stdio.
//!
//! Agent runners that speak MCP can start `tandem mcp` as a tool server
//! and coordinate through two tools backed by the [`SharedChannel`]:
//!
//! - `send { message, agent_id? }` appends a status message.
//! - `get_messages { agent_id? }` returns unread messages from the other
//!   agents, one `[STATUS] <sender>: <message>` line each.
//!
//! Requests and responses are one JSON document per line. Requests without
//! an `id` are notifications and never get a response.

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, SharedChannel};

/// MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "tandem-collaboration";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Transport-level failures that end [`CollaborationServer::serve`].
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("stdio transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A JSON-RPC error produced while handling one request.
#[derive(Debug, Clone, PartialEq)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ChannelError> for RpcError {
    fn from(e: ChannelError) -> Self {
        let code = match e {
            ChannelError::EmptyMessage | ChannelError::InvalidId(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, e.to_string())
    }
}

/// Stdio MCP server bound to one shared channel.
#[derive(Debug, Clone)]
pub struct CollaborationServer {
    channel: SharedChannel,
    default_agent: Option<String>,
}

impl CollaborationServer {
    /// `default_agent` is used when a tool call omits `agent_id`; the
    /// harness injects it as `TANDEM_AGENT_ID`.
    pub fn new(channel: SharedChannel, default_agent: Option<String>) -> Self {
        Self {
            channel,
            default_agent,
        }
    }

    /// Serve requests from `reader` until EOF, writing responses to
    /// `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            shared_dir = %self.channel.root().display(),
            agent_id = self.default_agent.as_deref().unwrap_or("-"),
            "collaboration server started"
        );

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("end of input, collaboration server exiting");
        Ok(())
    }

    /// Handle one raw request line.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle_request(&request).await,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                Some(error_response(
                    Value::Null,
                    RpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                ))
            }
        }
    }

    /// Handle one decoded request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: &Value) -> Option<Value> {
        let Some(object) = request.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::new(INVALID_REQUEST, "Invalid request: expected an object"),
            ));
        };

        let id = object.get("id").cloned();
        let method = object.get("method").and_then(Value::as_str).unwrap_or("");
        let params = object.get("params").cloned().unwrap_or(Value::Null);
        debug!(method, "request received");

        let outcome = self.dispatch(method, &params).await;

        // Notifications never get a response, not even an error.
        let id = id?;
        Some(match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(e) => error_response(id, e),
        })
    }

    async fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => self.call_tool(params).await,
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
        let empty = json!({});
        let arguments = params.get("arguments").unwrap_or(&empty);

        let text = match name {
            "send" => {
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "send requires 'message'"))?
                    .to_string();
                let sender = self.agent_id(arguments)?;
                let envelope = {
                    let sender = sender.clone();
                    self.channel
                        .with_blocking(move |c| c.send(&sender, &message))
                        .await?
                };
                info!(agent_id = %sender, seq = envelope.seq, "status message sent");
                format!("Message sent: {}", envelope.message)
            }
            "get_messages" => {
                let reader = self.agent_id(arguments)?;
                let unread = {
                    let reader = reader.clone();
                    self.channel.with_blocking(move |c| c.unread(&reader)).await?
                };
                debug!(agent_id = %reader, count = unread.len(), "unread messages fetched");
                unread
                    .iter()
                    .map(|env| format!("[STATUS] {}: {}", env.sender_id, env.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            other => {
                return Err(RpcError::new(
                    INVALID_PARAMS,
                    format!("Unknown tool: {other}"),
                ));
            }
        };

        Ok(json!({ "content": [{ "type": "text", "text": text }] }))
    }

    fn agent_id(&self, arguments: &Value) -> Result<String, RpcError> {
        arguments
            .get("agent_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.default_agent.clone())
            .ok_or_else(|| {
                RpcError::new(
                    INVALID_PARAMS,
                    "agent_id is required (no default agent identity configured)",
                )
            })
    }
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": error.code, "message": error.message },
    })
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "send",
            "description": "Send a status message to the other agents",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Status message to share" },
                    "agent_id": { "type": "string", "description": "Sender identity; defaults to this agent" }
                },
                "required": ["message"]
            }
        },
        {
            "name": "get_messages",
            "description": "Get unread messages from the other agents",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "agent_id": { "type": "string", "description": "Reader identity; defaults to this agent" }
                }
            }
        }
    ])
}
