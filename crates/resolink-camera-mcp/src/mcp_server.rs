//! Newline-delimited JSON-RPC 2.0 server speaking the MCP tool subset.

use anyhow::{anyhow, bail, Context, Result};
use resolink_camera::CameraClient;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::camera_tools::{camera_tool_descriptors, execute_camera_tool, CameraToolOutput};

const MCP_JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "resonite-camera-server";
const MCP_ERROR_PARSE: i64 = -32700;
const MCP_ERROR_INVALID_REQUEST: i64 = -32600;
const MCP_ERROR_METHOD_NOT_FOUND: i64 = -32601;
const MCP_ERROR_INVALID_PARAMS: i64 = -32602;
const MCP_CONTENT_TYPE_TEXT: &str = "text";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct McpServeReport {
    pub(crate) processed_frames: usize,
    pub(crate) error_count: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct McpServerState {
    client: CameraClient,
}

impl McpServerState {
    pub(crate) fn new(client: CameraClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone)]
struct McpJsonRpcRequest {
    /// `None` for notifications, which never get a reply.
    id: Option<Value>,
    method: String,
    params: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct McpDispatchError {
    id: Value,
    code: i64,
    message: String,
}

impl McpDispatchError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

/// Serves requests line by line until `reader` reaches EOF.
pub(crate) async fn serve_mcp_jsonrpc_lines<R, W>(
    reader: R,
    writer: &mut W,
    state: &McpServerState,
) -> Result<McpServeReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut report = McpServeReport::default();
    let mut lines = reader.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read mcp request line")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.processed_frames = report.processed_frames.saturating_add(1);

        let frame = match serde_json::from_str::<Value>(line) {
            Ok(frame) => frame,
            Err(error) => {
                report.error_count = report.error_count.saturating_add(1);
                warn!(%error, "failed to parse mcp request line");
                let response = jsonrpc_error_frame(
                    Value::Null,
                    MCP_ERROR_PARSE,
                    format!("failed to parse mcp JSON frame: {error}"),
                );
                write_jsonrpc_line(writer, &response).await?;
                continue;
            }
        };

        let response = match parse_jsonrpc_request(&frame) {
            Ok(request) => {
                let Some(id) = request.id.clone() else {
                    debug!(method = %request.method, "mcp notification received");
                    continue;
                };
                match dispatch_jsonrpc_request(&request, state).await {
                    Ok(result) => jsonrpc_result_frame(id, result),
                    Err(error) => {
                        report.error_count = report.error_count.saturating_add(1);
                        jsonrpc_error_frame(error.id, error.code, error.message)
                    }
                }
            }
            Err(error) => {
                report.error_count = report.error_count.saturating_add(1);
                if is_notification(&frame) {
                    warn!(code = error.code, message = %error.message, "dropping invalid mcp notification");
                    continue;
                }
                jsonrpc_error_frame(error.id, error.code, error.message)
            }
        };
        write_jsonrpc_line(writer, &response).await?;
    }

    Ok(report)
}

/// Objects without an `id` are notifications and never get a reply.
fn is_notification(frame: &Value) -> bool {
    frame
        .as_object()
        .is_some_and(|object| !object.contains_key("id"))
}

fn parse_jsonrpc_request(value: &Value) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let Some(object) = value.as_object() else {
        return Err(McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must be an object",
        ));
    };
    let id = object.get("id").cloned();
    let reply_id = id.clone().unwrap_or(Value::Null);
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if jsonrpc != MCP_JSONRPC_VERSION {
        return Err(McpDispatchError::new(
            reply_id,
            MCP_ERROR_INVALID_REQUEST,
            format!("jsonrpc must be '{}'", MCP_JSONRPC_VERSION),
        ));
    }
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                reply_id.clone(),
                MCP_ERROR_INVALID_REQUEST,
                "jsonrpc request must include non-empty method",
            )
        })?;
    let params = match object.get("params") {
        Some(Value::Object(params)) => params.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                reply_id,
                MCP_ERROR_INVALID_PARAMS,
                "jsonrpc request params must be an object",
            ))
        }
    };
    Ok(McpJsonRpcRequest {
        id,
        method: method.to_string(),
        params,
    })
}

async fn dispatch_jsonrpc_request(
    request: &McpJsonRpcRequest,
    state: &McpServerState,
) -> Result<Value, McpDispatchError> {
    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(handle_tools_list()),
        "tools/call" => handle_tools_call(state, &request.params)
            .await
            .map_err(|error| McpDispatchError::new(id, MCP_ERROR_INVALID_PARAMS, error.to_string())),
        other => Err(McpDispatchError::new(
            id,
            MCP_ERROR_METHOD_NOT_FOUND,
            format!("unsupported method '{}'", other),
        )),
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn handle_tools_list() -> Value {
    json!({
        "tools": camera_tool_descriptors()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "title": tool.title,
                    "description": tool.description,
                    "inputSchema": tool.input_schema
                })
            })
            .collect::<Vec<_>>()
    })
}

async fn handle_tools_call(state: &McpServerState, params: &Map<String, Value>) -> Result<Value> {
    let tool_name = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("tools/call requires non-empty field 'name'"))?;
    let arguments = match params.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => bail!("tools/call field 'arguments' must be an object when provided"),
    };

    info!(tool = tool_name, "camera tool call");
    let output = execute_camera_tool(&state.client, tool_name, &arguments).await?;
    Ok(mcp_tool_call_result(output))
}

fn mcp_tool_call_result(output: CameraToolOutput) -> Value {
    let mut result = json!({
        "content": [{
            "type": MCP_CONTENT_TYPE_TEXT,
            "text": output.text
        }],
        "isError": output.is_error,
    });
    if let (Some(structured), Some(result)) = (output.structured, result.as_object_mut()) {
        result.insert("structuredContent".to_string(), structured);
    }
    result
}

async fn write_jsonrpc_line<W>(writer: &mut W, value: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(value).context("failed to encode mcp jsonrpc response")?;
    encoded.push(b'\n');
    writer
        .write_all(&encoded)
        .await
        .context("failed to write mcp response line")?;
    writer
        .flush()
        .await
        .context("failed to flush mcp response line")?;
    Ok(())
}

fn jsonrpc_result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error_frame(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}
