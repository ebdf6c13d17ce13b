//! Transport layer for the MCP call protocol
//!
//! Only stdio is implemented; the tool layer is transport-agnostic behind
//! [`MessageHandler`].

pub mod stdio;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use stdio::StdioTransport;

/// JSON-RPC 2.0 wire message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request {
        jsonrpc: String,
        id: Option<u64>,
        method: String,
        params: Option<Value>,
    },
    Response {
        jsonrpc: String,
        id: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    Notification {
        jsonrpc: String,
        method: String,
        params: Option<Value>,
    },
}

/// Internal representation of the messages this server handles
#[derive(Debug, Clone)]
pub enum McpMessage {
    Initialize { id: u64, params: Option<Value> },
    ToolsList { id: u64 },
    ToolsCall { id: u64, params: ToolsCallParams },
    Notification { method: String },
    Response { id: u64 },
}

/// Call-protocol request: an opaque tool name plus an argument bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;

impl McpMessage {
    /// Decode a wire message into the internal representation
    pub fn from_jsonrpc(message: JsonRpcMessage) -> Result<Self> {
        match message {
            JsonRpcMessage::Request { id, method, params, .. } => {
                let id = id.ok_or_else(|| anyhow::Error::msg("missing request id"))?;
                match method.as_str() {
                    "initialize" => Ok(McpMessage::Initialize { id, params }),
                    "tools/list" => Ok(McpMessage::ToolsList { id }),
                    "tools/call" => {
                        let params = params
                            .ok_or_else(|| anyhow::Error::msg("missing tools/call params"))?;
                        let params: ToolsCallParams = serde_json::from_value(params)
                            .map_err(|e| anyhow::Error::new(e).context("invalid tools/call params"))?;
                        Ok(McpMessage::ToolsCall { id, params })
                    }
                    other => Err(anyhow::Error::msg(format!("unknown method: {other}"))),
                }
            }
            JsonRpcMessage::Notification { method, .. } => Ok(McpMessage::Notification { method }),
            JsonRpcMessage::Response { id, .. } => {
                let id = id.ok_or_else(|| anyhow::Error::msg("missing response id"))?;
                Ok(McpMessage::Response { id })
            }
        }
    }
}

/// Build a successful JSON-RPC response
pub fn response(id: u64, result: Value) -> JsonRpcMessage {
    JsonRpcMessage::Response {
        jsonrpc: "2.0".to_string(),
        id: Some(id),
        result: Some(result),
        error: None,
    }
}

/// Build a JSON-RPC error response
pub fn error_response(id: u64, code: i32, message: impl Into<String>) -> JsonRpcMessage {
    JsonRpcMessage::Response {
        jsonrpc: "2.0".to_string(),
        id: Some(id),
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
            data: None,
        }),
    }
}

/// Handler for decoded protocol messages; `None` means no response is sent
#[async_trait]
pub trait MessageHandler {
    async fn handle_message(&self, message: McpMessage) -> Result<Option<JsonRpcMessage>>;
}

/// Transport lifecycle contract
#[async_trait]
pub trait Transport {
    async fn start(&self, handler: Box<dyn MessageHandler + Send + Sync>) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tools_call_decoding() {
        let wire = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "getPatientById", "arguments": {"patientId": "abc"}}
        });
        let message: JsonRpcMessage = serde_json::from_value(wire).unwrap();
        let decoded = McpMessage::from_jsonrpc(message).unwrap();
        match decoded {
            McpMessage::ToolsCall { id, params } => {
                assert_eq!(id, 7);
                assert_eq!(params.name, "getPatientById");
                assert_eq!(params.arguments.unwrap()["patientId"], "abc");
            }
            other => panic!("expected tools/call, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let wire = json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"});
        let message: JsonRpcMessage = serde_json::from_value(wire).unwrap();
        assert!(McpMessage::from_jsonrpc(message).is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let message = error_response(3, METHOD_NOT_FOUND, "unknown tool: nope");
        let text = serde_json::to_string(&message).unwrap();
        assert!(text.contains("-32601"));
        assert!(text.contains("unknown tool: nope"));
        assert!(!text.contains("\"result\""));
    }
}
