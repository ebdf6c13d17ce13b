//! Core MCP server implementation
//!
//! Owns the tool registry and the injected repository context; translates
//! protocol messages into registry lookups and router dispatches.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::fhir::FhirRepository;
use crate::tools::{FhirContext, ToolRegistry, dispatch};
use crate::transport::{JsonRpcMessage, McpMessage, MessageHandler, response};

pub struct McpServer {
    config: ServerConfig,
    registry: Arc<ToolRegistry>,
    ctx: FhirContext,
}

impl McpServer {
    /// Build a server around an injected repository implementation
    pub fn new(config: ServerConfig, repo: Arc<dyn FhirRepository>) -> Self {
        Self {
            config,
            registry: Arc::new(ToolRegistry::new()),
            ctx: FhirContext::new(repo),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "fhirgate-mcp",
                "version": crate::VERSION
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "instructions": "FHIRGate MCP Server - clinical-record tools over a FHIR repository"
        })
    }

    /// Descriptor data returned verbatim on tools/list
    fn tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .descriptors()
            .map(|descriptor| {
                json!({
                    "name": descriptor.name,
                    "description": descriptor.description,
                    "inputSchema": descriptor.input_schema
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}

#[async_trait]
impl MessageHandler for McpServer {
    async fn handle_message(&self, message: McpMessage) -> Result<Option<JsonRpcMessage>> {
        match message {
            McpMessage::Initialize { id, .. } => {
                info!("initialize request received");
                Ok(Some(response(id, self.initialize_result())))
            }

            McpMessage::ToolsList { id } => {
                info!("tools/list request ({} tools)", self.registry.len());
                Ok(Some(response(id, self.tools_list())))
            }

            McpMessage::ToolsCall { id, params } => {
                info!("tools/call: {}", params.name);
                let result =
                    dispatch(&self.registry, &self.ctx, &params.name, params.arguments).await;
                // Unknown tools and malformed requests stay in-band too; the
                // isError flag is the only protocol-level failure signal
                Ok(Some(response(
                    id,
                    json!({
                        "content": [
                            {
                                "type": "text",
                                "text": result.content
                            }
                        ],
                        "isError": result.is_error
                    }),
                )))
            }

            McpMessage::Notification { method } => {
                info!("notification: {method}");
                Ok(None)
            }

            McpMessage::Response { .. } => {
                // This server never initiates requests
                warn!("unexpected response message");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhir::RepoError;
    use serde_json::json;

    struct NoopRepo;

    #[async_trait]
    impl FhirRepository for NoopRepo {
        async fn create(&self, _resource: Value) -> Result<Value, RepoError> {
            unreachable!("repository must not be reached")
        }
        async fn read(&self, _t: &str, _id: &str) -> Result<Option<Value>, RepoError> {
            unreachable!("repository must not be reached")
        }
        async fn update(&self, _resource: Value) -> Result<Value, RepoError> {
            unreachable!("repository must not be reached")
        }
        async fn search(&self, _t: &str, _q: &str) -> Result<Vec<Value>, RepoError> {
            unreachable!("repository must not be reached")
        }
    }

    fn test_server() -> McpServer {
        McpServer::new(ServerConfig::default(), Arc::new(NoopRepo))
    }

    #[tokio::test]
    async fn test_initialize_response() {
        let server = test_server();
        let result = server
            .handle_message(McpMessage::Initialize { id: 1, params: None })
            .await
            .unwrap()
            .unwrap();
        let text = serde_json::to_string(&result).unwrap();
        assert!(text.contains("fhirgate-mcp"));
        assert!(text.contains("2024-11-05"));
    }

    #[tokio::test]
    async fn test_tools_list_contains_all_families() {
        let server = test_server();
        let result = server
            .handle_message(McpMessage::ToolsList { id: 2 })
            .await
            .unwrap()
            .unwrap();
        let JsonRpcMessage::Response { result: Some(body), .. } = result else {
            panic!("expected response body");
        };
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 36);
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn test_unknown_tool_stays_in_band_with_error_flag() {
        let server = test_server();
        let result = server
            .handle_message(McpMessage::ToolsCall {
                id: 3,
                params: crate::transport::ToolsCallParams {
                    name: "doesNotExist".to_string(),
                    arguments: Some(json!({})),
                },
            })
            .await
            .unwrap()
            .unwrap();
        let JsonRpcMessage::Response { result: Some(body), error, .. } = result else {
            panic!("expected in-band result");
        };
        assert!(error.is_none());
        assert_eq!(body["isError"], true);
        let envelope: Value =
            serde_json::from_str(body["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["success"], false);
        assert!(envelope["error"].as_str().unwrap().contains("doesNotExist"));
    }

    #[tokio::test]
    async fn test_validation_failure_stays_in_band() {
        let server = test_server();
        // Missing required fields never reach the repository (NoopRepo panics)
        let result = server
            .handle_message(McpMessage::ToolsCall {
                id: 4,
                params: crate::transport::ToolsCallParams {
                    name: "createPatient".to_string(),
                    arguments: Some(json!({"familyName": "Doe"})),
                },
            })
            .await
            .unwrap()
            .unwrap();
        let JsonRpcMessage::Response { result: Some(body), error, .. } = result else {
            panic!("expected in-band result");
        };
        assert!(error.is_none());
        assert_eq!(body["isError"], false);
        let envelope: Value =
            serde_json::from_str(body["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["success"], false);
        assert!(envelope["error"].as_str().unwrap().contains("givenName"));
    }
}
