//! # FHIRGate MCP Server
//!
//! Model Context Protocol server exposing create/get/update/search tools over
//! clinical-record resources stored in an external FHIR repository. The crate
//! centers on the tool dispatch and resource-argument normalization layer:
//! routing `{name, arguments}` calls to the right handler and converting
//! convenience-shaped arguments into canonical FHIR fragments.

pub mod config;
pub mod error;
pub mod fhir;
pub mod server;
pub mod tools;
pub mod transport;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{ResultEnvelope, ToolError};
pub use fhir::{FhirRepository, HttpFhirClient};
pub use server::McpServer;
pub use tools::{FhirContext, ToolRegistry};

/// Current version of the MCP server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
