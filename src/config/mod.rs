//! Configuration management

use serde::{Deserialize, Serialize};

/// Server configuration
///
/// Repository location and credential identifiers are read once at startup
/// from the process environment. Missing credentials are not an error here;
/// the auth session reports them on first use.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// FHIR repository base URL
    pub base_url: String,
    /// OAuth2 token endpoint for the repository
    pub token_url: String,
    /// Client id for the repository connection
    pub client_id: Option<String>,
    /// Client secret for the repository connection
    pub client_secret: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            token_url: "http://localhost:8080/oauth/token".to_string(),
            client_id: None,
            client_secret: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("FHIR_BASE_URL").unwrap_or(defaults.base_url),
            token_url: std::env::var("FHIR_TOKEN_URL").unwrap_or(defaults.token_url),
            client_id: std::env::var("FHIR_CLIENT_ID").ok(),
            client_secret: std::env::var("FHIR_CLIENT_SECRET").ok(),
            log_level: std::env::var("FHIR_MCP_LOG").unwrap_or(defaults.log_level),
        }
    }
}
