//! FHIR repository boundary
//!
//! The repository is reachable only through create/read/update/search
//! primitives. Every heterogeneous failure shape the server can produce
//! (string body, OperationOutcome payload, connection error) is normalized
//! into [`RepoError`] here, at the adapter, so handlers never inspect raw
//! HTTP responses.

pub mod auth;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
pub use auth::AuthSession;

/// Failures surfaced by the repository boundary
#[derive(Debug, Error)]
pub enum RepoError {
    /// Structured OperationOutcome returned by the repository
    #[error("repository reported an operation outcome")]
    Outcome(Value),

    /// Credential or token acquisition failure
    #[error("{0}")]
    Auth(String),

    /// Connection, serialization, or unexpected-response failure
    #[error("{0}")]
    Transport(String),
}

/// Create/read/update/search primitives over canonical resources
///
/// `read` reports absence as `Ok(None)`; only callers on write paths promote
/// that to an error.
#[async_trait]
pub trait FhirRepository: Send + Sync {
    async fn create(&self, resource: Value) -> Result<Value, RepoError>;
    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Value>, RepoError>;
    async fn update(&self, resource: Value) -> Result<Value, RepoError>;
    async fn search(&self, resource_type: &str, query: &str) -> Result<Vec<Value>, RepoError>;
}

/// Join search clauses into a `&`-separated query string
///
/// Multi-valued parameters repeat the key; the reserved `status` parameter
/// comma-joins its values (FHIR OR semantics).
pub fn build_query(clauses: &[(String, String)]) -> String {
    let mut status_values: Vec<&str> = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    for (key, value) in clauses {
        if key == "status" {
            status_values.push(value);
        } else {
            parts.push(format!("{}={}", key, encode_value(value)));
        }
    }
    if !status_values.is_empty() {
        let joined = status_values
            .iter()
            .map(|v| encode_value(v))
            .collect::<Vec<_>>()
            .join(",");
        parts.push(format!("status={joined}"));
    }
    parts.join("&")
}

/// Percent-encode the characters that would corrupt a query clause
fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '#' => out.push_str("%23"),
            '+' => out.push_str("%2B"),
            ' ' => out.push_str("%20"),
            _ => out.push(ch),
        }
    }
    out
}

/// HTTP implementation of the repository boundary
///
/// Acquires a bearer token from the auth session before every request; the
/// session refreshes itself when expired. Timeouts and cancellation are the
/// HTTP client's responsibility.
pub struct HttpFhirClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthSession,
}

impl HttpFhirClient {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: AuthSession::new(config),
        }
    }

    async fn bearer(&self) -> Result<String, RepoError> {
        self.auth.ensure_authenticated().await
    }

    /// Convert a non-success response into a normalized error
    async fn response_error(response: reqwest::Response) -> RepoError {
        let status = response.status();
        match response.json::<Value>().await {
            Ok(body) if body.get("resourceType") == Some(&Value::String("OperationOutcome".into())) => {
                RepoError::Outcome(body)
            }
            Ok(body) => RepoError::Transport(format!("repository returned {status}: {body}")),
            Err(_) => RepoError::Transport(format!("repository returned {status}")),
        }
    }

    async fn parse_json(response: reqwest::Response) -> Result<Value, RepoError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| RepoError::Transport(format!("invalid repository response: {e}")))
    }
}

#[async_trait]
impl FhirRepository for HttpFhirClient {
    async fn create(&self, resource: Value) -> Result<Value, RepoError> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| RepoError::Transport("resource is missing resourceType".to_string()))?
            .to_string();
        let token = self.bearer().await?;
        let url = format!("{}/{}", self.base_url, resource_type);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&resource)
            .send()
            .await
            .map_err(|e| RepoError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Self::parse_json(response).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Value>, RepoError> {
        let token = self.bearer().await?;
        let url = format!("{}/{}/{}", self.base_url, resource_type, id);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RepoError::Transport(e.to_string()))?;
        let status = response.status();
        if matches!(status.as_u16(), 404 | 410) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::response_error(response).await);
        }
        Ok(Some(Self::parse_json(response).await?))
    }

    async fn update(&self, resource: Value) -> Result<Value, RepoError> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| RepoError::Transport("resource is missing resourceType".to_string()))?
            .to_string();
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RepoError::Transport("resource is missing id".to_string()))?
            .to_string();
        let token = self.bearer().await?;
        let url = format!("{}/{}/{}", self.base_url, resource_type, id);
        debug!("PUT {}", url);
        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .json(&resource)
            .send()
            .await
            .map_err(|e| RepoError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Self::parse_json(response).await
    }

    async fn search(&self, resource_type: &str, query: &str) -> Result<Vec<Value>, RepoError> {
        let token = self.bearer().await?;
        let url = if query.is_empty() {
            format!("{}/{}", self.base_url, resource_type)
        } else {
            format!("{}/{}?{}", self.base_url, resource_type, query)
        };
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RepoError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        let bundle = Self::parse_json(response).await?;
        Ok(unwrap_bundle(bundle))
    }
}

/// Extract entry resources from a searchset Bundle
fn unwrap_bundle(bundle: Value) -> Vec<Value> {
    match bundle.get("entry").and_then(Value::as_array) {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| entry.get("resource").cloned())
            .collect(),
        None => {
            if bundle.get("resourceType") != Some(&Value::String("Bundle".into())) {
                warn!("search response was not a Bundle");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_query_joins_clauses() {
        let clauses = vec![
            ("family".to_string(), "Doe".to_string()),
            ("given".to_string(), "John".to_string()),
        ];
        assert_eq!(build_query(&clauses), "family=Doe&given=John");
    }

    #[test]
    fn test_build_query_repeats_keys_except_status() {
        let clauses = vec![
            ("performer".to_string(), "Practitioner/a".to_string()),
            ("performer".to_string(), "Practitioner/b".to_string()),
            ("status".to_string(), "final".to_string()),
            ("status".to_string(), "amended".to_string()),
        ];
        assert_eq!(
            build_query(&clauses),
            "performer=Practitioner/a&performer=Practitioner/b&status=final,amended"
        );
    }

    #[test]
    fn test_build_query_encodes_reserved_characters() {
        let clauses = vec![("name".to_string(), "a&b =c".to_string())];
        assert_eq!(build_query(&clauses), "name=a%26b%20%3Dc");
    }

    #[test]
    fn test_unwrap_bundle_extracts_resources() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1"}},
                {"resource": {"resourceType": "Patient", "id": "p2"}}
            ]
        });
        let resources = unwrap_bundle(bundle);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["id"], "p1");
    }

    #[test]
    fn test_unwrap_bundle_without_entries() {
        let bundle = json!({"resourceType": "Bundle", "type": "searchset", "total": 0});
        assert!(unwrap_bundle(bundle).is_empty());
    }
}
