//! Error taxonomy and uniform result envelope
//!
//! Every tool invocation resolves to a [`ResultEnvelope`] regardless of which
//! handler or resource family raised the condition. Repository failures are
//! normalized into [`ToolError`] at the repository boundary (`fhir::RepoError`)
//! rather than re-classified per handler.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::fhir::RepoError;

/// Failure conditions raised by the dispatch and normalization layer
#[derive(Debug, Error)]
pub enum ToolError {
    /// Caller-input shape violation; always local and synchronous
    #[error("{0}")]
    Validation(String),

    /// More than one plausible identifier supplied for a single call
    #[error("ambiguous identifier: {0}")]
    AmbiguousId(String),

    /// Tool name not present in the registry
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Structured OperationOutcome payload surfaced by the repository
    #[error("operation failed")]
    RepositoryOutcome(Value),

    /// Absence on a write path; reads surface `null` data instead
    #[error("{resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    /// Catch-all for everything else
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ToolError::Validation(msg.into())
    }

    pub fn not_found(resource_type: &str, id: &str) -> Self {
        ToolError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<RepoError> for ToolError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Outcome(outcome) => ToolError::RepositoryOutcome(outcome),
            RepoError::Auth(msg) => ToolError::Other(format!("authentication failed: {msg}")),
            RepoError::Transport(msg) => ToolError::Other(msg),
        }
    }
}

/// Uniform per-tool result shape serialized into the protocol's text payload
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl ResultEnvelope {
    /// Successful invocation; `data` may be `Value::Null` for a read miss
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            outcome: None,
        }
    }

    /// Classify a failure into the uniform envelope shape
    pub fn from_error(err: ToolError) -> Self {
        match err {
            ToolError::RepositoryOutcome(outcome) => Self {
                success: false,
                data: None,
                error: Some("operation failed".to_string()),
                outcome: Some(outcome),
            },
            other => Self {
                success: false,
                data: None,
                error: Some(other.to_string()),
                outcome: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_error_carries_message() {
        let envelope = ResultEnvelope::from_error(ToolError::validation("givenName is required"));
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("givenName is required"));
        assert!(envelope.outcome.is_none());
    }

    #[test]
    fn test_repository_outcome_is_attached() {
        let outcome = json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "invalid"}]
        });
        let envelope = ResultEnvelope::from_error(ToolError::RepositoryOutcome(outcome.clone()));
        assert_eq!(envelope.error.as_deref(), Some("operation failed"));
        assert_eq!(envelope.outcome, Some(outcome));
    }

    #[test]
    fn test_not_found_names_the_resource() {
        let envelope = ResultEnvelope::from_error(ToolError::not_found("Encounter", "enc-9"));
        assert_eq!(envelope.error.as_deref(), Some("Encounter/enc-9 not found"));
    }

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = ResultEnvelope::ok(json!({"resourceType": "Patient", "id": "p1"}));
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.contains("\"success\":true"));
        assert!(!text.contains("\"error\""));
    }
}
