//! Request router
//!
//! Routes an opaque `{name, arguments}` call to its handler with the
//! marshaling the descriptor declares, then wraps the outcome in the uniform
//! result envelope. Per-tool failures stay inside the envelope; only unknown
//! tools and malformed requests set the protocol-level error flag. Nothing
//! thrown below this point escapes to the transport uncaught.

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FhirContext, Marshaling, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::error::{ResultEnvelope, ToolError};

/// Final serialized outcome of one tool call
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// JSON-serialized [`ResultEnvelope`], the protocol's single text payload
    pub content: String,
    /// Set only for failures outside the per-tool error channel
    pub is_error: bool,
}

/// Dispatch a call request through the registry
pub async fn dispatch(
    registry: &ToolRegistry,
    ctx: &FhirContext,
    name: &str,
    arguments: Option<Value>,
) -> ToolCallResult {
    let call_id = Uuid::new_v4();
    debug!(%call_id, tool = name, args = ?arguments, "dispatching tool call");

    let args = match arguments {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => {
            return protocol_error(ToolError::validation("arguments are required"));
        }
        Some(_) => {
            return protocol_error(ToolError::validation("arguments must be an object"));
        }
    };

    let Some(descriptor) = registry.lookup(name) else {
        warn!(%call_id, tool = name, "unknown tool");
        return protocol_error(ToolError::UnknownTool(name.to_string()));
    };

    let envelope = match invoke(descriptor, ctx.clone(), args).await {
        Ok(data) => ResultEnvelope::ok(data),
        Err(err) => {
            debug!(%call_id, tool = name, error = %err, "tool call failed");
            ResultEnvelope::from_error(err)
        }
    };
    debug!(%call_id, tool = name, success = envelope.success, "tool call finished");

    ToolCallResult {
        content: serialize_envelope(&envelope),
        is_error: false,
    }
}

async fn invoke(
    descriptor: &ToolDescriptor,
    ctx: FhirContext,
    mut args: Map<String, Value>,
) -> Result<Value, ToolError> {
    match (&descriptor.marshaling, &descriptor.handler) {
        (Marshaling::ById { id_key }, ToolHandler::ById(handler)) => {
            let id = extract_id(&args, id_key)?;
            handler(ctx, id).await
        }
        (Marshaling::Update { id_key }, ToolHandler::Update(handler)) => {
            let id = match args.remove(*id_key) {
                Some(Value::String(id)) => id,
                Some(_) => {
                    return Err(ToolError::validation(format!("{id_key} must be a string")));
                }
                None => return Err(ToolError::validation(format!("{id_key} is required"))),
            };
            handler(ctx, id, args).await
        }
        (Marshaling::WholeObject, ToolHandler::Whole(handler)) => {
            handler(ctx, Value::Object(args)).await
        }
        _ => Err(ToolError::Other(format!(
            "tool {} has a mismatched marshaling category",
            descriptor.name
        ))),
    }
}

/// Resolve the descriptor's identifier key, falling back to a literal `id`
fn extract_id(args: &Map<String, Value>, id_key: &str) -> Result<String, ToolError> {
    let value = args.get(id_key).or_else(|| args.get("id"));
    match value {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(_) => Err(ToolError::validation(format!(
            "{id_key} must be a non-empty string"
        ))),
        None => Err(ToolError::validation(format!("{id_key} is required"))),
    }
}

fn protocol_error(err: ToolError) -> ToolCallResult {
    ToolCallResult {
        content: serialize_envelope(&ResultEnvelope::from_error(err)),
        is_error: true,
    }
}

/// Serialization itself must never take down a response
fn serialize_envelope(envelope: &ResultEnvelope) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        warn!("failed to serialize result envelope: {e}");
        format!("{{\"success\":false,\"error\":\"internal serialization failure: {e}\"}}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_id_prefers_named_key() {
        let args = json!({"patientId": "abc", "id": "other"})
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(extract_id(&args, "patientId").unwrap(), "abc");
    }

    #[test]
    fn test_extract_id_falls_back_to_literal_id() {
        let args = json!({"id": "xyz"}).as_object().unwrap().clone();
        assert_eq!(extract_id(&args, "patientId").unwrap(), "xyz");
    }

    #[test]
    fn test_extract_id_missing() {
        let args = json!({"gender": "female"}).as_object().unwrap().clone();
        let err = extract_id(&args, "patientId").unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("patientId")));
    }
}
