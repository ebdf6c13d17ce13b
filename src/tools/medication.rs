//! Medication tools

use serde_json::{Map, Value, json};
use tracing::warn;

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{codeable_concept, codeable_text, opt_str, require_str, search_clauses, set_opt};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Medication";

static FIELD_RULES: &[FieldRule] = &[FieldRule {
    arg: "form",
    field: "form",
    kind: FieldKind::CodeableText,
}];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[],
    prepare: None,
};

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let code = require_str(args, "code")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert(
        "code".to_string(),
        codeable_concept(
            opt_str(args, "system").as_deref(),
            &code,
            opt_str(args, "display").as_deref(),
        ),
    );
    set_opt(&mut resource, "status", opt_str(args, "status").map(Value::String));
    if let Some(form) = opt_str(args, "form") {
        resource.insert("form".to_string(), codeable_text(&form));
    }
    Ok(Value::Object(resource))
}

pub async fn create(ctx: FhirContext, args: Value) -> HandlerResult {
    let resource = build_create(&args)?;
    Ok(ctx.repo.create(resource).await?)
}

pub async fn get_by_id(ctx: FhirContext, id: String) -> HandlerResult {
    Ok(ctx
        .repo
        .read(RESOURCE_TYPE, &id)
        .await?
        .unwrap_or(Value::Null))
}

pub async fn update(ctx: FhirContext, id: String, updates: Map<String, Value>) -> HandlerResult {
    let existing = ctx
        .repo
        .read(RESOURCE_TYPE, &id)
        .await?
        .ok_or_else(|| ToolError::not_found(RESOURCE_TYPE, &id))?;
    let merged = merge::merge_update(&existing, &updates, &RULES)?;
    Ok(ctx.repo.update(merged).await?)
}

const SEARCH_PARAMS: &[(&str, &str)] = &[("code", "code"), ("status", "status")];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        warn!("searchMedications called without criteria; running unfiltered search");
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createMedication",
            description: "Create a Medication from a code and optional form",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Medication code (e.g. RxNorm)"},
                    "system": {"type": "string"},
                    "display": {"type": "string"},
                    "form": {"type": "string", "description": "Dose form, free text"},
                    "status": {"type": "string", "enum": ["active", "inactive", "entered-in-error"]}
                },
                "required": ["code"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getMedicationById",
            description: "Fetch a Medication by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "medicationId": {"type": "string"}
                },
                "required": ["medicationId"]
            }),
            marshaling: Marshaling::ById { id_key: "medicationId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateMedication",
            description: "Apply a partial update to a Medication; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "medicationId": {"type": "string"},
                    "status": {"type": ["string", "null"]},
                    "form": {"type": ["string", "null"]}
                },
                "required": ["medicationId"]
            }),
            marshaling: Marshaling::Update { id_key: "medicationId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchMedications",
            description: "Search Medications; zero criteria runs an unfiltered search",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string"},
                    "status": {"type": "string"}
                }
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(search(ctx, args))),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_requires_code() {
        assert!(build_create(&json!({"form": "tablet"})).is_err());
    }

    #[test]
    fn test_form_patch_converts_to_codeable_text() {
        let existing = json!({"resourceType": "Medication", "id": "m1"});
        let patch = json!({"form": "capsule"}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert_eq!(merged["form"]["text"], "capsule");
    }
}
