//! EpisodeOfCare tools
//!
//! Zero-criteria searches return an empty list without a repository call,
//! matching the Encounter policy.

use serde_json::{Map, Value, json};
use tracing::warn;

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{codeable_text, opt_str, reference, require_str, search_clauses, set_opt};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "EpisodeOfCare";

static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        arg: "patientId",
        field: "patient",
        kind: FieldKind::Reference("Patient"),
    },
    FieldRule {
        arg: "managingOrganizationId",
        field: "managingOrganization",
        kind: FieldKind::Reference("Organization"),
    },
    FieldRule {
        arg: "careManagerId",
        field: "careManager",
        kind: FieldKind::Reference("Practitioner"),
    },
    FieldRule {
        arg: "typeText",
        field: "type",
        kind: FieldKind::CodeableTextList,
    },
];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[],
    prepare: Some(prepare_period),
};

fn prepare_period(existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    let start = patch.remove("periodStart");
    let end = patch.remove("periodEnd");
    if start.is_none() && end.is_none() {
        return Ok(());
    }
    let stored = existing.get("period");
    let mut period = Map::new();
    for (part, key, supplied) in [("start", "periodStart", start), ("end", "periodEnd", end)] {
        match supplied {
            Some(Value::String(v)) => {
                period.insert(part.to_string(), json!(v));
            }
            Some(Value::Null) => {}
            None => {
                if let Some(stored_part) = stored.and_then(|p| p.get(part)) {
                    period.insert(part.to_string(), stored_part.clone());
                }
            }
            Some(_) => return Err(ToolError::validation(format!("{key} must be a string"))),
        }
    }
    if period.is_empty() {
        patch.insert("period".to_string(), Value::Null);
    } else {
        patch.insert("period".to_string(), json!(period));
    }
    Ok(())
}

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let patient_id = require_str(args, "patientId")?;
    let status = require_str(args, "status")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert("status".to_string(), json!(status));
    resource.insert("patient".to_string(), reference("Patient", &patient_id));
    if let Some(type_text) = opt_str(args, "typeText") {
        resource.insert("type".to_string(), json!([codeable_text(&type_text)]));
    }
    set_opt(
        &mut resource,
        "managingOrganization",
        opt_str(args, "managingOrganizationId").map(|id| reference("Organization", &id)),
    );
    set_opt(
        &mut resource,
        "careManager",
        opt_str(args, "careManagerId").map(|id| reference("Practitioner", &id)),
    );
    let mut period = Map::new();
    set_opt(&mut period, "start", opt_str(args, "periodStart").map(Value::String));
    set_opt(&mut period, "end", opt_str(args, "periodEnd").map(Value::String));
    if !period.is_empty() {
        resource.insert("period".to_string(), Value::Object(period));
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

const SEARCH_PARAMS: &[(&str, &str)] = &[
    ("patientId", "patient"),
    ("status", "status"),
    ("organizationId", "organization"),
    ("careManagerId", "care-manager"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        warn!("searchEpisodesOfCare called without criteria; returning empty result");
        return Ok(Value::Array(Vec::new()));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createEpisodeOfCare",
            description: "Create an EpisodeOfCare for a patient under a managing organization",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "status": {"type": "string", "enum": ["planned", "waitlist", "active", "onhold", "finished", "cancelled"]},
                    "typeText": {"type": "string"},
                    "managingOrganizationId": {"type": "string"},
                    "careManagerId": {"type": "string", "description": "Bare Practitioner id"},
                    "periodStart": {"type": "string"},
                    "periodEnd": {"type": "string"}
                },
                "required": ["patientId", "status"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getEpisodeOfCareById",
            description: "Fetch an EpisodeOfCare by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "episodeOfCareId": {"type": "string"}
                },
                "required": ["episodeOfCareId"]
            }),
            marshaling: Marshaling::ById { id_key: "episodeOfCareId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateEpisodeOfCare",
            description: "Apply a partial update to an EpisodeOfCare; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "episodeOfCareId": {"type": "string"},
                    "status": {"type": ["string", "null"]},
                    "careManagerId": {"type": ["string", "null"]},
                    "managingOrganizationId": {"type": ["string", "null"]},
                    "periodStart": {"type": ["string", "null"]},
                    "periodEnd": {"type": ["string", "null"]}
                },
                "required": ["episodeOfCareId"]
            }),
            marshaling: Marshaling::Update { id_key: "episodeOfCareId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchEpisodesOfCare",
            description: "Search EpisodesOfCare; zero criteria returns an empty list",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string"},
                    "status": {"type": "string"},
                    "organizationId": {"type": "string"},
                    "careManagerId": {"type": "string"}
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
    fn test_create_requires_status() {
        let err = build_create(&json!({"patientId": "p1"})).unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("status")));
    }

    #[test]
    fn test_create_references() {
        let resource = build_create(&json!({
            "patientId": "p1",
            "status": "active",
            "managingOrganizationId": "org-1",
            "careManagerId": "dr-1"
        }))
        .unwrap();
        assert_eq!(resource["patient"]["reference"], "Patient/p1");
        assert_eq!(resource["managingOrganization"]["reference"], "Organization/org-1");
        assert_eq!(resource["careManager"]["reference"], "Practitioner/dr-1");
    }

    #[test]
    fn test_care_manager_clear_directive() {
        let existing = json!({
            "resourceType": "EpisodeOfCare",
            "id": "ep-1",
            "status": "active",
            "careManager": {"reference": "Practitioner/dr-1"}
        });
        let patch = json!({"careManagerId": null}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert!(merged.get("careManager").is_none());
    }

    #[test]
    fn test_clearing_both_period_bounds_removes_period() {
        let existing = json!({
            "resourceType": "EpisodeOfCare",
            "id": "ep-1",
            "status": "finished",
            "period": {"start": "2026-01-01", "end": "2026-06-01"}
        });
        let patch = json!({"periodStart": null, "periodEnd": null})
            .as_object()
            .unwrap()
            .clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert!(merged.get("period").is_none());
    }
}
