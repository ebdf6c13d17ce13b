//! Encounter tools
//!
//! Encounter searches with zero criteria return an empty list without
//! touching the repository.

use serde_json::{Map, Value, json};
use tracing::warn;

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{
    codeable_text, opt_str, opt_str_list, reference, require_str, search_clauses, set_opt,
};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Encounter";

static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        arg: "patientId",
        field: "subject",
        kind: FieldKind::Reference("Patient"),
    },
    FieldRule {
        arg: "serviceProviderId",
        field: "serviceProvider",
        kind: FieldKind::Reference("Organization"),
    },
    FieldRule {
        arg: "reasonText",
        field: "reasonCode",
        kind: FieldKind::CodeableTextList,
    },
];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[],
    prepare: Some(prepare),
};

/// Participant and period convenience keys expand into nested structures
fn prepare(existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    match patch.remove("practitionerIds") {
        Some(Value::Array(ids)) => {
            let participants: Vec<Value> = ids
                .iter()
                .map(|id| {
                    id.as_str()
                        .map(|id| json!({"individual": reference("Practitioner", id)}))
                        .ok_or_else(|| {
                            ToolError::validation("practitionerIds must contain only string ids")
                        })
                })
                .collect::<Result<_, _>>()?;
            patch.insert("participant".to_string(), Value::Array(participants));
        }
        Some(Value::Null) => {
            patch.insert("participant".to_string(), Value::Null);
        }
        Some(_) => return Err(ToolError::validation("practitionerIds must be an array")),
        None => {}
    }

    let start = patch.remove("periodStart");
    let end = patch.remove("periodEnd");
    if start.is_some() || end.is_some() {
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
        // Both bounds cleared means no period at all
        if period.is_empty() {
            patch.insert("period".to_string(), Value::Null);
        } else {
            patch.insert("period".to_string(), json!(period));
        }
    }
    Ok(())
}

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let patient_id = require_str(args, "patientId")?;
    let status = require_str(args, "status")?;
    let class = require_str(args, "class")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert("status".to_string(), json!(status));
    resource.insert(
        "class".to_string(),
        json!({
            "system": "http://terminology.hl7.org/CodeSystem/v3-ActCode",
            "code": class
        }),
    );
    resource.insert("subject".to_string(), reference("Patient", &patient_id));
    if let Some(type_text) = opt_str(args, "typeText") {
        resource.insert("type".to_string(), json!([codeable_text(&type_text)]));
    }
    if let Some(ids) = opt_str_list(args, "practitionerIds") {
        let participants: Vec<Value> = ids
            .iter()
            .map(|id| json!({"individual": reference("Practitioner", id)}))
            .collect();
        resource.insert("participant".to_string(), Value::Array(participants));
    }
    set_opt(
        &mut resource,
        "serviceProvider",
        opt_str(args, "serviceProviderId").map(|id| reference("Organization", &id)),
    );
    let mut period = Map::new();
    set_opt(&mut period, "start", opt_str(args, "periodStart").map(Value::String));
    set_opt(&mut period, "end", opt_str(args, "periodEnd").map(Value::String));
    if !period.is_empty() {
        resource.insert("period".to_string(), Value::Object(period));
    }
    if let Some(reason) = opt_str(args, "reasonText") {
        resource.insert("reasonCode".to_string(), json!([codeable_text(&reason)]));
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
    ("date", "date"),
    ("practitionerId", "practitioner"),
    ("class", "class"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        warn!("searchEncounters called without criteria; returning empty result");
        return Ok(Value::Array(Vec::new()));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createEncounter",
            description: "Create an Encounter linking a patient, practitioners, and a service provider",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "status": {"type": "string", "enum": ["planned", "arrived", "in-progress", "finished", "cancelled"]},
                    "class": {"type": "string", "description": "Encounter class code (e.g. AMB, IMP, EMER)"},
                    "typeText": {"type": "string"},
                    "practitionerIds": {"type": "array", "items": {"type": "string"}},
                    "serviceProviderId": {"type": "string", "description": "Bare Organization id"},
                    "periodStart": {"type": "string"},
                    "periodEnd": {"type": "string"},
                    "reasonText": {"type": "string"}
                },
                "required": ["patientId", "status", "class"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getEncounterById",
            description: "Fetch an Encounter by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "encounterId": {"type": "string"}
                },
                "required": ["encounterId"]
            }),
            marshaling: Marshaling::ById { id_key: "encounterId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateEncounter",
            description: "Apply a partial update to an Encounter; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "encounterId": {"type": "string"},
                    "status": {"type": ["string", "null"]},
                    "periodStart": {"type": ["string", "null"]},
                    "periodEnd": {"type": ["string", "null"]},
                    "practitionerIds": {"type": ["array", "null"], "items": {"type": "string"}},
                    "serviceProviderId": {"type": ["string", "null"]},
                    "reasonText": {"type": ["string", "null"]}
                },
                "required": ["encounterId"]
            }),
            marshaling: Marshaling::Update { id_key: "encounterId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchEncounters",
            description: "Search Encounters; zero criteria returns an empty list",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string"},
                    "status": {"type": "string"},
                    "date": {"type": "string"},
                    "practitionerId": {"type": "string"},
                    "class": {"type": "string"}
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
    fn test_create_requires_patient_and_status() {
        assert!(build_create(&json!({"status": "planned", "class": "AMB"})).is_err());
        assert!(build_create(&json!({"patientId": "p1", "class": "AMB"})).is_err());
    }

    #[test]
    fn test_create_builds_participants_and_period() {
        let resource = build_create(&json!({
            "patientId": "p1",
            "status": "in-progress",
            "class": "AMB",
            "practitionerIds": ["dr-1", "dr-2"],
            "periodStart": "2026-01-01T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(resource["subject"]["reference"], "Patient/p1");
        assert_eq!(resource["participant"][1]["individual"]["reference"], "Practitioner/dr-2");
        assert_eq!(resource["period"]["start"], "2026-01-01T09:00:00Z");
        assert!(resource["period"].get("end").is_none());
    }

    #[test]
    fn test_period_patch_preserves_other_bound() {
        let existing = json!({
            "resourceType": "Encounter",
            "id": "e1",
            "status": "in-progress",
            "period": {"start": "2026-01-01T09:00:00Z"}
        });
        let patch = json!({"periodEnd": "2026-01-01T10:00:00Z", "status": "finished"})
            .as_object()
            .unwrap()
            .clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert_eq!(merged["period"]["start"], "2026-01-01T09:00:00Z");
        assert_eq!(merged["period"]["end"], "2026-01-01T10:00:00Z");
        assert_eq!(merged["status"], "finished");
    }

    #[test]
    fn test_practitioner_ids_patch_rebuilds_participants() {
        let existing = json!({
            "resourceType": "Encounter",
            "id": "e1",
            "status": "in-progress",
            "participant": [{"individual": {"reference": "Practitioner/old"}}]
        });
        let patch = json!({"practitionerIds": ["dr-9"]}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert_eq!(merged["participant"][0]["individual"]["reference"], "Practitioner/dr-9");
    }

    #[test]
    fn test_clearing_both_period_bounds_removes_period() {
        let existing = json!({
            "resourceType": "Encounter",
            "id": "e1",
            "status": "finished",
            "period": {"start": "2026-01-01T09:00:00Z", "end": "2026-01-01T10:00:00Z"}
        });
        let patch = json!({"periodStart": null, "periodEnd": null})
            .as_object()
            .unwrap()
            .clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert!(merged.get("period").is_none());
    }
}
