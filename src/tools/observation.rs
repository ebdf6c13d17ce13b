//! Observation tools
//!
//! Observations carry the largest exclusivity group: the eleven `value[x]`
//! fields, of which at most one may remain set after any update. Creation
//! requires at least one member.

use serde_json::{Map, Value, json};

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{
    annotation, codeable_concept, now_utc, opt_str, opt_str_list, reference, reference_list,
    require_str, search_clauses, set_opt,
};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Observation";

/// The eleven mutually exclusive value[x] fields
pub const VALUE_FIELDS: &[&str] = &[
    "valueQuantity",
    "valueCodeableConcept",
    "valueString",
    "valueBoolean",
    "valueInteger",
    "valueRange",
    "valueRatio",
    "valueSampledData",
    "valueTime",
    "valueDateTime",
    "valuePeriod",
];

static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        arg: "patientId",
        field: "subject",
        kind: FieldKind::Reference("Patient"),
    },
    FieldRule {
        arg: "encounterId",
        field: "encounter",
        kind: FieldKind::Reference("Encounter"),
    },
    FieldRule {
        arg: "performerIds",
        field: "performer",
        kind: FieldKind::ReferenceList("Practitioner"),
    },
    FieldRule {
        arg: "note",
        field: "note",
        kind: FieldKind::Annotation,
    },
];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[VALUE_FIELDS],
    prepare: None,
};

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let patient_id = require_str(args, "patientId")?;
    let code = require_str(args, "code")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert(
        "status".to_string(),
        json!(opt_str(args, "status").unwrap_or_else(|| "final".to_string())),
    );
    resource.insert(
        "code".to_string(),
        codeable_concept(
            opt_str(args, "system").as_deref(),
            &code,
            opt_str(args, "display").as_deref(),
        ),
    );
    resource.insert("subject".to_string(), reference("Patient", &patient_id));
    set_opt(
        &mut resource,
        "encounter",
        opt_str(args, "encounterId").map(|id| reference("Encounter", &id)),
    );
    set_opt(
        &mut resource,
        "performer",
        opt_str_list(args, "performerIds").map(|ids| reference_list("Practitioner", &ids)),
    );
    set_opt(
        &mut resource,
        "effectiveDateTime",
        opt_str(args, "effectiveDateTime").map(Value::String),
    );
    resource.insert(
        "issued".to_string(),
        json!(opt_str(args, "issued").unwrap_or_else(now_utc)),
    );
    if let Some(note) = opt_str(args, "note") {
        resource.insert("note".to_string(), annotation(&note));
    }

    let mut value_count = 0;
    for field in VALUE_FIELDS {
        if let Some(value) = args.get(*field) {
            if value.is_null() {
                continue;
            }
            resource.insert(field.to_string(), value.clone());
            value_count += 1;
        }
    }
    match value_count {
        0 => Err(ToolError::validation(
            "at least one value[x] field is required (e.g. valueQuantity, valueString)",
        )),
        1 => Ok(Value::Object(resource)),
        _ => Err(ToolError::validation(
            "only one value[x] field may be supplied",
        )),
    }
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
    ("code", "code"),
    ("category", "category"),
    ("status", "status"),
    ("date", "date"),
    ("encounterId", "encounter"),
    ("performerId", "performer"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        return Err(ToolError::validation(
            "at least one search criterion is required for Observation searches",
        ));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createObservation",
            description: "Create an Observation with exactly one value[x] field",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "code": {"type": "string", "description": "Observation code (e.g. LOINC)"},
                    "system": {"type": "string", "description": "Code system URL"},
                    "display": {"type": "string"},
                    "status": {"type": "string", "description": "Defaults to final"},
                    "encounterId": {"type": "string"},
                    "performerIds": {"type": "array", "items": {"type": "string"}},
                    "effectiveDateTime": {"type": "string"},
                    "issued": {"type": "string", "description": "Defaults to now"},
                    "note": {"type": "string"},
                    "valueQuantity": {"type": "object"},
                    "valueCodeableConcept": {"type": "object"},
                    "valueString": {"type": "string"},
                    "valueBoolean": {"type": "boolean"},
                    "valueInteger": {"type": "integer"},
                    "valueRange": {"type": "object"},
                    "valueRatio": {"type": "object"},
                    "valueSampledData": {"type": "object"},
                    "valueTime": {"type": "string"},
                    "valueDateTime": {"type": "string"},
                    "valuePeriod": {"type": "object"}
                },
                "required": ["patientId", "code"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getObservationById",
            description: "Fetch an Observation by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "observationId": {"type": "string"}
                },
                "required": ["observationId"]
            }),
            marshaling: Marshaling::ById { id_key: "observationId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateObservation",
            description: "Apply a partial update; writing any value[x] clears the other ten",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "observationId": {"type": "string"},
                    "status": {"type": ["string", "null"]},
                    "encounterId": {"type": ["string", "null"]},
                    "performerIds": {"type": ["array", "null"], "items": {"type": "string"}},
                    "note": {"type": ["string", "null"]},
                    "valueQuantity": {"type": ["object", "null"]},
                    "valueCodeableConcept": {"type": ["object", "null"]},
                    "valueString": {"type": ["string", "null"]},
                    "valueBoolean": {"type": ["boolean", "null"]},
                    "valueInteger": {"type": ["integer", "null"]},
                    "valueRange": {"type": ["object", "null"]},
                    "valueRatio": {"type": ["object", "null"]},
                    "valueSampledData": {"type": ["object", "null"]},
                    "valueTime": {"type": ["string", "null"]},
                    "valueDateTime": {"type": ["string", "null"]},
                    "valuePeriod": {"type": ["object", "null"]}
                },
                "required": ["observationId"]
            }),
            marshaling: Marshaling::Update { id_key: "observationId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchObservations",
            description: "Search Observations; at least one criterion is required",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string"},
                    "code": {"type": "string"},
                    "category": {"type": "string"},
                    "status": {"type": "string"},
                    "date": {"type": "string"},
                    "encounterId": {"type": "string"},
                    "performerId": {"type": "string"}
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
    fn test_create_requires_a_value_field() {
        let err = build_create(&json!({"patientId": "p1", "code": "8310-5"})).unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("value[x]")));
    }

    #[test]
    fn test_create_rejects_two_value_fields() {
        let err = build_create(&json!({
            "patientId": "p1",
            "code": "8310-5",
            "valueString": "x",
            "valueBoolean": true
        }))
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("only one")));
    }

    #[test]
    fn test_create_defaults_status_and_issued() {
        let resource = build_create(&json!({
            "patientId": "p1",
            "code": "8310-5",
            "system": "http://loinc.org",
            "display": "Body temperature",
            "valueQuantity": {"value": 36.5, "unit": "Cel"}
        }))
        .unwrap();
        assert_eq!(resource["status"], "final");
        assert!(resource["issued"].as_str().is_some());
        assert_eq!(resource["code"]["coding"][0]["code"], "8310-5");
        assert_eq!(resource["subject"]["reference"], "Patient/p1");
    }

    #[test]
    fn test_update_value_exclusivity() {
        let existing = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "status": "final",
            "valueQuantity": {"value": 36.5, "unit": "Cel"}
        });
        let patch = json!({"valueString": "36.5 Cel"}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert!(merged.get("valueQuantity").is_none());
        assert_eq!(merged["valueString"], "36.5 Cel");
    }

    #[test]
    fn test_performer_ids_convert_to_references() {
        let existing = json!({"resourceType": "Observation", "id": "obs-1", "status": "final"});
        let patch = json!({"performerIds": ["dr-1", "dr-2"]}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert_eq!(merged["performer"][0]["reference"], "Practitioner/dr-1");
        assert_eq!(merged["performer"][1]["reference"], "Practitioner/dr-2");
    }
}
