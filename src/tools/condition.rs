//! Condition tools
//!
//! Conditions inject default clinical/verification statuses at create time
//! and carry two exclusivity groups: onset[x] and abatement[x].

use serde_json::{Map, Value, json};

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{
    annotation, codeable_concept, codeable_text, now_utc, opt_str, reference, require_str,
    search_clauses, set_opt,
};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Condition";

pub const ONSET_FIELDS: &[&str] = &[
    "onsetDateTime",
    "onsetAge",
    "onsetPeriod",
    "onsetRange",
    "onsetString",
];

pub const ABATEMENT_FIELDS: &[&str] = &[
    "abatementDateTime",
    "abatementAge",
    "abatementPeriod",
    "abatementRange",
    "abatementString",
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
        arg: "severity",
        field: "severity",
        kind: FieldKind::CodeableText,
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
    exclusive: &[ONSET_FIELDS, ABATEMENT_FIELDS],
    prepare: Some(prepare_statuses),
};

/// Status convenience strings expand into the canonical coded concepts
fn prepare_statuses(_existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    for (arg, system) in [
        (
            "clinicalStatus",
            "http://terminology.hl7.org/CodeSystem/condition-clinical",
        ),
        (
            "verificationStatus",
            "http://terminology.hl7.org/CodeSystem/condition-ver-status",
        ),
    ] {
        match patch.remove(arg) {
            Some(Value::String(code)) => {
                patch.insert(arg.to_string(), codeable_concept(Some(system), &code, None));
            }
            Some(Value::Null) => {
                patch.insert(arg.to_string(), Value::Null);
            }
            Some(other) => {
                // Already-canonical objects pass through
                patch.insert(arg.to_string(), other);
            }
            None => {}
        }
    }
    Ok(())
}

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let patient_id = require_str(args, "patientId")?;
    let code = require_str(args, "code")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert(
        "clinicalStatus".to_string(),
        codeable_concept(
            Some("http://terminology.hl7.org/CodeSystem/condition-clinical"),
            &opt_str(args, "clinicalStatus").unwrap_or_else(|| "active".to_string()),
            None,
        ),
    );
    resource.insert(
        "verificationStatus".to_string(),
        codeable_concept(
            Some("http://terminology.hl7.org/CodeSystem/condition-ver-status"),
            &opt_str(args, "verificationStatus").unwrap_or_else(|| "confirmed".to_string()),
            None,
        ),
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
    if let Some(severity) = opt_str(args, "severity") {
        resource.insert("severity".to_string(), codeable_text(&severity));
    }
    set_opt(
        &mut resource,
        "onsetDateTime",
        opt_str(args, "onsetDateTime").map(Value::String),
    );
    resource.insert(
        "recordedDate".to_string(),
        json!(opt_str(args, "recordedDate").unwrap_or_else(now_utc)),
    );
    if let Some(note) = opt_str(args, "note") {
        resource.insert("note".to_string(), annotation(&note));
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
    ("code", "code"),
    ("clinicalStatus", "clinical-status"),
    ("category", "category"),
    ("encounterId", "encounter"),
    ("onsetDate", "onset-date"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        return Err(ToolError::validation(
            "at least one search criterion is required for Condition searches",
        ));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createCondition",
            description: "Create a Condition; clinical and verification statuses default to active/confirmed",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "code": {"type": "string", "description": "Condition code (e.g. SNOMED CT)"},
                    "system": {"type": "string"},
                    "display": {"type": "string"},
                    "clinicalStatus": {"type": "string", "description": "Defaults to active"},
                    "verificationStatus": {"type": "string", "description": "Defaults to confirmed"},
                    "encounterId": {"type": "string"},
                    "severity": {"type": "string"},
                    "onsetDateTime": {"type": "string"},
                    "recordedDate": {"type": "string", "description": "Defaults to now"},
                    "note": {"type": "string"}
                },
                "required": ["patientId", "code"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getConditionById",
            description: "Fetch a Condition by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conditionId": {"type": "string"}
                },
                "required": ["conditionId"]
            }),
            marshaling: Marshaling::ById { id_key: "conditionId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateCondition",
            description: "Apply a partial update; onset[x] and abatement[x] members are each mutually exclusive",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conditionId": {"type": "string"},
                    "clinicalStatus": {"type": ["string", "null"]},
                    "verificationStatus": {"type": ["string", "null"]},
                    "severity": {"type": ["string", "null"]},
                    "note": {"type": ["string", "null"]},
                    "onsetDateTime": {"type": ["string", "null"]},
                    "onsetAge": {"type": ["object", "null"]},
                    "onsetPeriod": {"type": ["object", "null"]},
                    "onsetRange": {"type": ["object", "null"]},
                    "onsetString": {"type": ["string", "null"]},
                    "abatementDateTime": {"type": ["string", "null"]},
                    "abatementAge": {"type": ["object", "null"]},
                    "abatementPeriod": {"type": ["object", "null"]},
                    "abatementRange": {"type": ["object", "null"]},
                    "abatementString": {"type": ["string", "null"]}
                },
                "required": ["conditionId"]
            }),
            marshaling: Marshaling::Update { id_key: "conditionId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchConditions",
            description: "Search Conditions; at least one criterion is required",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string"},
                    "code": {"type": "string"},
                    "clinicalStatus": {"type": "string"},
                    "category": {"type": "string"},
                    "encounterId": {"type": "string"},
                    "onsetDate": {"type": "string"}
                }
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(search(ctx, args))),
        },
    ]
}
