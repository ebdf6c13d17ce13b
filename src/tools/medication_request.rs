//! MedicationRequest tools
//!
//! The medication itself is expressed either inline (`medicationCodeableConcept`)
//! or as a reference to a Medication resource (`medicationId`); the two are
//! mutually exclusive at create time and across updates.

use serde_json::{Map, Value, json};

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{
    annotation, codeable_text, now_utc, opt_str, reference, require_str, search_clauses, set_opt,
};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "MedicationRequest";

pub const MEDICATION_FIELDS: &[&str] = &["medicationCodeableConcept", "medicationReference"];

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
        arg: "requesterId",
        field: "requester",
        kind: FieldKind::Reference("Practitioner"),
    },
    FieldRule {
        arg: "medicationId",
        field: "medicationReference",
        kind: FieldKind::Reference("Medication"),
    },
    FieldRule {
        arg: "medicationCodeableConcept",
        field: "medicationCodeableConcept",
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
    exclusive: &[MEDICATION_FIELDS],
    prepare: Some(prepare),
};

fn prepare(_existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    match patch.remove("dosageText") {
        Some(Value::String(text)) => {
            patch.insert("dosageInstruction".to_string(), json!([{"text": text}]));
        }
        Some(Value::Null) => {
            patch.insert("dosageInstruction".to_string(), Value::Null);
        }
        Some(_) => return Err(ToolError::validation("dosageText must be a string")),
        None => {}
    }
    Ok(())
}

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let patient_id = require_str(args, "patientId")?;
    let intent = require_str(args, "intent")?;

    let medication_text = opt_str(args, "medicationCodeableConcept");
    let medication_id = opt_str(args, "medicationId");
    let medication = match (medication_text, medication_id) {
        (Some(_), Some(_)) => {
            return Err(ToolError::AmbiguousId(
                "supply either medicationCodeableConcept or medicationId, not both".to_string(),
            ));
        }
        (Some(text), None) => ("medicationCodeableConcept", codeable_text(&text)),
        (None, Some(id)) => ("medicationReference", reference("Medication", &id)),
        (None, None) => {
            return Err(ToolError::validation(
                "one of medicationCodeableConcept or medicationId is required",
            ));
        }
    };

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert(
        "status".to_string(),
        json!(opt_str(args, "status").unwrap_or_else(|| "active".to_string())),
    );
    resource.insert("intent".to_string(), json!(intent));
    resource.insert(medication.0.to_string(), medication.1);
    resource.insert("subject".to_string(), reference("Patient", &patient_id));
    set_opt(
        &mut resource,
        "encounter",
        opt_str(args, "encounterId").map(|id| reference("Encounter", &id)),
    );
    set_opt(
        &mut resource,
        "requester",
        opt_str(args, "requesterId").map(|id| reference("Practitioner", &id)),
    );
    resource.insert(
        "authoredOn".to_string(),
        json!(opt_str(args, "authoredOn").unwrap_or_else(now_utc)),
    );
    if let Some(dosage) = opt_str(args, "dosageText") {
        resource.insert("dosageInstruction".to_string(), json!([{"text": dosage}]));
    }
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
    ("status", "status"),
    ("intent", "intent"),
    ("medicationId", "medication"),
    ("requesterId", "requester"),
    ("authoredOn", "authoredon"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        return Err(ToolError::validation(
            "at least one search criterion is required for MedicationRequest searches",
        ));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createMedicationRequest",
            description: "Create a MedicationRequest with an inline medication text or a Medication reference",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "intent": {"type": "string", "enum": ["proposal", "plan", "order", "original-order"]},
                    "status": {"type": "string", "description": "Defaults to active"},
                    "medicationCodeableConcept": {"type": "string", "description": "Medication as free text; exclusive with medicationId"},
                    "medicationId": {"type": "string", "description": "Bare Medication id; exclusive with medicationCodeableConcept"},
                    "encounterId": {"type": "string"},
                    "requesterId": {"type": "string", "description": "Bare Practitioner id"},
                    "authoredOn": {"type": "string", "description": "Defaults to now"},
                    "dosageText": {"type": "string"},
                    "note": {"type": "string"}
                },
                "required": ["patientId", "intent"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getMedicationRequestById",
            description: "Fetch a MedicationRequest by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "medicationRequestId": {"type": "string"}
                },
                "required": ["medicationRequestId"]
            }),
            marshaling: Marshaling::ById { id_key: "medicationRequestId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateMedicationRequest",
            description: "Apply a partial update; writing one medication[x] field clears the other",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "medicationRequestId": {"type": "string"},
                    "status": {"type": ["string", "null"]},
                    "intent": {"type": ["string", "null"]},
                    "medicationCodeableConcept": {"type": ["string", "null"]},
                    "medicationId": {"type": ["string", "null"]},
                    "dosageText": {"type": ["string", "null"]},
                    "note": {"type": ["string", "null"]}
                },
                "required": ["medicationRequestId"]
            }),
            marshaling: Marshaling::Update { id_key: "medicationRequestId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchMedicationRequests",
            description: "Search MedicationRequests; at least one criterion is required",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string"},
                    "status": {"type": "string"},
                    "intent": {"type": "string"},
                    "medicationId": {"type": "string"},
                    "requesterId": {"type": "string"},
                    "authoredOn": {"type": "string"}
                }
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(search(ctx, args))),
        },
    ]
}
