//! Patient tools
//!
//! Convenience arguments use flat name parts (`givenName`, `familyName`) and
//! bare ids; the create normalizer assembles the canonical HumanName array
//! and reference fields.

use serde_json::{Map, Value, json};
use tracing::warn;

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{self, opt_str, require_str, search_clauses, set_opt};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Patient";

static FIELD_RULES: &[FieldRule] = &[FieldRule {
    arg: "managingOrganizationId",
    field: "managingOrganization",
    kind: FieldKind::Reference("Organization"),
}];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[],
    prepare: Some(prepare_name),
};

/// Fold `givenName`/`familyName` patch keys into a HumanName entry, reusing
/// the stored name parts for whichever half the patch does not supply
fn prepare_name(existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    let given = patch.remove("givenName");
    let family = patch.remove("familyName");
    if given.is_none() && family.is_none() {
        return Ok(());
    }

    let stored = existing.get("name").and_then(|n| n.get(0));
    let mut name = Map::new();
    match given {
        Some(Value::String(g)) => {
            name.insert("given".to_string(), json!([g]));
        }
        // Explicit null clears the part; absent keeps the stored value
        Some(Value::Null) => {}
        None => {
            if let Some(stored_given) = stored.and_then(|n| n.get("given")) {
                name.insert("given".to_string(), stored_given.clone());
            }
        }
        Some(_) => return Err(ToolError::validation("givenName must be a string")),
    }
    match family {
        Some(Value::String(f)) => {
            name.insert("family".to_string(), json!(f));
        }
        Some(Value::Null) => {}
        None => {
            if let Some(stored_family) = stored.and_then(|n| n.get("family")) {
                name.insert("family".to_string(), stored_family.clone());
            }
        }
        Some(_) => return Err(ToolError::validation("familyName must be a string")),
    }
    // Clearing every part removes the name entirely, never storing `[{}]`
    if name.is_empty() {
        patch.insert("name".to_string(), Value::Null);
    } else {
        patch.insert("name".to_string(), json!([name]));
    }
    Ok(())
}

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let given = require_str(args, "givenName")?;
    let family = require_str(args, "familyName")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert("name".to_string(), json!([{"given": [given], "family": family}]));
    set_opt(&mut resource, "birthDate", opt_str(args, "birthDate").map(Value::String));
    set_opt(&mut resource, "gender", opt_str(args, "gender").map(Value::String));

    let mut telecom = Vec::new();
    if let Some(phone) = opt_str(args, "phone") {
        telecom.push(json!({"system": "phone", "value": phone}));
    }
    if let Some(email) = opt_str(args, "email") {
        telecom.push(json!({"system": "email", "value": email}));
    }
    if !telecom.is_empty() {
        resource.insert("telecom".to_string(), Value::Array(telecom));
    }

    set_opt(
        &mut resource,
        "managingOrganization",
        opt_str(args, "managingOrganizationId")
            .map(|id| normalize::reference("Organization", &id)),
    );
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
    ("name", "name"),
    ("family", "family"),
    ("given", "given"),
    ("birthdate", "birthdate"),
    ("gender", "gender"),
    ("identifier", "identifier"),
    ("phone", "phone"),
    ("email", "email"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        // Unfiltered patient searches are allowed but loud
        warn!("searchPatients called without criteria; running unfiltered search");
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createPatient",
            description: "Create a new Patient record from flat demographic fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "givenName": {"type": "string", "description": "Patient's given (first) name"},
                    "familyName": {"type": "string", "description": "Patient's family (last) name"},
                    "birthDate": {"type": "string", "description": "Date of birth, YYYY-MM-DD"},
                    "gender": {"type": "string", "enum": ["male", "female", "other", "unknown"]},
                    "phone": {"type": "string"},
                    "email": {"type": "string"},
                    "managingOrganizationId": {"type": "string", "description": "Bare Organization id"}
                },
                "required": ["givenName", "familyName"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getPatientById",
            description: "Fetch a Patient by id; returns null when the patient does not exist",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"}
                },
                "required": ["patientId"]
            }),
            marshaling: Marshaling::ById { id_key: "patientId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updatePatient",
            description: "Apply a partial update to a Patient; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patientId": {"type": "string", "description": "Bare Patient id"},
                    "givenName": {"type": ["string", "null"]},
                    "familyName": {"type": ["string", "null"]},
                    "birthDate": {"type": ["string", "null"]},
                    "gender": {"type": ["string", "null"]},
                    "managingOrganizationId": {"type": ["string", "null"]}
                },
                "required": ["patientId"]
            }),
            marshaling: Marshaling::Update { id_key: "patientId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchPatients",
            description: "Search Patients by demographics; zero criteria runs an unfiltered search",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "family": {"type": "string"},
                    "given": {"type": "string"},
                    "birthdate": {"type": "string"},
                    "gender": {"type": "string"},
                    "identifier": {"type": "string"},
                    "phone": {"type": "string"},
                    "email": {"type": "string"}
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
    fn test_create_requires_name_parts() {
        let err = build_create(&json!({"familyName": "Doe"})).unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("givenName")));
    }

    #[test]
    fn test_create_builds_canonical_shape() {
        let resource = build_create(&json!({
            "givenName": "Jane",
            "familyName": "Doe",
            "gender": "female",
            "phone": "+1-555-0000",
            "managingOrganizationId": "org-1"
        }))
        .unwrap();
        assert_eq!(resource["resourceType"], "Patient");
        assert_eq!(resource["name"][0]["given"][0], "Jane");
        assert_eq!(resource["telecom"][0]["value"], "+1-555-0000");
        assert_eq!(resource["managingOrganization"]["reference"], "Organization/org-1");
        // Absent optionals never serialize
        assert!(resource.get("birthDate").is_none());
    }

    #[test]
    fn test_name_patch_preserves_other_half() {
        let existing = json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"given": ["Jane"], "family": "Doe"}]
        });
        let patch = json!({"familyName": "Smith"}).as_object().unwrap().clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert_eq!(merged["name"][0]["family"], "Smith");
        assert_eq!(merged["name"][0]["given"][0], "Jane");
    }

    #[test]
    fn test_clearing_both_name_parts_removes_name() {
        let existing = json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"given": ["Jane"], "family": "Doe"}],
            "gender": "female"
        });
        let patch = json!({"givenName": null, "familyName": null})
            .as_object()
            .unwrap()
            .clone();
        let merged = merge::merge_update(&existing, &patch, &RULES).unwrap();
        assert!(merged.get("name").is_none());
        assert_eq!(merged["gender"], "female");
    }
}
