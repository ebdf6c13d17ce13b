//! Practitioner tools

use serde_json::{Map, Value, json};
use tracing::warn;

use super::merge::{self, FamilyRules};
use super::normalize::{codeable_text, opt_str, require_str, search_clauses, set_opt};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Practitioner";

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: &[],
    exclusive: &[],
    prepare: Some(prepare),
};

fn prepare(existing: &Value, patch: &mut Map<String, Value>) -> Result<(), ToolError> {
    match patch.remove("specialty") {
        Some(Value::String(s)) => {
            patch.insert(
                "qualification".to_string(),
                json!([{"code": codeable_text(&s)}]),
            );
        }
        Some(Value::Null) => {
            patch.insert("qualification".to_string(), Value::Null);
        }
        Some(_) => return Err(ToolError::validation("specialty must be a string")),
        None => {}
    }

    // Same name-part folding as Patient
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
    if let Some(identifier) = opt_str(args, "identifier") {
        resource.insert("identifier".to_string(), json!([{"value": identifier}]));
    }
    if let Some(specialty) = opt_str(args, "specialty") {
        resource.insert(
            "qualification".to_string(),
            json!([{"code": codeable_text(&specialty)}]),
        );
    }
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
    set_opt(&mut resource, "gender", opt_str(args, "gender").map(Value::String));
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
    ("identifier", "identifier"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        warn!("searchPractitioners called without criteria; running unfiltered search");
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createPractitioner",
            description: "Create a Practitioner from flat name and contact fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "givenName": {"type": "string"},
                    "familyName": {"type": "string"},
                    "identifier": {"type": "string", "description": "Professional identifier (e.g. NPI)"},
                    "specialty": {"type": "string"},
                    "gender": {"type": "string"},
                    "phone": {"type": "string"},
                    "email": {"type": "string"}
                },
                "required": ["givenName", "familyName"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getPractitionerById",
            description: "Fetch a Practitioner by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "practitionerId": {"type": "string"}
                },
                "required": ["practitionerId"]
            }),
            marshaling: Marshaling::ById { id_key: "practitionerId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updatePractitioner",
            description: "Apply a partial update to a Practitioner; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "practitionerId": {"type": "string"},
                    "givenName": {"type": ["string", "null"]},
                    "familyName": {"type": ["string", "null"]},
                    "specialty": {"type": ["string", "null"]},
                    "gender": {"type": ["string", "null"]}
                },
                "required": ["practitionerId"]
            }),
            marshaling: Marshaling::Update { id_key: "practitionerId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchPractitioners",
            description: "Search Practitioners; zero criteria runs an unfiltered search",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "family": {"type": "string"},
                    "given": {"type": "string"},
                    "identifier": {"type": "string"}
                }
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(search(ctx, args))),
        },
    ]
}
