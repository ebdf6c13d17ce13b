//! Organization tools
//!
//! Unlike the patient-facing families, organization searches require at
//! least one criterion.

use serde_json::{Map, Value, json};

use super::merge::{self, FamilyRules, FieldKind, FieldRule};
use super::normalize::{opt_str, require_str, search_clauses, set_opt};
use super::{FhirContext, HandlerResult, Marshaling, ToolDescriptor, ToolHandler};
use crate::error::ToolError;
use crate::fhir::build_query;

pub const RESOURCE_TYPE: &str = "Organization";

static FIELD_RULES: &[FieldRule] = &[FieldRule {
    arg: "partOfId",
    field: "partOf",
    kind: FieldKind::Reference("Organization"),
}];

pub static RULES: FamilyRules = FamilyRules {
    resource_type: RESOURCE_TYPE,
    fields: FIELD_RULES,
    exclusive: &[],
    prepare: None,
};

fn build_create(args: &Value) -> Result<Value, ToolError> {
    let name = require_str(args, "name")?;

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!(RESOURCE_TYPE));
    resource.insert("name".to_string(), json!(name));
    if let Some(alias) = opt_str(args, "alias") {
        resource.insert("alias".to_string(), json!([alias]));
    }
    if let Some(phone) = opt_str(args, "phone") {
        resource.insert("telecom".to_string(), json!([{"system": "phone", "value": phone}]));
    }
    let mut address = Map::new();
    set_opt(&mut address, "city", opt_str(args, "city").map(Value::String));
    set_opt(&mut address, "state", opt_str(args, "state").map(Value::String));
    set_opt(&mut address, "postalCode", opt_str(args, "postalCode").map(Value::String));
    if let Some(line) = opt_str(args, "addressLine") {
        address.insert("line".to_string(), json!([line]));
    }
    if !address.is_empty() {
        resource.insert("address".to_string(), json!([Value::Object(address)]));
    }
    set_opt(
        &mut resource,
        "partOf",
        opt_str(args, "partOfId").map(|id| super::normalize::reference("Organization", &id)),
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
    ("address", "address"),
    ("type", "type"),
];

pub async fn search(ctx: FhirContext, args: Value) -> HandlerResult {
    let clauses = search_clauses(&args, SEARCH_PARAMS, RESOURCE_TYPE);
    if clauses.is_empty() {
        return Err(ToolError::validation(
            "at least one search criterion is required for Organization searches",
        ));
    }
    let results = ctx.repo.search(RESOURCE_TYPE, &build_query(&clauses)).await?;
    Ok(Value::Array(results))
}

pub fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "createOrganization",
            description: "Create an Organization from flat name, contact, and address fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "alias": {"type": "string"},
                    "phone": {"type": "string"},
                    "addressLine": {"type": "string"},
                    "city": {"type": "string"},
                    "state": {"type": "string"},
                    "postalCode": {"type": "string"},
                    "partOfId": {"type": "string", "description": "Bare id of the parent Organization"}
                },
                "required": ["name"]
            }),
            marshaling: Marshaling::WholeObject,
            handler: ToolHandler::Whole(|ctx, args| Box::pin(create(ctx, args))),
        },
        ToolDescriptor {
            name: "getOrganizationById",
            description: "Fetch an Organization by id; returns null when absent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "organizationId": {"type": "string"}
                },
                "required": ["organizationId"]
            }),
            marshaling: Marshaling::ById { id_key: "organizationId" },
            handler: ToolHandler::ById(|ctx, id| Box::pin(get_by_id(ctx, id))),
        },
        ToolDescriptor {
            name: "updateOrganization",
            description: "Apply a partial update to an Organization; null values clear fields",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "organizationId": {"type": "string"},
                    "name": {"type": ["string", "null"]},
                    "partOfId": {"type": ["string", "null"]}
                },
                "required": ["organizationId"]
            }),
            marshaling: Marshaling::Update { id_key: "organizationId" },
            handler: ToolHandler::Update(|ctx, id, updates| Box::pin(update(ctx, id, updates))),
        },
        ToolDescriptor {
            name: "searchOrganizations",
            description: "Search Organizations; at least one criterion is required",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "address": {"type": "string"},
                    "type": {"type": "string"}
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
    fn test_create_requires_name() {
        let err = build_create(&json!({"city": "Boston"})).unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("name")));
    }

    #[test]
    fn test_address_assembly() {
        let resource = build_create(&json!({
            "name": "General Hospital",
            "addressLine": "1 Hospital Way",
            "city": "Boston",
            "postalCode": "02115"
        }))
        .unwrap();
        assert_eq!(resource["address"][0]["line"][0], "1 Hospital Way");
        assert_eq!(resource["address"][0]["city"], "Boston");
        assert!(resource["address"][0].get("state").is_none());
    }
}
