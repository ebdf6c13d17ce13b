//! Update merger
//!
//! Produces the full replacement resource for an update call from the
//! existing snapshot and a convenience-shaped patch. JSON `null` is a clear
//! directive (delete the stored field); an absent key leaves the stored
//! value untouched. Writing any member of an exclusivity group removes every
//! other member; a patch touching no member leaves prior values alone.

use serde_json::{Map, Value};

use super::normalize;
use crate::error::ToolError;

/// How a convenience argument converts into its canonical field
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Bare id string -> `{reference: "<Type>/<id>"}`
    Reference(&'static str),
    /// Array of bare id strings -> array of references
    ReferenceList(&'static str),
    /// Scalar string -> annotation array
    Annotation,
    /// Scalar string -> text-only CodeableConcept
    CodeableText,
    /// Scalar string -> single-element array of text-only CodeableConcepts
    CodeableTextList,
}

pub struct FieldRule {
    pub arg: &'static str,
    pub field: &'static str,
    pub kind: FieldKind,
}

/// Hook for family-specific patch rewriting that needs the existing resource
/// (e.g. folding given/family name parts into a HumanName entry)
pub type PrepareFn = fn(&Value, &mut Map<String, Value>) -> Result<(), ToolError>;

/// Per-family merge policy
pub struct FamilyRules {
    pub resource_type: &'static str,
    pub fields: &'static [FieldRule],
    pub exclusive: &'static [&'static [&'static str]],
    pub prepare: Option<PrepareFn>,
}

impl FamilyRules {
    fn rule_for(&self, arg: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|rule| rule.arg == arg)
    }
}

/// Merge a convenience patch into an existing canonical resource
///
/// The result is a complete resource ready for the repository's update
/// primitive; no partial/PATCH semantics are sent downstream.
pub fn merge_update(
    existing: &Value,
    patch: &Map<String, Value>,
    rules: &FamilyRules,
) -> Result<Value, ToolError> {
    if patch.is_empty() {
        return Err(ToolError::validation("updates object cannot be empty"));
    }
    let mut result = existing
        .as_object()
        .cloned()
        .ok_or_else(|| ToolError::Other("existing resource is not an object".to_string()))?;

    let mut patch = patch.clone();
    if let Some(prepare) = rules.prepare {
        prepare(existing, &mut patch)?;
        if patch.is_empty() {
            return Err(ToolError::validation("updates object cannot be empty"));
        }
    }

    for (key, value) in &patch {
        let (field, converted) = match rules.rule_for(key) {
            Some(rule) => (rule.field, convert(rule, key, value)?),
            // Unknown keys write through as canonical fields
            None if value.is_null() => (key.as_str(), None),
            None => (key.as_str(), Some(value.clone())),
        };

        match converted {
            // Clear directive: remove the field, never store null
            None => {
                result.remove(field);
            }
            Some(converted) => {
                for group in rules.exclusive {
                    if group.contains(&field) {
                        for member in *group {
                            if *member != field {
                                result.remove(*member);
                            }
                        }
                    }
                }
                result.insert(field.to_string(), converted);
            }
        }
    }

    // Identity always comes from the stored resource, never the patch
    result.insert(
        "resourceType".to_string(),
        Value::String(rules.resource_type.to_string()),
    );
    if let Some(id) = existing.get("id") {
        result.insert("id".to_string(), id.clone());
    }

    Ok(Value::Object(result))
}

fn convert(rule: &FieldRule, key: &str, value: &Value) -> Result<Option<Value>, ToolError> {
    if value.is_null() {
        return Ok(None);
    }
    let converted = match rule.kind {
        FieldKind::Reference(resource_type) => {
            let id = value
                .as_str()
                .ok_or_else(|| ToolError::validation(format!("{key} must be a string id")))?;
            normalize::reference(resource_type, id)
        }
        FieldKind::ReferenceList(resource_type) => {
            let ids: Vec<String> = value
                .as_array()
                .ok_or_else(|| ToolError::validation(format!("{key} must be an array of ids")))?
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ToolError::validation(format!("{key} must contain only string ids"))
                    })
                })
                .collect::<Result<_, _>>()?;
            normalize::reference_list(resource_type, &ids)
        }
        FieldKind::Annotation => {
            let text = value
                .as_str()
                .ok_or_else(|| ToolError::validation(format!("{key} must be a string")))?;
            normalize::annotation(text)
        }
        FieldKind::CodeableText => {
            let text = value
                .as_str()
                .ok_or_else(|| ToolError::validation(format!("{key} must be a string")))?;
            normalize::codeable_text(text)
        }
        FieldKind::CodeableTextList => {
            let text = value
                .as_str()
                .ok_or_else(|| ToolError::validation(format!("{key} must be a string")))?;
            Value::Array(vec![normalize::codeable_text(text)])
        }
    };
    Ok(Some(converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static TEST_FIELDS: &[FieldRule] = &[
        FieldRule {
            arg: "encounterId",
            field: "encounter",
            kind: FieldKind::Reference("Encounter"),
        },
        FieldRule {
            arg: "note",
            field: "note",
            kind: FieldKind::Annotation,
        },
    ];

    static TEST_RULES: FamilyRules = FamilyRules {
        resource_type: "Observation",
        fields: TEST_FIELDS,
        exclusive: &[&["valueQuantity", "valueString", "valueBoolean"]],
        prepare: None,
    };

    fn existing() -> Value {
        json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "status": "final",
            "valueQuantity": {"value": 36.5, "unit": "Cel"},
            "encounter": {"reference": "Encounter/old"}
        })
    }

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_empty_patch_is_rejected_before_merging() {
        let err = merge_update(&existing(), &Map::new(), &TEST_RULES).unwrap_err();
        assert!(matches!(err, ToolError::Validation(m) if m.contains("cannot be empty")));
    }

    #[test]
    fn test_null_clears_the_field() {
        let result = merge_update(&existing(), &patch(json!({"encounterId": null})), &TEST_RULES).unwrap();
        assert!(result.get("encounter").is_none());
        // Untouched fields survive
        assert_eq!(result["status"], "final");
    }

    #[test]
    fn test_exclusivity_group_replacement() {
        let result = merge_update(&existing(), &patch(json!({"valueString": "x"})), &TEST_RULES).unwrap();
        assert!(result.get("valueQuantity").is_none());
        assert_eq!(result["valueString"], "x");
    }

    #[test]
    fn test_untouched_group_is_left_alone() {
        let result = merge_update(&existing(), &patch(json!({"status": "amended"})), &TEST_RULES).unwrap();
        assert_eq!(result["valueQuantity"]["unit"], "Cel");
        assert_eq!(result["status"], "amended");
    }

    #[test]
    fn test_identity_is_never_patch_controlled() {
        let result = merge_update(
            &existing(),
            &patch(json!({"id": "evil", "resourceType": "Patient", "status": "amended"})),
            &TEST_RULES,
        )
        .unwrap();
        assert_eq!(result["id"], "obs-1");
        assert_eq!(result["resourceType"], "Observation");
    }

    #[test]
    fn test_reference_conversion_in_patch() {
        let result = merge_update(&existing(), &patch(json!({"encounterId": "enc-2"})), &TEST_RULES).unwrap();
        assert_eq!(result["encounter"]["reference"], "Encounter/enc-2");
    }

    #[test]
    fn test_annotation_conversion_in_patch() {
        let result = merge_update(&existing(), &patch(json!({"note": "stable"})), &TEST_RULES).unwrap();
        assert_eq!(result["note"][0]["text"], "stable");
    }

    #[test]
    fn test_idempotent_reapplication() {
        let p = patch(json!({"valueString": "x", "note": "stable"}));
        let once = merge_update(&existing(), &p, &TEST_RULES).unwrap();
        let twice = merge_update(&once, &p, &TEST_RULES).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bad_reference_type_is_validation_error() {
        let err = merge_update(&existing(), &patch(json!({"encounterId": 7})), &TEST_RULES).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
