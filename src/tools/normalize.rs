//! Shared convenience-to-canonical conversion helpers
//!
//! Create and update normalizers across all resource families use these to
//! turn flat caller arguments (bare ids, strings) into the repository's
//! nested representation. Missing required fields raise
//! [`ToolError::Validation`] before any network call.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::ToolError;

/// `"<Type>/<id>"` reference object from a caller-supplied bare id
pub fn reference(resource_type: &str, id: &str) -> Value {
    json!({ "reference": format!("{resource_type}/{id}") })
}

pub fn reference_list(resource_type: &str, ids: &[String]) -> Value {
    Value::Array(ids.iter().map(|id| reference(resource_type, id)).collect())
}

/// CodeableConcept with a single coding
pub fn codeable_concept(system: Option<&str>, code: &str, display: Option<&str>) -> Value {
    let mut coding = Map::new();
    if let Some(system) = system {
        coding.insert("system".to_string(), json!(system));
    }
    coding.insert("code".to_string(), json!(code));
    if let Some(display) = display {
        coding.insert("display".to_string(), json!(display));
    }
    let mut concept = Map::new();
    concept.insert("coding".to_string(), Value::Array(vec![Value::Object(coding)]));
    if let Some(display) = display {
        concept.insert("text".to_string(), json!(display));
    }
    Value::Object(concept)
}

/// Text-only CodeableConcept
pub fn codeable_text(text: &str) -> Value {
    json!({ "text": text })
}

/// Scalar note string wrapped as an annotation array
pub fn annotation(text: &str) -> Value {
    json!([{ "text": text }])
}

/// RFC3339 creation timestamp for defaulted fields (issued, authoredOn)
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Required string argument; absence or wrong type is a validation failure
pub fn require_str(args: &Value, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ToolError::validation(format!("{key} cannot be empty"))),
        Some(_) => Err(ToolError::validation(format!("{key} must be a string"))),
        None => Err(ToolError::validation(format!("{key} is required"))),
    }
}

pub fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn opt_str_list(args: &Value, key: &str) -> Option<Vec<String>> {
    let items = args.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Insert only when a value is present; absent optionals are dropped from the
/// fragment entirely, never serialized as null
pub fn set_opt(obj: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        obj.insert(key.to_string(), value);
    }
}

/// Map recognized search arguments to `(param, value)` clauses
///
/// Each recognized argument yields exactly one clause per value; array-valued
/// arguments yield one clause per element. Unrecognized keys are ignored with
/// a diagnostic warning, never an error.
pub fn search_clauses(
    args: &Value,
    known: &[(&str, &str)],
    family: &str,
) -> Vec<(String, String)> {
    let mut clauses = Vec::new();
    let Some(map) = args.as_object() else {
        return clauses;
    };
    for (key, value) in map {
        let Some((_, param)) = known.iter().find(|(arg, _)| arg == key) else {
            warn!("ignoring unrecognized {family} search argument: {key}");
            continue;
        };
        match value {
            Value::String(s) => clauses.push((param.to_string(), s.clone())),
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        clauses.push((param.to_string(), s.to_string()));
                    } else {
                        warn!("ignoring non-string element in {family} search argument {key}");
                    }
                }
            }
            Value::Number(n) => clauses.push((param.to_string(), n.to_string())),
            Value::Bool(b) => clauses.push((param.to_string(), b.to_string())),
            _ => warn!("ignoring non-scalar {family} search argument: {key}"),
        }
    }
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_shape() {
        assert_eq!(
            reference("Patient", "abc"),
            json!({"reference": "Patient/abc"})
        );
    }

    #[test]
    fn test_require_str_errors() {
        let args = json!({"status": "final", "empty": "", "num": 3});
        assert_eq!(require_str(&args, "status").unwrap(), "final");
        assert!(matches!(require_str(&args, "missing"), Err(ToolError::Validation(m)) if m == "missing is required"));
        assert!(require_str(&args, "empty").is_err());
        assert!(require_str(&args, "num").is_err());
    }

    #[test]
    fn test_codeable_concept_with_system() {
        let concept = codeable_concept(Some("http://loinc.org"), "8310-5", Some("Body temperature"));
        assert_eq!(concept["coding"][0]["system"], "http://loinc.org");
        assert_eq!(concept["coding"][0]["code"], "8310-5");
        assert_eq!(concept["text"], "Body temperature");
    }

    #[test]
    fn test_search_clauses_ignores_unknown_keys() {
        let args = json!({"family": "Doe", "bogus": "x", "given": ["John", "Q"]});
        let known = [("family", "family"), ("given", "given")];
        let clauses = search_clauses(&args, &known, "Patient");
        assert_eq!(
            clauses,
            vec![
                ("family".to_string(), "Doe".to_string()),
                ("given".to_string(), "John".to_string()),
                ("given".to_string(), "Q".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_opt_drops_absent_values() {
        let mut obj = Map::new();
        set_opt(&mut obj, "gender", Some(json!("female")));
        set_opt(&mut obj, "birthDate", None);
        assert!(obj.contains_key("gender"));
        assert!(!obj.contains_key("birthDate"));
    }
}
