//! JSON Schema validation of extracted data
//!
//! Structured schemas are enforced with draft 2020-12 semantics before a
//! result is stored. Every violation is collected — no short-circuit on
//! the first — so a failed job reports the full picture, with a summary
//! message capped at three entries.

use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

/// How many violations the summary message includes
const SUMMARY_ERROR_CAP: usize = 3;

/// Validate `data` against a JSON Schema
///
/// Returns every violation as `<dotted.path>: <message>` strings, or an
/// empty `Ok` when the data conforms. An invalid schema is itself reported
/// as a single violation.
pub fn validate(data: &Value, schema: &Value) -> Result<(), Vec<String>> {
    if !schema.is_object() {
        return Err(vec![format!(
            "Schema must be an object, got {}",
            type_name(schema)
        )]);
    }

    let validator = match jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
    {
        Ok(validator) => validator,
        Err(e) => return Err(vec![format!("Invalid JSON Schema: {e}")]),
    };

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|error| {
            let path = dotted_path(&error.instance_path.to_string());
            format!("{path}: {error}")
        })
        .collect();

    if errors.is_empty() {
        debug!("Data validation passed");
        Ok(())
    } else {
        Err(errors)
    }
}

/// Summary message for a failed validation: up to three formatted errors
pub fn summarize(errors: &[String]) -> String {
    let shown: Vec<&str> = errors
        .iter()
        .take(SUMMARY_ERROR_CAP)
        .map(String::as_str)
        .collect();
    format!("Validation failed: {}", shown.join(", "))
}

/// Convert a JSON pointer (`/items/0/name`) to a dotted path (`items.0.name`)
fn dotted_path(pointer: &str) -> String {
    let path = pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");

    if path.is_empty() {
        "root".to_string()
    } else {
        path
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "price": {"type": "number"}
            },
            "required": ["name"]
        })
    }

    #[test]
    fn test_valid_data_passes() {
        let data = json!({"name": "Tea", "price": 3.5});
        assert!(validate(&data, &product_schema()).is_ok());
    }

    #[test]
    fn test_wrong_type_reports_dotted_path() {
        let data = json!({"name": 123});
        let errors = validate(&data, &product_schema()).unwrap_err();
        assert!(!errors.is_empty());
        assert!(errors.iter().any(|e| e.starts_with("name:")), "{errors:?}");
    }

    #[test]
    fn test_missing_required_reported_at_root() {
        let data = json!({"price": 3.5});
        let errors = validate(&data, &product_schema()).unwrap_err();
        assert!(errors.iter().any(|e| e.starts_with("root:")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("name")), "{errors:?}");
    }

    #[test]
    fn test_all_errors_collected() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "string"},
                "c": {"type": "string"}
            },
            "required": ["a", "b", "c"]
        });
        let data = json!({"a": 1, "b": 2});
        let errors = validate(&data, &schema).unwrap_err();
        // Two type errors plus the missing "c"
        assert!(errors.len() >= 3, "{errors:?}");
    }

    #[test]
    fn test_nested_path_is_dotted() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"name": {"type": "string"}},
                        "required": ["name"]
                    }
                }
            }
        });
        let data = json!({"items": [{"name": "ok"}, {"name": 7}]});
        let errors = validate(&data, &schema).unwrap_err();
        assert!(
            errors.iter().any(|e| e.starts_with("items.1.name:")),
            "{errors:?}"
        );
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        let schema = json!({"type": "definitely-not-a-type"});
        let errors = validate(&json!({}), &schema).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_non_object_schema_rejected() {
        let errors = validate(&json!({}), &json!("not a schema")).unwrap_err();
        assert!(errors[0].contains("Schema must be an object"));
    }

    #[test]
    fn test_summarize_caps_at_three() {
        let errors = vec![
            "a: bad".to_string(),
            "b: bad".to_string(),
            "c: bad".to_string(),
            "d: bad".to_string(),
        ];
        let summary = summarize(&errors);
        assert!(summary.starts_with("Validation failed: "));
        assert!(summary.contains("a: bad"));
        assert!(summary.contains("c: bad"));
        assert!(!summary.contains("d: bad"));
    }

    #[test]
    fn test_dotted_path_shapes() {
        assert_eq!(dotted_path(""), "root");
        assert_eq!(dotted_path("/title"), "title");
        assert_eq!(dotted_path("/items/0/name"), "items.0.name");
    }
}
