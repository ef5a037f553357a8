// `@last` reference resolution (spec §4.8): any string parameter value of
// the form `@last` or `@last.dotted.path` is replaced by (a traversal
// into) the previous action's result. Undefined paths render as
// `<undefined:path>` rather than failing the whole action.

use serde_json::Value;

const PREFIX: &str = "@last";

/// Walk `value` recursively, replacing every string that starts with
/// `@last` against `previous_result`.
pub fn resolve(value: &Value, previous_result: Option<&Value>) -> Value {
    match value {
        Value::String(s) if s == PREFIX || s.starts_with("@last.") => {
            resolve_reference(s, previous_result)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, previous_result)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, previous_result)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_reference(reference: &str, previous_result: Option<&Value>) -> Value {
    let Some(result) = previous_result else {
        return Value::String(format!("<undefined:{reference}>"));
    };

    if reference == PREFIX {
        return result.clone();
    }

    let path = reference.trim_start_matches("@last.");
    let mut cursor = result;
    for segment in path.split('.') {
        match cursor.get(segment) {
            Some(next) => cursor = next,
            None => return Value::String(format!("<undefined:{reference}>")),
        }
    }
    cursor.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_last_returns_whole_result() {
        let previous = serde_json::json!({"value": 42});
        let resolved = resolve(&serde_json::json!("@last"), Some(&previous));
        assert_eq!(resolved, previous);
    }

    #[test]
    fn dotted_path_traverses_object() {
        let previous = serde_json::json!({"variables": {"x": 7}});
        let resolved = resolve(&serde_json::json!("@last.variables.x"), Some(&previous));
        assert_eq!(resolved, serde_json::json!(7));
    }

    #[test]
    fn undefined_path_renders_placeholder_not_error() {
        let previous = serde_json::json!({"variables": {"x": 7}});
        let resolved = resolve(&serde_json::json!("@last.variables.missing"), Some(&previous));
        assert_eq!(resolved, serde_json::json!("<undefined:@last.variables.missing>"));
    }

    #[test]
    fn no_previous_result_renders_placeholder() {
        let resolved = resolve(&serde_json::json!("@last"), None);
        assert_eq!(resolved, serde_json::json!("<undefined:@last>"));
    }

    #[test]
    fn resolves_recursively_through_nested_params() {
        let previous = serde_json::json!({"value": "hi"});
        let params = serde_json::json!({"message": "@last", "count": 3});
        let resolved = resolve(&params, Some(&previous));
        assert_eq!(resolved["message"], serde_json::json!("hi"));
        assert_eq!(resolved["count"], serde_json::json!(3));
    }
}
