//! Schema-less upstream entities.

use serde_json::{Map, Value};

/// An upstream entity: an ordered JSON object with no fixed schema.
pub type Entity = Map<String, Value>;

/// Render a JSON value the way it is compared and copied into derived fields.
///
/// Strings are taken verbatim; every other value uses its JSON text.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&json!("abc")), "abc");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&Value::Null), "null");
    }
}
