//! Lookup service response as consumed by the state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::Identifier;

/// Body of a successful lookup response.
///
/// Items are kept as raw JSON: only the identifier is interpreted here, the
/// rest is handed to consumers through the success/error buffers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub processing: Vec<Value>,
}

impl LookupResult {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.errors.is_empty() && self.processing.is_empty()
    }
}

/// Extract the identifier an item refers to.
///
/// The service nests it either as `{"identifier": [{"id": ..}]}` (results) or
/// `{"identifier": {"id": ..}}` (errors, processing); both shapes are accepted
/// everywhere. Numeric ids are rendered as strings.
pub fn item_identifier(item: &Value) -> Option<Identifier> {
    let holder = match item.get("identifier")? {
        Value::Array(entries) => entries.first()?,
        other => other,
    };
    match holder.get("id")? {
        Value::String(s) => Identifier::parse(s).ok(),
        Value::Number(n) => Identifier::parse(n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_list_and_object_shapes() {
        let listed = json!({"identifier": [{"id": "10.1/a", "type": "doi"}]});
        let object = json!({"identifier": {"id": "PMC123"}, "error": "not found"});
        assert_eq!(item_identifier(&listed).unwrap().as_str(), "10.1/a");
        assert_eq!(item_identifier(&object).unwrap().as_str(), "PMC123");
    }

    #[test]
    fn malformed_items_yield_none() {
        assert!(item_identifier(&json!({})).is_none());
        assert!(item_identifier(&json!({"identifier": []})).is_none());
        assert!(item_identifier(&json!({"identifier": {"id": null}})).is_none());
        assert!(item_identifier(&json!({"identifier": {"id": "  "}})).is_none());
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let result: LookupResult = serde_json::from_value(json!({"results": []})).unwrap();
        assert!(result.is_empty());
    }
}
