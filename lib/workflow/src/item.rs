//! Execution items: the unit of data on every edge.
//!
//! Nodes always consume and produce a batch (`Vec<ExecutionItem>`); single
//! values are wrapped with [`wrap_in_items`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;

/// A named binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryData {
    /// Base64-encoded content.
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One item of data flowing along an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionItem {
    /// JSON payload.
    pub json: JsonValue,
    /// Named binary attachments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary: BTreeMap<String, BinaryData>,
    /// Index of the originating item in the batch this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_item: Option<usize>,
}

impl ExecutionItem {
    /// Creates an item with no attachments or pairing.
    #[must_use]
    pub fn new(json: JsonValue) -> Self {
        Self {
            json,
            binary: BTreeMap::new(),
            paired_item: None,
        }
    }

    /// Adds a binary attachment.
    #[must_use]
    pub fn with_binary(mut self, name: impl Into<String>, binary: BinaryData) -> Self {
        self.binary.insert(name.into(), binary);
        self
    }

    /// Links the item to its originating item.
    #[must_use]
    pub fn with_paired_item(mut self, index: usize) -> Self {
        self.paired_item = Some(index);
        self
    }

    /// Returns a copy with a new payload, keeping attachments and pairing.
    #[must_use]
    pub fn derive(&self, json: JsonValue) -> Self {
        Self {
            json,
            binary: self.binary.clone(),
            paired_item: self.paired_item,
        }
    }
}

/// Wraps an arbitrary value as a batch.
///
/// Arrays become one item per element, each paired with its index; non-object
/// elements are wrapped as `{ "value": v }`. Any other value becomes a single
/// item.
#[must_use]
pub fn wrap_in_items(value: JsonValue) -> Vec<ExecutionItem> {
    match value {
        JsonValue::Array(elements) => elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                let json = if element.is_object() {
                    element
                } else {
                    json!({ "value": element })
                };
                ExecutionItem::new(json).with_paired_item(index)
            })
            .collect(),
        other => vec![ExecutionItem::new(other)],
    }
}

/// Returns the payload of the first item, or an empty object.
#[must_use]
pub fn first_payload(items: &[ExecutionItem]) -> JsonValue {
    items
        .first()
        .map(|item| item.json.clone())
        .unwrap_or_else(|| JsonValue::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_become_paired_items() {
        let items = wrap_in_items(json!([{ "a": 1 }, 2, "x"]));
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].json, json!({ "a": 1 }));
        assert_eq!(items[1].json, json!({ "value": 2 }));
        assert_eq!(items[2].json, json!({ "value": "x" }));
        assert_eq!(items[2].paired_item, Some(2));
    }

    #[test]
    fn scalars_and_objects_become_single_item() {
        let items = wrap_in_items(json!({ "ok": true }));
        assert_eq!(items, vec![ExecutionItem::new(json!({ "ok": true }))]);
        assert_eq!(wrap_in_items(json!(5)).len(), 1);
    }

    #[test]
    fn derive_keeps_attachments() {
        let item = ExecutionItem::new(json!({}))
            .with_binary(
                "data",
                BinaryData {
                    data: "AA==".to_string(),
                    mime_type: "image/png".to_string(),
                    file_name: None,
                },
            )
            .with_paired_item(3);
        let derived = item.derive(json!({ "n": 1 }));
        assert_eq!(derived.paired_item, Some(3));
        assert!(derived.binary.contains_key("data"));
    }

    #[test]
    fn first_payload_defaults_to_empty_object() {
        assert_eq!(first_payload(&[]), json!({}));
    }
}
