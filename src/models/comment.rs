use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// File attached to a comment. Opaque to this layer beyond JSON
/// round-tripping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
}

/// Entry in a row's threaded comment collection.
///
/// Reactions and attachments are stored as serialized JSON strings inside the
/// CRDT map rather than as native nested containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub parent_comment_id: Option<String>,
    pub content: String,
    pub author_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub reactions: HashMap<String, Vec<String>>,
    pub attachments: Vec<Attachment>,
}

/// Parse the reactions JSON string stored in the CRDT map. Parse failures are
/// logged and treated as an empty map, never surfaced.
pub fn parse_reactions(raw: &str) -> HashMap<String, Vec<String>> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Failed to parse comment reactions JSON: {}", e);
        HashMap::new()
    })
}

/// Parse the attachments JSON string stored in the CRDT map, with the same
/// lenient failure handling as reactions.
pub fn parse_attachments(raw: &str) -> Vec<Attachment> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Failed to parse comment attachments JSON: {}", e);
        Vec::new()
    })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

impl Comment {
    /// Build a comment from one entry of the collection's deep-value
    /// snapshot. Returns `None` when the entry isn't an object at all.
    pub fn from_snapshot(id: &str, value: &Value) -> Option<Self> {
        if !value.is_object() {
            warn!("Comment '{}' snapshot is not an object; skipping", id);
            return None;
        }
        let reactions = value
            .get("reactions")
            .and_then(|v| v.as_str())
            .map(parse_reactions)
            .unwrap_or_default();
        let attachments = value
            .get("attachments")
            .and_then(|v| v.as_str())
            .map(parse_attachments)
            .unwrap_or_default();
        Some(Self {
            id: id.to_string(),
            parent_comment_id: string_field(value, "parentCommentId"),
            content: string_field(value, "content").unwrap_or_default(),
            author_id: string_field(value, "authorId").unwrap_or_default(),
            created_at: string_field(value, "createdAt").unwrap_or_default(),
            updated_at: string_field(value, "updatedAt").unwrap_or_default(),
            is_resolved: value
                .get("isResolved")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            resolved_by: string_field(value, "resolvedBy"),
            resolved_at: string_field(value, "resolvedAt"),
            reactions,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reactions_parse_to_empty() {
        assert!(parse_reactions("not json at all").is_empty());
        assert!(parse_reactions("[1, 2]").is_empty());
    }

    #[test]
    fn malformed_attachments_parse_to_empty() {
        assert!(parse_attachments("{\"oops\": true}").is_empty());
    }

    #[test]
    fn reactions_round_trip() {
        let parsed = parse_reactions(r#"{"👍": ["u1", "u2"]}"#);
        assert_eq!(parsed.get("👍").unwrap(), &vec!["u1".to_string(), "u2".to_string()]);
    }
}
