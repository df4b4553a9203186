use chrono::Utc;
use loro::{LoroDoc, LoroMap};
use loro::ToJson;
use tracing::warn;
use uuid::Uuid;

use crate::models::comment::{parse_reactions, Comment};
use crate::models::Attachment;

/// Key of the comment collection inside a row's shared document.
pub const COMMENTS_KEY: &str = "comments";

/// Origin tag attributed to every local comment transaction, so observers
/// can tell local edits from remote ones and avoid echo loops.
pub const LOCAL_ORIGIN: &str = "local";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// The CRDT map for an existing comment. Missing comments are an error; the
/// collection itself is created on demand.
fn comment_map(comments: &LoroMap, comment_id: &str) -> Result<LoroMap, String> {
    if comments.get(comment_id).is_none() {
        return Err(format!("Comment '{}' not found", comment_id));
    }
    comments
        .get_or_create_container(comment_id, LoroMap::new())
        .map_err(|e| format!("Failed to access comment '{}': {}", comment_id, e))
}

fn string_field(map: &LoroMap, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.as_value().and_then(|v| v.as_string().map(|s| s.to_string())))
}

/// Add a comment to the row's collection and return its id.
pub fn add_comment(
    doc: &LoroDoc,
    content: &str,
    author_id: &str,
    parent_comment_id: Option<&str>,
    attachments: &[Attachment],
) -> Result<String, String> {
    let id = Uuid::new_v4().to_string();
    let attachments_json = serde_json::to_string(attachments)
        .map_err(|e| format!("Failed to serialize attachments: {}", e))?;

    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    let entry = comments
        .get_or_create_container(&id, LoroMap::new())
        .map_err(|e| format!("Failed to create comment '{}': {}", id, e))?;

    let now = now_rfc3339();
    let _ = entry.insert("id", id.as_str());
    if let Some(parent) = parent_comment_id {
        let _ = entry.insert("parentCommentId", parent);
    }
    let _ = entry.insert("content", content);
    let _ = entry.insert("authorId", author_id);
    let _ = entry.insert("createdAt", now.as_str());
    let _ = entry.insert("updatedAt", now.as_str());
    let _ = entry.insert("isResolved", false);
    let _ = entry.insert("reactions", "{}");
    let _ = entry.insert("attachments", attachments_json.as_str());
    doc.commit();
    Ok(id)
}

pub fn update_comment_content(
    doc: &LoroDoc,
    comment_id: &str,
    content: &str,
) -> Result<(), String> {
    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    let entry = comment_map(&comments, comment_id)?;
    let now = now_rfc3339();
    let _ = entry.insert("content", content);
    let _ = entry.insert("updatedAt", now.as_str());
    doc.commit();
    Ok(())
}

/// Delete a comment and its direct replies. The cascade is exactly one
/// level: replies to replies are left in place.
pub fn delete_comment(doc: &LoroDoc, comment_id: &str) -> Result<(), String> {
    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    if comments.get(comment_id).is_none() {
        return Err(format!("Comment '{}' not found", comment_id));
    }

    let snapshot = doc.get_deep_value().to_json_value();
    let mut doomed = vec![comment_id.to_string()];
    if let Some(entries) = snapshot.get(COMMENTS_KEY).and_then(|v| v.as_object()) {
        for (id, value) in entries {
            let parent = value.get("parentCommentId").and_then(|v| v.as_str());
            if parent == Some(comment_id) {
                doomed.push(id.clone());
            }
        }
    }

    for id in doomed {
        if let Err(e) = comments.delete(&id) {
            warn!("Failed to delete comment '{}': {}", id, e);
        }
    }
    doc.commit();
    Ok(())
}

/// Mark a comment resolved or unresolved. Un-resolving clears the resolver
/// and timestamp.
pub fn resolve_comment(
    doc: &LoroDoc,
    comment_id: &str,
    resolved: bool,
    resolved_by: Option<&str>,
) -> Result<(), String> {
    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    let entry = comment_map(&comments, comment_id)?;
    let _ = entry.insert("isResolved", resolved);
    if resolved {
        if let Some(resolver) = resolved_by {
            let _ = entry.insert("resolvedBy", resolver);
        }
        let now = now_rfc3339();
        let _ = entry.insert("resolvedAt", now.as_str());
    } else {
        if entry.get("resolvedBy").is_some() {
            let _ = entry.delete("resolvedBy");
        }
        if entry.get("resolvedAt").is_some() {
            let _ = entry.delete("resolvedAt");
        }
    }
    doc.commit();
    Ok(())
}

/// Add `user_id` to a reaction. Adding an already-present user is a no-op
/// re-write.
pub fn add_comment_reaction(
    doc: &LoroDoc,
    comment_id: &str,
    emoji: &str,
    user_id: &str,
) -> Result<(), String> {
    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    let entry = comment_map(&comments, comment_id)?;

    let mut reactions = string_field(&entry, "reactions")
        .map(|raw| parse_reactions(&raw))
        .unwrap_or_default();
    let users = reactions.entry(emoji.to_string()).or_default();
    if !users.iter().any(|u| u == user_id) {
        users.push(user_id.to_string());
    }

    let raw = serde_json::to_string(&reactions)
        .map_err(|e| format!("Failed to serialize reactions: {}", e))?;
    let _ = entry.insert("reactions", raw.as_str());
    doc.commit();
    Ok(())
}

/// Remove `user_id` from a reaction. Removing an absent user is safe; a
/// reaction left with no users disappears entirely.
pub fn remove_comment_reaction(
    doc: &LoroDoc,
    comment_id: &str,
    emoji: &str,
    user_id: &str,
) -> Result<(), String> {
    doc.set_next_commit_origin(LOCAL_ORIGIN);
    let comments = doc.get_map(COMMENTS_KEY);
    let entry = comment_map(&comments, comment_id)?;

    let mut reactions = string_field(&entry, "reactions")
        .map(|raw| parse_reactions(&raw))
        .unwrap_or_default();
    if let Some(users) = reactions.get_mut(emoji) {
        users.retain(|u| u != user_id);
        if users.is_empty() {
            reactions.remove(emoji);
        }
    }

    let raw = serde_json::to_string(&reactions)
        .map_err(|e| format!("Failed to serialize reactions: {}", e))?;
    let _ = entry.insert("reactions", raw.as_str());
    doc.commit();
    Ok(())
}

/// Unordered snapshot of the row's comment collection.
pub fn get_row_comments(doc: &LoroDoc) -> Vec<Comment> {
    let snapshot = doc.get_deep_value().to_json_value();
    let entries = match snapshot.get(COMMENTS_KEY).and_then(|v| v.as_object()) {
        Some(entries) => entries,
        None => return Vec::new(),
    };
    entries
        .iter()
        .filter_map(|(id, value)| Comment::from_snapshot(id, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn find<'a>(comments: &'a [Comment], id: &str) -> Option<&'a Comment> {
        comments.iter().find(|c| c.id == id)
    }

    #[test]
    fn add_and_read_back_a_comment() {
        let doc = LoroDoc::new();
        let id = add_comment(&doc, "First!", "u1", None, &[]).unwrap();

        let comments = get_row_comments(&doc);
        assert_eq!(comments.len(), 1);
        let comment = find(&comments, &id).unwrap();
        assert_eq!(comment.content, "First!");
        assert_eq!(comment.author_id, "u1");
        assert!(!comment.is_resolved);
        assert!(comment.parent_comment_id.is_none());
        assert!(comment.reactions.is_empty());
        assert!(comment.attachments.is_empty());
        assert!(!comment.created_at.is_empty());
    }

    #[test]
    fn delete_cascades_one_level_only() {
        let doc = LoroDoc::new();
        let parent = add_comment(&doc, "parent", "u1", None, &[]).unwrap();
        let child = add_comment(&doc, "child", "u2", Some(&parent), &[]).unwrap();
        let grandchild = add_comment(&doc, "grandchild", "u3", Some(&child), &[]).unwrap();
        let unrelated = add_comment(&doc, "unrelated", "u4", None, &[]).unwrap();

        delete_comment(&doc, &parent).unwrap();

        let comments = get_row_comments(&doc);
        assert!(find(&comments, &parent).is_none());
        assert!(find(&comments, &child).is_none());
        // Grandchildren are left in place, now orphaned.
        assert!(find(&comments, &grandchild).is_some());
        assert!(find(&comments, &unrelated).is_some());
    }

    #[test]
    fn deleting_a_missing_comment_is_an_error() {
        let doc = LoroDoc::new();
        assert!(delete_comment(&doc, "nope").is_err());
    }

    #[test]
    fn reactions_are_idempotent_both_ways() {
        let doc = LoroDoc::new();
        let id = add_comment(&doc, "hi", "u1", None, &[]).unwrap();

        add_comment_reaction(&doc, &id, "👍", "u1").unwrap();
        add_comment_reaction(&doc, &id, "👍", "u1").unwrap();
        add_comment_reaction(&doc, &id, "👍", "u2").unwrap();

        let comments = get_row_comments(&doc);
        let reactions = &find(&comments, &id).unwrap().reactions;
        assert_eq!(reactions["👍"], vec!["u1".to_string(), "u2".to_string()]);

        // Removing an absent user is safe.
        remove_comment_reaction(&doc, &id, "👍", "nobody").unwrap();
        remove_comment_reaction(&doc, &id, "🎉", "u1").unwrap();

        remove_comment_reaction(&doc, &id, "👍", "u1").unwrap();
        remove_comment_reaction(&doc, &id, "👍", "u2").unwrap();
        let comments = get_row_comments(&doc);
        // The last removal dropped the emoji key entirely.
        assert!(find(&comments, &id).unwrap().reactions.is_empty());
    }

    #[test]
    fn resolve_and_unresolve_round_trip() {
        let doc = LoroDoc::new();
        let id = add_comment(&doc, "hi", "u1", None, &[]).unwrap();

        resolve_comment(&doc, &id, true, Some("u9")).unwrap();
        let comments = get_row_comments(&doc);
        let comment = find(&comments, &id).unwrap();
        assert!(comment.is_resolved);
        assert_eq!(comment.resolved_by.as_deref(), Some("u9"));
        assert!(comment.resolved_at.is_some());

        resolve_comment(&doc, &id, false, None).unwrap();
        let comments = get_row_comments(&doc);
        let comment = find(&comments, &id).unwrap();
        assert!(!comment.is_resolved);
        assert!(comment.resolved_by.is_none());
        assert!(comment.resolved_at.is_none());
    }

    #[test]
    fn update_refreshes_content() {
        let doc = LoroDoc::new();
        let id = add_comment(&doc, "tpyo", "u1", None, &[]).unwrap();
        update_comment_content(&doc, &id, "typo").unwrap();
        let comments = get_row_comments(&doc);
        let comment = find(&comments, &id).unwrap();
        assert_eq!(comment.content, "typo");
        assert!(!comment.updated_at.is_empty());
        assert!(update_comment_content(&doc, "missing", "x").is_err());
    }

    #[test]
    fn garbage_reactions_read_as_empty() {
        let doc = LoroDoc::new();
        let id = add_comment(&doc, "hi", "u1", None, &[]).unwrap();
        // Simulate a corrupted write from an old client.
        let comments = doc.get_map(COMMENTS_KEY);
        let entry = comments
            .get_or_create_container(&id, LoroMap::new())
            .unwrap();
        let _ = entry.insert("reactions", "not json");
        doc.commit();

        let parsed = get_row_comments(&doc);
        assert!(find(&parsed, &id).unwrap().reactions.is_empty());
    }

    #[test]
    fn mutations_carry_the_local_origin_tag() {
        let doc = LoroDoc::new();
        let origins: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = origins.clone();
        let _subscription = doc.subscribe_root(Arc::new(move |event: loro::event::DiffEvent| {
            sink.lock().unwrap().push(event.origin.to_string());
        }));

        let id = add_comment(&doc, "hi", "u1", None, &[]).unwrap();
        add_comment_reaction(&doc, &id, "👍", "u1").unwrap();

        let origins = origins.lock().unwrap();
        assert!(!origins.is_empty());
        assert!(origins.iter().all(|origin| origin == LOCAL_ORIGIN));
    }
}
