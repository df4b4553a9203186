use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Protocol version stamped on every published awareness record.
pub const AWARENESS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUser {
    pub uid: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessMetadata {
    pub user_name: String,
    pub cursor_color: String,
    pub selection_color: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Ephemeral per-connection presence record. Overwritten wholesale on every
/// publish; never persisted. Consumers distinguish "present with no cursor"
/// from "absent" by the presence of `metadata`/`selection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessState {
    pub version: u32,
    pub timestamp: i64,
    pub user: AwarenessUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AwarenessMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<serde_json::Value>,
}

impl AwarenessState {
    pub fn present(
        user: AwarenessUser,
        metadata: AwarenessMetadata,
        selection: Option<serde_json::Value>,
    ) -> Self {
        Self {
            version: AWARENESS_VERSION,
            timestamp: Utc::now().timestamp_millis(),
            user,
            metadata: Some(metadata),
            selection,
        }
    }

    /// Minimal user-only record signaling departure without removing the
    /// record at the transport level.
    pub fn departed(user: AwarenessUser) -> Self {
        Self {
            version: AWARENESS_VERSION,
            timestamp: Utc::now().timestamp_millis(),
            user,
            metadata: None,
            selection: None,
        }
    }
}
