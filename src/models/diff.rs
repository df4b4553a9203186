use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use super::rid::Rid;

/// Whether the server had a diff ready for the presented watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffStatus {
    Ready,
    NotReady,
}

/// Encoded CRDT update bytes plus the encoder version they were produced with.
/// The byte stream is opaque at this layer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocState {
    #[serde_as(as = "Base64")]
    pub bytes: Vec<u8>,
    pub encoder_version: i32,
}

/// Payload for a row's sub-document (e.g. its rich-text body), keyed by its
/// own 16-byte identifier rather than by the row key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubDocumentState {
    #[serde_as(as = "Base64")]
    pub document_id: Vec<u8>,
    #[serde(default)]
    pub doc_state: Option<DocState>,
    #[serde(default)]
    pub deleted: bool,
}

/// One create/update/delete in a diff response.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub rid: Rid,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default)]
    pub row_id: Option<Vec<u8>>,
    #[serde(default)]
    pub doc_state: Option<DocState>,
    #[serde(default)]
    pub document: Option<SubDocumentState>,
}

impl DiffEntry {
    pub fn has_row_payload(&self) -> bool {
        self.row_id.is_some() && self.doc_state.is_some()
    }

    pub fn has_sub_document_payload(&self) -> bool {
        self.document
            .as_ref()
            .is_some_and(|d| !d.deleted && d.doc_state.is_some())
    }
}

/// Everything the server knows that is strictly newer than the presented
/// watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub status: DiffStatus,
    #[serde(default)]
    pub retry_after_seconds: Option<u32>,
    #[serde(default)]
    pub creates: Vec<DiffEntry>,
    #[serde(default)]
    pub updates: Vec<DiffEntry>,
    #[serde(default)]
    pub deletes: Vec<DiffEntry>,
}

impl DiffResponse {
    pub fn not_ready(retry_after_seconds: Option<u32>) -> Self {
        Self {
            status: DiffStatus::NotReady,
            retry_after_seconds,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Highest watermark observed across creates, updates and deletes.
    /// Deletes count here even though they are never applied as document
    /// mutations.
    pub fn max_rid(&self) -> Option<Rid> {
        self.creates
            .iter()
            .chain(self.updates.iter())
            .chain(self.deletes.iter())
            .map(|e| e.rid)
            .max()
    }

    /// One-line summary for the per-attempt diff log.
    pub fn summary(&self) -> String {
        let row_payloads = self
            .creates
            .iter()
            .chain(self.updates.iter())
            .filter(|e| e.has_row_payload())
            .count();
        let sub_doc_payloads = self
            .creates
            .iter()
            .chain(self.updates.iter())
            .filter(|e| e.has_sub_document_payload())
            .count();
        format!(
            "creates={} updates={} deletes={} row_payloads={} sub_doc_payloads={}",
            self.creates.len(),
            self.updates.len(),
            self.deletes.len(),
            row_payloads,
            sub_doc_payloads
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rid: Rid) -> DiffEntry {
        DiffEntry {
            rid,
            row_id: None,
            doc_state: None,
            document: None,
        }
    }

    #[test]
    fn max_rid_spans_creates_updates_and_deletes() {
        let diff = DiffResponse {
            status: DiffStatus::Ready,
            retry_after_seconds: None,
            creates: vec![entry(Rid::new(5, 0))],
            updates: vec![entry(Rid::new(7, 2))],
            deletes: vec![entry(Rid::new(3, 9))],
        };
        assert_eq!(diff.max_rid(), Some(Rid::new(7, 2)));
    }

    #[test]
    fn max_rid_of_empty_diff_is_none() {
        assert_eq!(DiffResponse::not_ready(Some(5)).max_rid(), None);
    }

    #[test]
    fn payload_bytes_ride_as_base64() {
        let state = DocState {
            bytes: vec![0, 1, 2, 255],
            encoder_version: 2,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["bytes"].is_string());
        let back: DocState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
