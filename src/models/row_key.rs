use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

/// Composite identifier for a database row.
///
/// The canonical string form `"{database_id}/{row_id}"` is used as the
/// shared-document key and as the seed cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowKey {
    pub database_id: Uuid,
    pub row_id: Uuid,
}

impl RowKey {
    pub fn new(database_id: Uuid, row_id: Uuid) -> Self {
        Self { database_id, row_id }
    }

    /// The shared-document key for this row.
    pub fn doc_key(&self) -> String {
        format!("{}/{}", self.database_id, self.row_id)
    }

    /// Parse a key back from its canonical string form.
    pub fn parse(key: &str) -> Result<Self, String> {
        // Expected format: "database_uuid/row_uuid"
        let (db_part, row_part) = match key.split_once('/') {
            Some(parts) => parts,
            None => {
                error!("Wrong formatted row key '{}'", key);
                return Err(format!("Wrong formatted row key '{}'", key));
            }
        };
        let database_id = Uuid::parse_str(db_part).map_err(|e| {
            error!("Invalid database UUID '{}': {}", db_part, e);
            format!("Invalid database UUID: {}", e)
        })?;
        let row_id = Uuid::parse_str(row_part).map_err(|e| {
            error!("Invalid row UUID '{}': {}", row_part, e);
            format!("Invalid row UUID: {}", e)
        })?;
        Ok(Self { database_id, row_id })
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.doc_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_key_parses_back() {
        let key = RowKey::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(RowKey::parse(&key.doc_key()).unwrap(), key);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(RowKey::parse("no-separator").is_err());
        assert!(RowKey::parse("not-a-uuid/also-not").is_err());
    }
}
