use std::sync::Arc;

use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use crate::models::{DiffResponse, Rid};
use crate::services::diff_service::FetchDiffFn;

/// HTTP client for the sync service's blob diff RPC.
pub struct SyncServiceClient {
    client: Client,
    base_url: String,
}

impl SyncServiceClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    /// Ask the server for everything strictly newer than `max_known_rid`.
    pub async fn fetch_diff(
        &self,
        workspace_id: &str,
        database_id: &Uuid,
        max_known_rid: Option<Rid>,
        version: u32,
    ) -> Result<DiffResponse, reqwest::Error> {
        let url = format!(
            "{}/workspaces/{}/databases/{}/blob-diff",
            self.base_url, workspace_id, database_id
        );
        debug!("Requesting blob diff from {} (watermark: {:?})", url, max_known_rid);
        let body = serde_json::json!({
            "maxKnownRid": max_known_rid,
            "version": version,
        });
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Adapt this client into the fetch callback the diff service consumes.
    pub fn fetch_fn(self: Arc<Self>) -> FetchDiffFn {
        Arc::new(move |workspace_id, database_id, max_known_rid, version| {
            let client = self.clone();
            Box::pin(async move {
                client
                    .fetch_diff(&workspace_id, &database_id, max_known_rid, version)
                    .await
                    .map_err(|e| format!("Diff request failed: {}", e))
            })
        })
    }
}
