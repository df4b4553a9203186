pub mod sync_service_client;

pub use sync_service_client::SyncServiceClient;
