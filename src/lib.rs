use std::sync::Arc;

pub mod cluster;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod supervisor;
pub mod watcher;

pub use cluster::{ClusterClient, SecretPayload};
pub use config::{DeletionPolicy, ReplicationConfig, SecretSpec};
pub use error::{Error, Result};
pub use supervisor::Supervisor;

/// Connects to the cluster and mirrors every configured secret until one of
/// the watchers hits a fatal error.
pub async fn run(config: ReplicationConfig) -> Result<()> {
    let client = cluster::connect().await?;

    Supervisor::new(Arc::new(config), Arc::new(client))
        .run()
        .await
}
