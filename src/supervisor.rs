use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::{
    cluster::ClusterClient,
    config::ReplicationConfig,
    error::{Error, Result},
    watcher::SecretWatcher,
};

/// Runs one [`SecretWatcher`] per configured secret.
pub struct Supervisor<C> {
    config: Arc<ReplicationConfig>,
    client: Arc<C>,
}

impl<C: ClusterClient> Supervisor<C> {
    pub fn new(config: Arc<ReplicationConfig>, client: Arc<C>) -> Self {
        Self { config, client }
    }

    /// Starts every watcher and waits for them. Watchers only stop on a
    /// fatal error, and the first one cancels all the others.
    pub async fn run(self) -> Result<()> {
        let secrets: Vec<String> = self.config.specs.iter().map(ToString::to_string).collect();
        info!(
            "Replicating secrets {:?} from namespace '{}' to namespace '{}'",
            secrets, self.config.target_namespace, self.config.local_namespace
        );

        let mut watchers = JoinSet::new();
        for spec in self.config.specs.iter().cloned() {
            let watcher = SecretWatcher::new(spec, self.config.clone(), self.client.clone());
            watchers.spawn(watcher.run());
        }

        if let Some(finished) = watchers.join_next().await {
            let err = match finished {
                Ok(Ok(never)) => match never {},
                Ok(Err(e)) => e,
                Err(e) => Error::from(e),
            };

            error!("Stopping all watchers: {}", err);
            watchers.shutdown().await;
            return Err(err);
        }

        Ok(())
    }
}
