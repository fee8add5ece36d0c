//! One watch per configured secret, feeding its reconciler in delivery order.

use std::{convert::Infallible, sync::Arc};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{ResourceExt, api::WatchEvent};
use tracing::{debug, error, info};

use crate::{
    cluster::{ClusterClient, SecretPayload},
    config::{ReplicationConfig, SecretSpec},
    error::{Error, Result},
    reconciler::Reconciler,
};

/// A change to a watched source secret.
#[derive(Clone, Debug, PartialEq)]
pub enum SecretEvent {
    Added(String, SecretPayload),
    Modified(String, SecretPayload),
    Deleted(String),
    /// The stream reported a failure and will not deliver further changes
    Error(String),
}

/// Maps a raw watch item to a [`SecretEvent`]. Bookmarks carry no change and map to `None`.
pub fn classify(item: kube::Result<WatchEvent<Secret>>) -> Option<SecretEvent> {
    match item {
        Ok(WatchEvent::Added(s)) => Some(SecretEvent::Added(s.name_any(), payload(s))),
        Ok(WatchEvent::Modified(s)) => Some(SecretEvent::Modified(s.name_any(), payload(s))),
        Ok(WatchEvent::Deleted(s)) => Some(SecretEvent::Deleted(s.name_any())),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(e)) => Some(SecretEvent::Error(format!(
            "{} ({}): {}",
            e.reason, e.code, e.message
        ))),
        Err(e) => Some(SecretEvent::Error(e.to_string())),
    }
}

fn payload(secret: Secret) -> SecretPayload {
    secret.data.unwrap_or_default()
}

/// Replicates one source secret for as long as its watch stream lasts.
pub struct SecretWatcher<C> {
    spec: SecretSpec,
    config: Arc<ReplicationConfig>,
    client: Arc<C>,
    reconciler: Reconciler<C>,
}

impl<C: ClusterClient> SecretWatcher<C> {
    pub fn new(spec: SecretSpec, config: Arc<ReplicationConfig>, client: Arc<C>) -> Self {
        let reconciler = Reconciler::new(
            client.clone(),
            config.local_namespace.clone(),
            config.deletion_policy,
        );

        Self {
            spec,
            config,
            client,
            reconciler,
        }
    }

    /// Watches the source until the stream fails or ends. Both are fatal, as
    /// is any failed reconciliation, so this only ever returns an error.
    pub async fn run(self) -> Result<Infallible> {
        let namespace = &self.config.target_namespace;
        let source = &self.spec.source_name;

        let mut events = self
            .client
            .watch_secret(namespace, source)
            .await
            .map_err(|e| Error::watch(namespace, source, e.to_string()))?;

        info!(
            "Watching secret '{}' in namespace '{}', replicating to '{}' in namespace '{}'",
            source,
            namespace,
            self.spec.local_name(),
            self.config.local_namespace
        );

        while let Some(item) = events.next().await {
            match classify(item) {
                Some(event) => self.dispatch(event).await?,
                None => debug!("Bookmark received for secret '{}'", source),
            }
        }

        error!(
            "Watch on secret '{}' in namespace '{}' closed",
            source, namespace
        );
        Err(Error::watch(namespace, source, "watch stream closed"))
    }

    async fn dispatch(&self, event: SecretEvent) -> Result<()> {
        let namespace = &self.config.target_namespace;
        let local_name = self.spec.local_name();

        match event {
            SecretEvent::Added(name, payload) => {
                info!("Secret '{}' added in namespace '{}'", name, namespace);
                self.reconciler.upsert(local_name, payload).await
            }
            SecretEvent::Modified(name, payload) => {
                info!("Secret '{}' modified in namespace '{}'", name, namespace);
                self.reconciler.upsert(local_name, payload).await
            }
            SecretEvent::Deleted(name) => {
                info!("Secret '{}' deleted in namespace '{}'", name, namespace);
                self.reconciler.remove(local_name).await
            }
            SecretEvent::Error(cause) => {
                error!(
                    "Error watching secret '{}' in namespace '{}': {}",
                    self.spec.source_name, namespace, cause
                );
                Err(Error::watch(namespace, &self.spec.source_name, cause))
            }
        }
    }
}
