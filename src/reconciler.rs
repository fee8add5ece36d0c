use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tokio_retry2::{
    Retry, RetryError,
    strategy::{ExponentialBackoff, jitter},
};
use tracing::{debug, info, warn};

use crate::{
    cluster::{ClusterClient, SecretPayload, is_conflict, is_not_found},
    config::DeletionPolicy,
    error::{Error, Result},
};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "secret-mirror";

/// Retries left after a write loses a race with another writer. Waits are
/// 10, 20, 40 and 80ms before jitter, so at most 150ms in total.
const CONFLICT_RETRIES: usize = 4;

/// Writes changes from a source secret to its copy in the local namespace.
pub struct Reconciler<C> {
    client: Arc<C>,
    namespace: String,
    policy: DeletionPolicy,
}

impl<C: ClusterClient> Reconciler<C> {
    pub fn new(client: Arc<C>, namespace: impl Into<String>, policy: DeletionPolicy) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            policy,
        }
    }

    /// Creates or replaces the local copy so its data equals `payload` exactly.
    ///
    /// Replace carries the `resourceVersion` that was read, so a concurrent
    /// writer makes it fail with a conflict and the read-modify-write starts over.
    pub async fn upsert(&self, name: &str, payload: SecretPayload) -> Result<()> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(5)
            .map(jitter)
            .take(CONFLICT_RETRIES);

        Retry::spawn(strategy, || self.try_upsert(name, &payload)).await
    }

    async fn try_upsert(&self, name: &str, payload: &SecretPayload) -> Result<(), RetryError<Error>> {
        let ns = self.namespace.as_str();

        let existing = self
            .client
            .get_secret(ns, name)
            .await
            .map_err(|e| RetryError::permanent(Error::reconcile("get", ns, name, e)))?;

        let (action, result) = match existing {
            Some(mut secret) => {
                secret.data = Some(payload.clone());
                secret.string_data = None;
                ("update", self.client.replace_secret(ns, name, &secret).await)
            }
            None => {
                let secret = self.new_secret(name, payload);
                ("create", self.client.create_secret(ns, &secret).await)
            }
        };

        match result {
            Ok(_) => {
                info!("Secret '{}' {}d in namespace '{}'", name, action, ns);
                Ok(())
            }
            Err(e) if is_conflict(&e) => {
                warn!(
                    "Conflict trying to {} secret '{}' in namespace '{}', retrying",
                    action, name, ns
                );
                Err(RetryError::transient(Error::reconcile(action, ns, name, e)))
            }
            Err(e) => Err(RetryError::permanent(Error::reconcile(action, ns, name, e))),
        }
    }

    fn new_secret(&self, name: &str, payload: &SecretPayload) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_owned(),
                    MANAGER.to_owned(),
                )])),
                ..ObjectMeta::default()
            },
            data: Some(payload.clone()),
            ..Secret::default()
        }
    }

    /// Handles deletion of the source according to the deletion policy.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let ns = self.namespace.as_str();

        if self.policy == DeletionPolicy::Orphan {
            info!("Orphaning secret '{}' in namespace '{}'", name, ns);
            return Ok(());
        }

        match self.client.delete_secret(ns, name).await {
            Ok(()) => {
                info!("Deleted secret '{}' in namespace '{}'", name, ns);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!("Secret '{}' already absent from namespace '{}'", name, ns);
                Ok(())
            }
            Err(e) => Err(Error::reconcile("delete", ns, name, e)),
        }
    }
}
