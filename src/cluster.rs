//! Access to `Secret`s in the cluster.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, PostParams, WatchEvent, WatchParams},
    config::KubeConfigOptions,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Contents of a secret's `data` field.
pub type SecretPayload = BTreeMap<String, ByteString>;

/// Raw watch events for a single secret, in delivery order.
pub type WatchStream = BoxStream<'static, kube::Result<WatchEvent<Secret>>>;

/// Namespaced secret operations the replication engine needs.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// `Ok(None)` only when the secret is confirmed absent.
    async fn get_secret(&self, namespace: &str, name: &str) -> kube::Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> kube::Result<Secret>;

    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret)
    -> kube::Result<Secret>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> kube::Result<()>;

    /// Watches the one secret whose `metadata.name` equals `name`.
    async fn watch_secret(&self, namespace: &str, name: &str) -> kube::Result<WatchStream>;
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// Builds a client from the local kubeconfig, falling back to the in-cluster config.
pub async fn connect() -> Result<Client> {
    let options = KubeConfigOptions::default();

    let config = match kube::Config::from_kubeconfig(&options).await {
        Ok(config) => config,
        Err(kubeconfig_err) => kube::Config::incluster().map_err(|e| {
            Error::ClientInit(format!(
                "no kubeconfig ({kubeconfig_err}) and no in-cluster config ({e})"
            ))
        })?,
    };

    Client::try_from(config).map_err(|e| Error::ClientInit(e.to_string()))
}

#[async_trait]
impl ClusterClient for Client {
    async fn get_secret(&self, namespace: &str, name: &str) -> kube::Result<Option<Secret>> {
        Api::<Secret>::namespaced(self.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> kube::Result<Secret> {
        Api::<Secret>::namespaced(self.clone(), namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> kube::Result<Secret> {
        Api::<Secret>::namespaced(self.clone(), namespace)
            .replace(name, &PostParams::default(), secret)
            .await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> kube::Result<()> {
        Api::<Secret>::namespaced(self.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn watch_secret(&self, namespace: &str, name: &str) -> kube::Result<WatchStream> {
        let api = Api::<Secret>::namespaced(self.clone(), namespace);
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));

        let first = api.watch(&params, "0").await?.boxed();

        Ok(resuming_watch(api, params, first, MIN_WATCH_WINDOW))
    }
}

/// A window closing sooner than this means the server is not serving the
/// watch. Its normal timeout is several minutes.
const MIN_WATCH_WINDOW: Duration = Duration::from_secs(30);

struct WatchWindow {
    api: Api<Secret>,
    params: WatchParams,
    resource_version: String,
    events: Option<WatchStream>,
    opened: Instant,
    min_lifetime: Duration,
}

/// The API server ends every watch request after a bounded time. This keeps
/// the stream going by re-issuing the request from the last seen
/// `resourceVersion` whenever a window ends. A window that ends before
/// `min_lifetime` ends the stream instead. Error events and failed requests
/// are passed through untouched.
fn resuming_watch(
    api: Api<Secret>,
    params: WatchParams,
    first: WatchStream,
    min_lifetime: Duration,
) -> WatchStream {
    let window = WatchWindow {
        api,
        params,
        resource_version: "0".to_owned(),
        events: Some(first),
        opened: Instant::now(),
        min_lifetime,
    };

    stream::unfold(window, |mut window| async move {
        loop {
            if let Some(events) = window.events.as_mut() {
                match events.next().await {
                    Some(item) => {
                        if let Ok(event) = &item {
                            if let Some(version) = resource_version(event) {
                                window.resource_version = version;
                            }
                        }
                        return Some((item, window));
                    }
                    None => {
                        let lifetime = window.opened.elapsed();
                        if lifetime < window.min_lifetime {
                            warn!(
                                "Watch window closed after {:?}, not resuming",
                                lifetime
                            );
                            return None;
                        }

                        debug!(
                            "Watch window closed, resuming from resourceVersion {}",
                            window.resource_version
                        );
                        window.events = None;
                    }
                }
            }

            match window
                .api
                .watch(&window.params, &window.resource_version)
                .await
            {
                Ok(events) => {
                    window.events = Some(events.boxed());
                    window.opened = Instant::now();
                }
                Err(e) => return Some((Err(e), window)),
            }
        }
    })
    .boxed()
}

fn resource_version(event: &WatchEvent<Secret>) -> Option<String> {
    match event {
        WatchEvent::Added(s) | WatchEvent::Modified(s) | WatchEvent::Deleted(s) => {
            s.resource_version()
        }
        WatchEvent::Bookmark(b) => Some(b.metadata.resource_version.clone()),
        WatchEvent::Error(_) => None,
    }
}
