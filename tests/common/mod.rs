#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::{StreamExt, channel::mpsc};
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{
    ResourceExt,
    api::{ObjectMeta, WatchEvent},
    core::ErrorResponse,
};
use secret_mirror::{ClusterClient, SecretPayload, cluster::WatchStream};

pub type RawEvent = kube::Result<WatchEvent<Secret>>;

pub type EventSender = mpsc::UnboundedSender<RawEvent>;

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{reason} from in-memory cluster"),
        reason: reason.to_owned(),
        code,
    })
}

pub fn payload(pairs: &[(&str, &str)]) -> SecretPayload {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

pub fn source_secret(name: &str, data: SecretPayload) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Secret::default()
    }
}

pub fn added(name: &str, data: SecretPayload) -> RawEvent {
    Ok(WatchEvent::Added(source_secret(name, data)))
}

pub fn modified(name: &str, data: SecretPayload) -> RawEvent {
    Ok(WatchEvent::Modified(source_secret(name, data)))
}

pub fn deleted(name: &str) -> RawEvent {
    Ok(WatchEvent::Deleted(source_secret(name, SecretPayload::new())))
}

pub fn error_event(message: &str) -> RawEvent {
    Ok(WatchEvent::Error(ErrorResponse {
        status: "Failure".to_owned(),
        message: message.to_owned(),
        reason: "InternalError".to_owned(),
        code: 500,
    }))
}

/// Secrets held in memory, with watch streams fed by the test.
#[derive(Default)]
pub struct MemoryCluster {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    feeds: Mutex<HashMap<(String, String), mpsc::UnboundedReceiver<RawEvent>>>,
    versions: AtomicU64,
    replace_conflicts: AtomicUsize,
    get_failure: Mutex<Option<u16>>,
    delete_failure: Mutex<Option<u16>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the stream returned by the next watch on `namespace/name`.
    pub fn feed(&self, namespace: &str, name: &str) -> EventSender {
        let (tx, rx) = mpsc::unbounded();
        self.feeds
            .lock()
            .unwrap()
            .insert((namespace.to_owned(), name.to_owned()), rx);
        tx
    }

    pub fn data(&self, namespace: &str, name: &str) -> Option<SecretPayload> {
        self.secret(namespace, name)
            .map(|s| s.data.unwrap_or_default())
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Stores a secret directly, as another writer would.
    pub fn insert(&self, namespace: &str, mut secret: Secret) {
        secret.metadata.namespace = Some(namespace.to_owned());
        secret.metadata.resource_version = Some(self.next_version());
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_owned(), secret.name_any()), secret);
    }

    /// Makes the next `count` replace calls fail with a conflict.
    pub fn conflict_on_replace(&self, count: usize) {
        self.replace_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn fail_gets_with(&self, code: u16) {
        *self.get_failure.lock().unwrap() = Some(code);
    }

    pub fn fail_deletes_with(&self, code: u16) {
        *self.delete_failure.lock().unwrap() = Some(code);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> kube::Result<Option<Secret>> {
        self.record(format!("get {namespace}/{name}"));
        if let Some(code) = *self.get_failure.lock().unwrap() {
            return Err(api_error(code, "InternalError"));
        }
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> kube::Result<Secret> {
        let name = secret.name_any();
        self.record(format!("create {namespace}/{name}"));

        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_owned(), name);
        if secrets.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.next_version());
        secrets.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> kube::Result<Secret> {
        self.record(format!("replace {namespace}/{name}"));

        let pending = self.replace_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.replace_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(api_error(409, "Conflict"));
        }

        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_owned(), name.to_owned());
        let current = secrets
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.next_version());
        secrets.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.record(format!("delete {namespace}/{name}"));
        if let Some(code) = *self.delete_failure.lock().unwrap() {
            return Err(api_error(code, "InternalError"));
        }

        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn watch_secret(&self, namespace: &str, name: &str) -> kube::Result<WatchStream> {
        self.record(format!("watch {namespace}/{name}"));
        self.feeds
            .lock()
            .unwrap()
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(StreamExt::boxed)
            .ok_or_else(|| api_error(403, "Forbidden"))
    }
}
