//! Error types for secret replication

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way the controller can fail. All of them are fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The controller's own namespace could not be determined
    #[error("unable to read namespace from '{}': {reason}", path.display())]
    Identity { path: PathBuf, reason: String },

    /// No usable client for the cluster API
    #[error("unable to build cluster client: {0}")]
    ClientInit(String),

    /// The watch on a source secret could not be opened or stopped delivering events
    #[error("watch on secret '{name}' in namespace '{namespace}' failed: {reason}")]
    Watch {
        namespace: String,
        name: String,
        reason: String,
    },

    /// A cluster call made while replicating a secret failed
    #[error("failed to {action} secret '{name}' in namespace '{namespace}': {source}")]
    Reconcile {
        action: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A watcher task panicked or was cancelled
    #[error("watcher task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn watch(namespace: &str, name: &str, reason: impl Into<String>) -> Self {
        Self::Watch {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn reconcile(action: &'static str, namespace: &str, name: &str, source: kube::Error) -> Self {
        Self::Reconcile {
            action,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            source,
        }
    }
}
