//! Replication settings: the key=value config file, the secret list and the
//! namespace the controller runs in.

use std::{collections::HashSet, fmt, path::Path, str::FromStr};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// Where Kubernetes mounts the pod's namespace.
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Raw settings as written in the config file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Settings {
    /// Namespace the source secrets live in
    pub namespace: String,
    /// Comma separated `name` or `name:alias` entries
    pub secret_name: String,
    #[serde(default)]
    pub deletion_policy: String,
}

impl Settings {
    /// Parses `key=value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut values = Map::new();

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::config(format!("line {}: expected key=value", idx + 1)))?;

            values.insert(key.trim().to_owned(), Value::String(value.trim().to_owned()));
        }

        serde_json::from_value(Value::Object(values)).map_err(|e| Error::config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("unable to read '{}': {}", path.display(), e)))?;

        Self::parse(&contents)
    }
}

/// What happens to a local copy once its source is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Keep the local copy as it was last replicated
    Orphan,
    /// Delete the local copy
    #[default]
    Delete,
}

impl DeletionPolicy {
    /// Only the exact value `ORPHAN` keeps copies around.
    pub fn from_setting(value: &str) -> Self {
        match value {
            "ORPHAN" => Self::Orphan,
            _ => Self::Delete,
        }
    }
}

/// A source secret and the name its copy is stored under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretSpec {
    pub source_name: String,
    pub alias: Option<String>,
}

impl SecretSpec {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            alias: None,
        }
    }

    pub fn with_alias(source_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Name of the copy in the local namespace.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.source_name)
    }
}

impl FromStr for SecretSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':').map(str::trim);
        let source = parts.next().unwrap_or_default();
        let alias = parts.next();

        if parts.next().is_some() {
            return Err(Error::config(format!(
                "secret entry '{s}' has more than one ':'"
            )));
        }
        if source.is_empty() {
            return Err(Error::config(format!("secret entry '{s}' has no name")));
        }

        match alias {
            None => Ok(Self::new(source)),
            Some("") => Err(Error::config(format!("secret entry '{s}' has an empty alias"))),
            Some(alias) => Ok(Self::with_alias(source, alias)),
        }
    }
}

impl fmt::Display for SecretSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}:{}", self.source_name, alias),
            None => f.write_str(&self.source_name),
        }
    }
}

/// Parses the comma separated secret list.
///
/// Blank entries are skipped and a source listed twice is only watched once.
/// Two sources may not share a local name.
pub fn parse_secret_specs(raw: &str) -> Result<Vec<SecretSpec>> {
    let mut specs: Vec<SecretSpec> = Vec::new();
    let mut local_names = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let spec: SecretSpec = entry.parse()?;

        if let Some(kept) = specs.iter().find(|s| s.source_name == spec.source_name) {
            warn!(
                "Secret '{}' is listed more than once, ignoring '{}' and keeping '{}'",
                spec.source_name, spec, kept
            );
            continue;
        }

        if !local_names.insert(spec.local_name().to_owned()) {
            return Err(Error::config(format!(
                "more than one secret is replicated to local name '{}'",
                spec.local_name()
            )));
        }

        specs.push(spec);
    }

    if specs.is_empty() {
        return Err(Error::config("no secrets configured in secret_name"));
    }

    Ok(specs)
}

/// Reads and trims the controller's namespace.
pub fn read_local_namespace(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let namespace = std::fs::read_to_string(path).map_err(|e| Error::Identity {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;

    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(Error::Identity {
            path: path.to_owned(),
            reason: "file is empty".to_owned(),
        });
    }

    Ok(namespace.to_owned())
}

/// Everything the watchers need, resolved once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicationConfig {
    /// Namespace the source secrets are read from
    pub target_namespace: String,
    /// Namespace the copies are written to
    pub local_namespace: String,
    pub deletion_policy: DeletionPolicy,
    pub specs: Vec<SecretSpec>,
}

impl ReplicationConfig {
    pub fn new(settings: &Settings, local_namespace: impl Into<String>) -> Result<Self> {
        if settings.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }

        Ok(Self {
            target_namespace: settings.namespace.clone(),
            local_namespace: local_namespace.into(),
            deletion_policy: DeletionPolicy::from_setting(&settings.deletion_policy),
            specs: parse_secret_specs(&settings.secret_name)?,
        })
    }

    pub fn load(config_path: impl AsRef<Path>, namespace_path: impl AsRef<Path>) -> Result<Self> {
        let settings = Settings::from_file(config_path)?;
        let local_namespace = read_local_namespace(namespace_path)?;

        Self::new(&settings, local_namespace)
    }
}
