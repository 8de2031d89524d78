//! Desired-state types handed to the sync engine.
//!
//! A [`ServiceSnapshot`] describes one service at one point in time. It is
//! consumed read-only by a reconciliation pass. All types are
//! serializable/deserializable via serde + serde_yaml.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Key/value metadata attached to services and endpoints.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key reserved for the ownership marker.
pub const OWNER_KEY: &str = "owner";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed namespace name (leaf, not the full resource path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceName(pub String);

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for NamespaceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NamespaceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed service name (leaf, not the full resource path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed endpoint name (leaf, not the full resource path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointName(pub String);

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EndpointName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EndpointName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::borrow::Borrow<str> for EndpointName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Desired state for a single endpoint of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub name: EndpointName,
    #[serde(default)]
    pub metadata: Metadata,
    pub address: String,
    pub port: u16,
}

/// Desired state for one service and all of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: ServiceName,
    pub namespace: NamespaceName,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub endpoints: BTreeMap<EndpointName, EndpointSnapshot>,
}

impl ServiceSnapshot {
    /// Build a snapshot with no metadata and no endpoints.
    pub fn new(namespace: impl Into<NamespaceName>, name: impl Into<ServiceName>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            metadata: Metadata::new(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Insert an endpoint keyed by its own name, replacing any previous entry.
    pub fn with_endpoint(mut self, endpoint: EndpointSnapshot) -> Self {
        self.endpoints.insert(endpoint.name.clone(), endpoint);
        self
    }

    /// Reject snapshots the engine cannot address.
    ///
    /// Endpoint map keys must match the endpoint's own `name`. Names are path
    /// segments, so none may contain `/`. The [`OWNER_KEY`] metadata key is
    /// written by the engine and may not be supplied.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.0.is_empty() {
            return Err(CoreError::InvalidSnapshot("service name is empty".into()));
        }
        if self.namespace.0.is_empty() {
            return Err(CoreError::InvalidSnapshot(format!(
                "service '{}' has an empty namespace",
                self.name
            )));
        }
        check_segment("namespace", &self.namespace.0)?;
        check_segment("service", &self.name.0)?;
        check_metadata(&format!("service '{}'", self.name), &self.metadata)?;
        for (key, endpoint) in &self.endpoints {
            if key.0.is_empty() {
                return Err(CoreError::InvalidSnapshot(format!(
                    "service '{}' has an endpoint with an empty name",
                    self.name
                )));
            }
            if key != &endpoint.name {
                return Err(CoreError::InvalidSnapshot(format!(
                    "endpoint key '{}' does not match endpoint name '{}'",
                    key, endpoint.name
                )));
            }
            check_segment("endpoint", &key.0)?;
            check_metadata(&format!("endpoint '{key}'"), &endpoint.metadata)?;
        }
        Ok(())
    }
}

fn check_segment(what: &str, name: &str) -> Result<(), CoreError> {
    if name.contains('/') {
        return Err(CoreError::InvalidSnapshot(format!(
            "{what} name '{name}' contains '/'"
        )));
    }
    Ok(())
}

fn check_metadata(subject: &str, metadata: &Metadata) -> Result<(), CoreError> {
    if metadata.contains_key(OWNER_KEY) {
        return Err(CoreError::InvalidSnapshot(format!(
            "{subject} sets reserved metadata key '{OWNER_KEY}'"
        )));
    }
    Ok(())
}

impl EndpointSnapshot {
    pub fn new(name: impl Into<EndpointName>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            metadata: Metadata::new(),
            address: address.into(),
            port,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
