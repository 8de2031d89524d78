//! Per-call outcome report.
//!
//! Every change the engine attempted is recorded, including per-child
//! failures that did not fail the call.

use std::fmt;

use serde::Serialize;

use cnwan_core::{NamespaceName, ServiceName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Namespace,
    Service,
    Endpoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::Service => write!(f, "service"),
            ResourceKind::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    /// Kept because it still has children.
    Kept { reason: String },
    /// Left alone because it lacks the ownership marker.
    SkippedForeign,
    /// Left alone because a foreign child prevents removal.
    Blocked { by: String },
    /// A just-created resource removed again after a later step failed.
    RolledBack,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub kind: ResourceKind,
    pub path: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub namespace: NamespaceName,
    pub service: ServiceName,
    pub changes: Vec<Change>,
}

impl SyncReport {
    pub fn new(namespace: &NamespaceName, service: &ServiceName) -> Self {
        Self {
            namespace: namespace.clone(),
            service: service.clone(),
            changes: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, kind: ResourceKind, path: impl Into<String>, outcome: Outcome) {
        self.changes.push(Change {
            kind,
            path: path.into(),
            outcome,
        });
    }

    /// Number of changes of `kind` matching `pred`.
    pub fn count(&self, kind: ResourceKind, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.changes
            .iter()
            .filter(|c| c.kind == kind && pred(&c.outcome))
            .count()
    }

    /// Changes that mutated the registry.
    pub fn mutations(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| {
                matches!(
                    c.outcome,
                    Outcome::Created | Outcome::Updated | Outcome::Deleted | Outcome::RolledBack
                )
            })
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Change> {
        self.changes
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Failed { .. }))
    }

    /// Outcome recorded for `path`, if any. The last entry wins.
    pub fn outcome_of(&self, path: &str) -> Option<&Outcome> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.path == path)
            .map(|c| &c.outcome)
    }
}
