//! Serialized entry points.
//!
//! Every reconciliation, for any service, holds the same [`SyncLock`] from
//! start to finish, so at most one runs at a time per lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cnwan_core::{NamespaceName, ServiceName, ServiceSnapshot};

use crate::cascade;
use crate::error::SyncError;
use crate::path::PathResolver;
use crate::registry::ServiceRegistry;
use crate::report::SyncReport;
use crate::service;

/// Shared mutual-exclusion handle. Clones guard the same section.
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    inner: Arc<Mutex<()>>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the section is free. A poisoned lock is recovered; it
    /// guards no data.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    registry: Arc<dyn ServiceRegistry>,
    paths: PathResolver,
    lock: SyncLock,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(registry: Arc<dyn ServiceRegistry>, paths: PathResolver) -> Self {
        Self::with_lock(registry, paths, SyncLock::new())
    }

    /// Use `lock` instead of a private one, e.g. to serialize several
    /// coordinators against each other.
    pub fn with_lock(registry: Arc<dyn ServiceRegistry>, paths: PathResolver, lock: SyncLock) -> Self {
        Self {
            registry,
            paths,
            lock,
        }
    }

    pub fn lock(&self) -> &SyncLock {
        &self.lock
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn create_or_update(&self, snapshot: &ServiceSnapshot) -> Result<SyncReport, SyncError> {
        let _guard = self.lock.acquire();
        tracing::debug!("create-or-update {}/{}", snapshot.namespace, snapshot.name);
        service::create_or_update(self.registry.as_ref(), &self.paths, snapshot)
    }

    pub fn delete(
        &self,
        namespace: &NamespaceName,
        service: &ServiceName,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.lock.acquire();
        tracing::debug!("delete {}/{}", namespace, service);
        cascade::delete_service(self.registry.as_ref(), &self.paths, namespace, service)
    }
}
