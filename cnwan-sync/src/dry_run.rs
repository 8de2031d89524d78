//! Registry wrapper that reads for real and only pretends to write.
//!
//! Creates and updates echo the requested resource back, deletes succeed
//! without doing anything. Paths "deleted" during the run are hidden from
//! later reads and listings, so a cascade reports what it would remove.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use crate::error::RegistryError;
use crate::registry::{Endpoint, Listing, Namespace, Service, ServiceRegistry};

#[derive(Debug)]
pub struct DryRun<R> {
    inner: R,
    removed: Mutex<BTreeSet<String>>,
}

impl<R: ServiceRegistry> DryRun<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            removed: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn remove(&self, path: &str) {
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
    }

    fn is_removed(&self, path: &str) -> bool {
        let removed = self.removed.lock().unwrap_or_else(PoisonError::into_inner);
        removed.iter().any(|gone| {
            path == gone
                || path
                    .strip_prefix(gone.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn hide_removed<T>(&self, found: Option<T>, path: &str) -> Option<T> {
        if self.is_removed(path) {
            None
        } else {
            found
        }
    }
}

impl<R: ServiceRegistry> ServiceRegistry for DryRun<R> {
    fn get_namespace(&self, path: &str) -> Result<Option<Namespace>, RegistryError> {
        Ok(self.hide_removed(self.inner.get_namespace(path)?, path))
    }

    fn get_service(&self, path: &str) -> Result<Option<Service>, RegistryError> {
        Ok(self.hide_removed(self.inner.get_service(path)?, path))
    }

    fn get_endpoint(&self, path: &str) -> Result<Option<Endpoint>, RegistryError> {
        Ok(self.hide_removed(self.inner.get_endpoint(path)?, path))
    }

    fn create_namespace(
        &self,
        parent: &str,
        id: &str,
        mut namespace: Namespace,
    ) -> Result<Namespace, RegistryError> {
        namespace.name = format!("{parent}/namespaces/{id}");
        tracing::info!("[dry-run] would create namespace {}", namespace.name);
        Ok(namespace)
    }

    fn create_service(
        &self,
        parent: &str,
        id: &str,
        mut service: Service,
    ) -> Result<Service, RegistryError> {
        service.name = format!("{parent}/services/{id}");
        tracing::info!("[dry-run] would create service {}", service.name);
        Ok(service)
    }

    fn create_endpoint(
        &self,
        parent: &str,
        id: &str,
        mut endpoint: Endpoint,
    ) -> Result<Endpoint, RegistryError> {
        endpoint.name = format!("{parent}/endpoints/{id}");
        tracing::info!(
            "[dry-run] would create endpoint {} at {}:{}",
            endpoint.name,
            endpoint.address,
            endpoint.port
        );
        Ok(endpoint)
    }

    fn update_service(&self, service: Service, mask: &[&str]) -> Result<Service, RegistryError> {
        tracing::info!("[dry-run] would update {} of service {}", mask.join(","), service.name);
        Ok(service)
    }

    fn update_endpoint(&self, endpoint: Endpoint, mask: &[&str]) -> Result<Endpoint, RegistryError> {
        tracing::info!("[dry-run] would update {} of endpoint {}", mask.join(","), endpoint.name);
        Ok(endpoint)
    }

    fn delete_namespace(&self, path: &str) -> Result<(), RegistryError> {
        tracing::info!("[dry-run] would delete namespace {}", path);
        self.remove(path);
        Ok(())
    }

    fn delete_service(&self, path: &str) -> Result<(), RegistryError> {
        tracing::info!("[dry-run] would delete service {}", path);
        self.remove(path);
        Ok(())
    }

    fn delete_endpoint(&self, path: &str) -> Result<(), RegistryError> {
        tracing::info!("[dry-run] would delete endpoint {}", path);
        self.remove(path);
        Ok(())
    }

    fn list_endpoints(&self, parent: &str) -> Listing<'_, Endpoint> {
        if self.is_removed(parent) {
            return Listing::empty();
        }
        self.inner
            .list_endpoints(parent)
            .retain(move |e| !self.is_removed(&e.name))
    }

    fn list_services(&self, parent: &str) -> Listing<'_, Service> {
        if self.is_removed(parent) {
            return Listing::empty();
        }
        self.inner
            .list_services(parent)
            .retain(move |s| !self.is_removed(&s.name))
    }
}
