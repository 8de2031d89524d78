//! In-process registry with a call log and fault injection.
//!
//! Behaves like the remote registry closely enough for the engine: creates
//! need an existing parent and a free id, deletes cascade to children,
//! listings are paginated. Every call is appended to an ordered log so
//! tests can assert exactly which remote calls a reconciliation issued.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cnwan_core::Metadata;

use crate::error::RegistryError;
use crate::registry::{Endpoint, Listing, Namespace, Page, Service, ServiceRegistry};
use crate::report::ResourceKind;

/// One recorded registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(ResourceKind, String),
    /// Full path of the resource and the metadata (labels) sent.
    Create(ResourceKind, String, Metadata),
    Update(ResourceKind, String, Metadata),
    Delete(ResourceKind, String),
    /// One entry per page fetched, with the parent path.
    List(ResourceKind, String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Create(..) | Call::Update(..) | Call::Delete(..))
    }
}

#[derive(Debug, Default)]
struct Faults {
    creates_of: BTreeSet<ResourceKind>,
    paths: BTreeSet<String>,
    listing_after: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<String, Service>,
    endpoints: BTreeMap<String, Endpoint>,
    calls: Vec<Call>,
    faults: Faults,
}

#[derive(Debug)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn injected() -> RegistryError {
    RegistryError::Remote {
        status: 500,
        message: "injected failure".to_string(),
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 2,
        }
    }

    /// Items per listing page (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding ------------------------------------------------------------

    pub fn seed_namespace(&self, path: &str, labels: Metadata) {
        self.state().namespaces.insert(
            path.to_string(),
            Namespace {
                name: path.to_string(),
                labels,
            },
        );
    }

    pub fn seed_service(&self, path: &str, metadata: Metadata) {
        self.state().services.insert(
            path.to_string(),
            Service {
                name: path.to_string(),
                metadata,
            },
        );
    }

    pub fn seed_endpoint(&self, path: &str, address: &str, port: u16, metadata: Metadata) {
        self.state().endpoints.insert(
            path.to_string(),
            Endpoint {
                name: path.to_string(),
                address: address.to_string(),
                port,
                metadata,
            },
        );
    }

    // -- fault injection ------------------------------------------------------

    /// Every create of `kind` fails.
    pub fn fail_creates_of(&self, kind: ResourceKind) {
        self.state().faults.creates_of.insert(kind);
    }

    /// Every update or delete of exactly `path` fails.
    pub fn fail_path(&self, path: &str) {
        self.state().faults.paths.insert(path.to_string());
    }

    /// Listings under `parent` fail once `items` entries were served.
    pub fn fail_listing_after(&self, parent: &str, items: usize) {
        self.state()
            .faults
            .listing_after
            .insert(parent.to_string(), items);
    }

    // -- inspection -------------------------------------------------------------

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn namespace(&self, path: &str) -> Option<Namespace> {
        self.state().namespaces.get(path).cloned()
    }

    pub fn service(&self, path: &str) -> Option<Service> {
        self.state().services.get(path).cloned()
    }

    pub fn endpoint(&self, path: &str) -> Option<Endpoint> {
        self.state().endpoints.get(path).cloned()
    }

    // -- shared mechanics -------------------------------------------------------

    fn check_create(state: &State, kind: ResourceKind) -> Result<(), RegistryError> {
        if state.faults.creates_of.contains(&kind) {
            return Err(injected());
        }
        Ok(())
    }

    fn check_path(state: &State, path: &str) -> Result<(), RegistryError> {
        if state.faults.paths.contains(path) {
            return Err(injected());
        }
        Ok(())
    }

    /// One page of direct children. The page token is the path of the last
    /// item served, so deletions between pages never shift the cursor.
    fn page<T>(
        &self,
        kind: ResourceKind,
        parent: &str,
        token: Option<&str>,
        served: &mut usize,
        select: impl Fn(&State, Option<&str>) -> Vec<(String, T)>,
    ) -> Result<Page<T>, RegistryError> {
        let mut state = self.state();
        if token.is_none() {
            state.calls.push(Call::List(kind, parent.to_string()));
        }
        let limit = state.faults.listing_after.get(parent).copied();
        if limit.is_some_and(|limit| *served >= limit) {
            return Err(RegistryError::Transport("injected listing failure".to_string()));
        }

        let mut take = self.page_size;
        if let Some(limit) = limit {
            take = take.min(limit - *served);
        }
        let mut rest = select(&*state, token).into_iter();
        let page: Vec<(String, T)> = rest.by_ref().take(take).collect();
        let more = rest.next().is_some() || limit.is_some();

        *served += page.len();
        let next_page_token = if more {
            page.last().map(|(key, _)| key.clone())
        } else {
            None
        };
        Ok(Page {
            items: page.into_iter().map(|(_, item)| item).collect(),
            next_page_token,
        })
    }
}

fn direct_children<V: Clone>(
    map: &BTreeMap<String, V>,
    parent: &str,
    collection: &str,
    after: Option<&str>,
) -> Vec<(String, V)> {
    let prefix = format!("{parent}/{collection}/");
    map.range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter(|(k, _)| !k[prefix.len()..].contains('/'))
        .filter(|(k, _)| after.map_or(true, |after| k.as_str() > after))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl ServiceRegistry for MemoryRegistry {
    fn get_namespace(&self, path: &str) -> Result<Option<Namespace>, RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Get(ResourceKind::Namespace, path.to_string()));
        Ok(state.namespaces.get(path).cloned())
    }

    fn get_service(&self, path: &str) -> Result<Option<Service>, RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Get(ResourceKind::Service, path.to_string()));
        Ok(state.services.get(path).cloned())
    }

    fn get_endpoint(&self, path: &str) -> Result<Option<Endpoint>, RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Get(ResourceKind::Endpoint, path.to_string()));
        Ok(state.endpoints.get(path).cloned())
    }

    fn create_namespace(
        &self,
        parent: &str,
        id: &str,
        mut namespace: Namespace,
    ) -> Result<Namespace, RegistryError> {
        let path = format!("{parent}/namespaces/{id}");
        let mut state = self.state();
        state.calls.push(Call::Create(
            ResourceKind::Namespace,
            path.clone(),
            namespace.labels.clone(),
        ));
        Self::check_create(&state, ResourceKind::Namespace)?;
        if state.namespaces.contains_key(&path) {
            return Err(RegistryError::AlreadyExists { path });
        }
        namespace.name = path.clone();
        state.namespaces.insert(path, namespace.clone());
        Ok(namespace)
    }

    fn create_service(
        &self,
        parent: &str,
        id: &str,
        mut service: Service,
    ) -> Result<Service, RegistryError> {
        let path = format!("{parent}/services/{id}");
        let mut state = self.state();
        state.calls.push(Call::Create(
            ResourceKind::Service,
            path.clone(),
            service.metadata.clone(),
        ));
        Self::check_create(&state, ResourceKind::Service)?;
        if !state.namespaces.contains_key(parent) {
            return Err(RegistryError::NotFound {
                path: parent.to_string(),
            });
        }
        if state.services.contains_key(&path) {
            return Err(RegistryError::AlreadyExists { path });
        }
        service.name = path.clone();
        state.services.insert(path, service.clone());
        Ok(service)
    }

    fn create_endpoint(
        &self,
        parent: &str,
        id: &str,
        mut endpoint: Endpoint,
    ) -> Result<Endpoint, RegistryError> {
        let path = format!("{parent}/endpoints/{id}");
        let mut state = self.state();
        state.calls.push(Call::Create(
            ResourceKind::Endpoint,
            path.clone(),
            endpoint.metadata.clone(),
        ));
        Self::check_create(&state, ResourceKind::Endpoint)?;
        if !state.services.contains_key(parent) {
            return Err(RegistryError::NotFound {
                path: parent.to_string(),
            });
        }
        if state.endpoints.contains_key(&path) {
            return Err(RegistryError::AlreadyExists { path });
        }
        endpoint.name = path.clone();
        state.endpoints.insert(path, endpoint.clone());
        Ok(endpoint)
    }

    fn update_service(&self, service: Service, mask: &[&str]) -> Result<Service, RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Update(
            ResourceKind::Service,
            service.name.clone(),
            service.metadata.clone(),
        ));
        Self::check_path(&state, &service.name)?;
        let stored = state
            .services
            .get_mut(&service.name)
            .ok_or_else(|| RegistryError::NotFound {
                path: service.name.clone(),
            })?;
        if mask.contains(&"metadata") {
            stored.metadata = service.metadata;
        }
        Ok(stored.clone())
    }

    fn update_endpoint(&self, endpoint: Endpoint, mask: &[&str]) -> Result<Endpoint, RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Update(
            ResourceKind::Endpoint,
            endpoint.name.clone(),
            endpoint.metadata.clone(),
        ));
        Self::check_path(&state, &endpoint.name)?;
        let stored = state
            .endpoints
            .get_mut(&endpoint.name)
            .ok_or_else(|| RegistryError::NotFound {
                path: endpoint.name.clone(),
            })?;
        if mask.contains(&"metadata") {
            stored.metadata = endpoint.metadata;
        }
        Ok(stored.clone())
    }

    fn delete_namespace(&self, path: &str) -> Result<(), RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(ResourceKind::Namespace, path.to_string()));
        Self::check_path(&state, path)?;
        if state.namespaces.remove(path).is_none() {
            return Err(RegistryError::NotFound {
                path: path.to_string(),
            });
        }
        let prefix = format!("{path}/");
        state.services.retain(|k, _| !k.starts_with(&prefix));
        state.endpoints.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    fn delete_service(&self, path: &str) -> Result<(), RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(ResourceKind::Service, path.to_string()));
        Self::check_path(&state, path)?;
        if state.services.remove(path).is_none() {
            return Err(RegistryError::NotFound {
                path: path.to_string(),
            });
        }
        let prefix = format!("{path}/");
        state.endpoints.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    fn delete_endpoint(&self, path: &str) -> Result<(), RegistryError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(ResourceKind::Endpoint, path.to_string()));
        Self::check_path(&state, path)?;
        match state.endpoints.remove(path) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    fn list_endpoints(&self, parent: &str) -> Listing<'_, Endpoint> {
        let parent = parent.to_string();
        let mut served = 0;
        Listing::new(move |token| {
            self.page(ResourceKind::Endpoint, &parent, token, &mut served, |state, after| {
                direct_children(&state.endpoints, &parent, "endpoints", after)
            })
        })
    }

    fn list_services(&self, parent: &str) -> Listing<'_, Service> {
        let parent = parent.to_string();
        let mut served = 0;
        Listing::new(move |token| {
            self.page(ResourceKind::Service, &parent, token, &mut served, |state, after| {
                direct_children(&state.services, &parent, "services", after)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "projects/p/locations/r/namespaces/ns";

    #[test]
    fn create_needs_parent_and_free_id() {
        let registry = MemoryRegistry::new();
        let err = registry
            .create_service(NS, "svc", Service::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));

        registry.seed_namespace(NS, Metadata::new());
        registry.create_service(NS, "svc", Service::default()).expect("create");
        let err = registry
            .create_service(NS, "svc", Service::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
    }

    #[test]
    fn listing_pages_through_direct_children_only() {
        let registry = MemoryRegistry::new().with_page_size(2);
        registry.seed_namespace(NS, Metadata::new());
        for id in ["a", "b", "c"] {
            registry.seed_service(&format!("{NS}/services/{id}"), Metadata::new());
        }
        registry.seed_endpoint(&format!("{NS}/services/a/endpoints/x"), "1.1.1.1", 1, Metadata::new());

        let names: Vec<String> = registry
            .list_services(NS)
            .map(|r| r.expect("item").name)
            .collect();
        assert_eq!(names.len(), 3);
        assert_eq!(registry.count(|c| matches!(c, Call::List(..))), 1);
    }

    #[test]
    fn injected_listing_failure_surfaces_after_limit() {
        let registry = MemoryRegistry::new().with_page_size(5);
        registry.seed_namespace(NS, Metadata::new());
        for id in ["a", "b", "c"] {
            registry.seed_service(&format!("{NS}/services/{id}"), Metadata::new());
        }
        registry.fail_listing_after(NS, 1);

        let mut listing = registry.list_services(NS);
        assert!(matches!(listing.next(), Some(Ok(_))));
        assert!(matches!(listing.next(), Some(Err(RegistryError::Transport(_)))));
        assert!(listing.next().is_none());
    }

    #[test]
    fn delete_service_cascades_to_endpoints() {
        let registry = MemoryRegistry::new();
        let svc = format!("{NS}/services/svc");
        registry.seed_namespace(NS, Metadata::new());
        registry.seed_service(&svc, Metadata::new());
        registry.seed_endpoint(&format!("{svc}/endpoints/e1"), "1.1.1.1", 1, Metadata::new());

        registry.delete_service(&svc).expect("delete");
        assert!(registry.endpoint(&format!("{svc}/endpoints/e1")).is_none());
        assert_eq!(registry.mutation_calls().len(), 1);
    }
}
