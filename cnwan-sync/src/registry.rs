//! Remote registry resources and the operations the engine needs from them.
//!
//! The hierarchy is namespace → service → endpoint. Resource `name` fields
//! always hold the fully-qualified path, e.g.
//! `projects/p/locations/r/namespaces/ns/services/svc/endpoints/e1`.

use serde::{Deserialize, Serialize};

use cnwan_core::Metadata;

use crate::error::RegistryError;
use crate::ownership::Owned;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub labels: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Owned for Namespace {
    fn marker_source(&self) -> &Metadata {
        &self.labels
    }
}

impl Owned for Service {
    fn marker_source(&self) -> &Metadata {
        &self.metadata
    }
}

impl Owned for Endpoint {
    fn marker_source(&self) -> &Metadata {
        &self.metadata
    }
}

/// Field mask sent with every update; only metadata is ever rewritten.
pub const METADATA_MASK: &[&str] = &["metadata"];

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// Remote registry operations used by the sync engine.
///
/// Implementations normalize "not found" on get-style calls to `Ok(None)`.
/// Every call is attempted once; retries are the caller's concern.
pub trait ServiceRegistry: Send + Sync {
    fn get_namespace(&self, path: &str) -> Result<Option<Namespace>, RegistryError>;
    fn get_service(&self, path: &str) -> Result<Option<Service>, RegistryError>;
    fn get_endpoint(&self, path: &str) -> Result<Option<Endpoint>, RegistryError>;

    fn create_namespace(
        &self,
        parent: &str,
        id: &str,
        namespace: Namespace,
    ) -> Result<Namespace, RegistryError>;
    fn create_service(&self, parent: &str, id: &str, service: Service)
        -> Result<Service, RegistryError>;
    fn create_endpoint(
        &self,
        parent: &str,
        id: &str,
        endpoint: Endpoint,
    ) -> Result<Endpoint, RegistryError>;

    fn update_service(&self, service: Service, mask: &[&str]) -> Result<Service, RegistryError>;
    fn update_endpoint(&self, endpoint: Endpoint, mask: &[&str])
        -> Result<Endpoint, RegistryError>;

    fn delete_namespace(&self, path: &str) -> Result<(), RegistryError>;
    fn delete_service(&self, path: &str) -> Result<(), RegistryError>;
    fn delete_endpoint(&self, path: &str) -> Result<(), RegistryError>;

    fn list_endpoints(&self, parent: &str) -> Listing<'_, Endpoint>;
    fn list_services(&self, parent: &str) -> Listing<'_, Service>;
}

// ---------------------------------------------------------------------------
// Lazy paginated listing
// ---------------------------------------------------------------------------

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

type FetchPage<'a, T> = Box<dyn FnMut(Option<&str>) -> Result<Page<T>, RegistryError> + Send + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingState {
    /// More pages may follow (or the first page was not fetched yet).
    Open,
    Exhausted,
    Failed,
}

/// A finite, lazily fetched sequence of remote resources.
///
/// Pages are requested only as iteration reaches them. A page failure is
/// yielded once as `Some(Err(..))` and the listing then ends, so callers
/// can tell "exhausted" apart from "failed mid-stream".
pub struct Listing<'a, T> {
    fetch: FetchPage<'a, T>,
    buffer: std::vec::IntoIter<T>,
    next_token: Option<String>,
    state: ListingState,
}

impl<'a, T> Listing<'a, T> {
    pub fn new(
        fetch: impl FnMut(Option<&str>) -> Result<Page<T>, RegistryError> + Send + 'a,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            buffer: Vec::new().into_iter(),
            next_token: None,
            state: ListingState::Open,
        }
    }

    /// A listing that yields nothing.
    pub fn empty() -> Self {
        let mut listing = Self::new(|_| Ok(Page::last(Vec::new())));
        listing.state = ListingState::Exhausted;
        listing
    }

    /// Keep only the items matching `keep`, page by page. Page boundaries
    /// and errors are unchanged.
    pub fn retain(self, keep: impl Fn(&T) -> bool + Send + 'a) -> Self
    where
        T: 'a,
    {
        let Listing {
            mut fetch,
            buffer,
            next_token,
            state,
        } = self;
        let mut buffered: Vec<T> = buffer.collect();
        buffered.retain(|item| keep(item));
        Listing {
            fetch: Box::new(move |token: Option<&str>| {
                fetch(token).map(|mut page| {
                    page.items.retain(|item| keep(item));
                    page
                })
            }),
            buffer: buffered.into_iter(),
            next_token,
            state,
        }
    }

    /// Whether at least one item remains, fetching pages only as needed.
    ///
    /// On the first call this costs a single page request unless that page
    /// is empty but announces a successor.
    pub fn any_remaining(&mut self) -> Result<bool, RegistryError> {
        loop {
            if !self.buffer.as_slice().is_empty() {
                return Ok(true);
            }
            if self.state != ListingState::Open {
                return Ok(false);
            }
            self.fetch_next()?;
        }
    }

    fn fetch_next(&mut self) -> Result<(), RegistryError> {
        match (self.fetch)(self.next_token.as_deref()) {
            Ok(page) => {
                self.buffer = page.items.into_iter();
                self.next_token = page.next_page_token.filter(|t| !t.is_empty());
                if self.next_token.is_none() {
                    self.state = ListingState::Exhausted;
                }
                Ok(())
            }
            Err(err) => {
                self.state = ListingState::Failed;
                Err(err)
            }
        }
    }
}

impl<T> Iterator for Listing<'_, T> {
    type Item = Result<T, RegistryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            if self.state != ListingState::Open {
                return None;
            }
            if let Err(err) = self.fetch_next() {
                return Some(Err(err));
            }
        }
    }
}

impl<T> std::fmt::Debug for Listing<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listing")
            .field("buffered", &self.buffer.len())
            .field("next_token", &self.next_token)
            .field("state", &self.state)
            .finish()
    }
}
