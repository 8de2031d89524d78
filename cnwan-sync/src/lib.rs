//! # cnwan-sync
//!
//! Reconciliation of desired service snapshots against a hierarchical
//! service registry (namespace → service → endpoint).
//!
//! Use [`SyncCoordinator::create_or_update`] to converge one service onto a
//! [`cnwan_core::ServiceSnapshot`], or [`SyncCoordinator::delete`] to remove
//! it together with its endpoints and, once empty, its namespace. Only
//! resources carrying `owner=cnwan-operator` are ever mutated.

pub mod cascade;
pub mod coordinator;
pub mod directory;
pub mod dry_run;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod ownership;
pub mod path;
pub mod registry;
pub mod report;
pub mod service;

pub use coordinator::{SyncCoordinator, SyncLock};
pub use directory::DirectoryClient;
pub use dry_run::DryRun;
pub use error::{RegistryError, SyncError};
pub use memory::MemoryRegistry;
pub use ownership::{Owned, Ownership, OWNER_KEY, OWNER_VALUE};
pub use path::PathResolver;
pub use registry::{Endpoint, Listing, Namespace, Service, ServiceRegistry};
pub use report::{Change, Outcome, ResourceKind, SyncReport};
