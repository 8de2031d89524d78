//! Endpoint reconciliation.
//!
//! For every remote endpoint under a service the engine decides one
//! [`Action`] against the desired set, executes it right away, and then
//! creates whatever desired endpoints were not matched. Individual endpoint
//! failures are logged and recorded; they never abort the pass.

use std::collections::{BTreeMap, BTreeSet};

use cnwan_core::{EndpointName, EndpointSnapshot, ServiceSnapshot};

use crate::error::{listing_err, remote_err, SyncError};
use crate::ownership::{metadata_equivalent, with_owner_tag, Owned, Ownership};
use crate::path::{leaf_name, PathResolver};
use crate::registry::{Endpoint, ServiceRegistry, METADATA_MASK};
use crate::report::{Outcome, ResourceKind, SyncReport};

/// What to do with one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Update,
    Delete,
}

/// Decide how a remote endpoint relates to the desired endpoint set.
///
/// Foreign endpoints always get [`Action::None`].
pub fn decide_action(
    remote: &Endpoint,
    desired: &BTreeMap<EndpointName, EndpointSnapshot>,
) -> (Ownership, Action) {
    let ownership = remote.ownership_tag();
    if !ownership.is_owned() {
        return (ownership, Action::None);
    }

    let action = match desired.get(leaf_name(&remote.name)) {
        None => Action::Delete,
        Some(wanted) if !metadata_equivalent(&remote.metadata, &wanted.metadata) => Action::Update,
        Some(_) => Action::None,
    };
    (ownership, action)
}

/// Create one desired endpoint under `service_path`, tagged as owned.
pub fn create_endpoint<R>(
    registry: &R,
    service_path: &str,
    desired: &EndpointSnapshot,
) -> Result<Endpoint, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let path = format!("{service_path}/endpoints/{}", desired.name);
    let endpoint = Endpoint {
        name: path.clone(),
        address: desired.address.clone(),
        port: desired.port,
        metadata: with_owner_tag(&desired.metadata),
    };
    registry
        .create_endpoint(service_path, &desired.name.0, endpoint)
        .map_err(|e| remote_err(path, e))
}

/// Overwrite a remote endpoint's metadata with the desired metadata.
pub fn update_endpoint<R>(
    registry: &R,
    mut remote: Endpoint,
    desired: &EndpointSnapshot,
) -> Result<Endpoint, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let path = remote.name.clone();
    remote.metadata = with_owner_tag(&desired.metadata);
    registry
        .update_endpoint(remote, METADATA_MASK)
        .map_err(|e| remote_err(path, e))
}

pub fn delete_endpoint<R>(registry: &R, path: &str) -> Result<(), SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    registry.delete_endpoint(path).map_err(|e| remote_err(path, e))
}

/// Bring the endpoints under the snapshot's service in line with it.
///
/// With `service_created` the remote listing is skipped: a service created
/// a moment ago has no endpoints. A listing that fails mid-stream ends the
/// pass with [`SyncError::Listing`] before any creation, since the set of
/// endpoints still missing is unknown.
pub(crate) fn sync_endpoints<R>(
    registry: &R,
    paths: &PathResolver,
    snapshot: &ServiceSnapshot,
    service_created: bool,
    report: &mut SyncReport,
) -> Result<(), SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let service_path = paths.service(&snapshot.namespace.0, &snapshot.name.0);
    let mut remaining: BTreeSet<EndpointName> = snapshot.endpoints.keys().cloned().collect();

    if !service_created {
        for item in registry.list_endpoints(&service_path) {
            let remote = item.map_err(|e| listing_err(&service_path, e))?;
            let leaf = EndpointName::from(leaf_name(&remote.name));

            let (ownership, action) = decide_action(&remote, &snapshot.endpoints);
            if !ownership.is_owned() {
                tracing::warn!("endpoint {} is not owned by us, skipping", remote.name);
                report.record(ResourceKind::Endpoint, &remote.name, Outcome::SkippedForeign);
                // A create under the same id would only collide with it.
                remaining.remove(&leaf);
                continue;
            }

            match action {
                Action::Delete => {
                    let outcome = match delete_endpoint(registry, &remote.name) {
                        Ok(()) => {
                            tracing::info!("deleted endpoint {}", remote.name);
                            Outcome::Deleted
                        }
                        Err(err) => {
                            tracing::error!("could not delete endpoint {}: {}", remote.name, err);
                            Outcome::Failed {
                                reason: err.to_string(),
                            }
                        }
                    };
                    report.record(ResourceKind::Endpoint, &remote.name, outcome);
                }
                Action::Update => {
                    remaining.remove(&leaf);
                    let Some(desired) = snapshot.endpoints.get(&leaf) else {
                        continue;
                    };
                    let path = remote.name.clone();
                    let outcome = match update_endpoint(registry, remote, desired) {
                        Ok(_) => {
                            tracing::info!("updated endpoint {}", path);
                            Outcome::Updated
                        }
                        Err(err) => {
                            tracing::error!("could not update endpoint {}: {}", path, err);
                            Outcome::Failed {
                                reason: err.to_string(),
                            }
                        }
                    };
                    report.record(ResourceKind::Endpoint, path, outcome);
                }
                Action::None => {
                    remaining.remove(&leaf);
                    tracing::debug!("endpoint {} is up to date", remote.name);
                    report.record(ResourceKind::Endpoint, &remote.name, Outcome::Unchanged);
                }
            }
        }
    }

    for name in &remaining {
        let Some(desired) = snapshot.endpoints.get(name) else {
            continue;
        };
        let path = format!("{service_path}/endpoints/{name}");
        let outcome = match create_endpoint(registry, &service_path, desired) {
            Ok(_) => {
                tracing::info!("created endpoint {}", path);
                Outcome::Created
            }
            Err(err) => {
                tracing::error!("could not create endpoint {}: {}", path, err);
                Outcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        report.record(ResourceKind::Endpoint, path, outcome);
    }

    Ok(())
}
