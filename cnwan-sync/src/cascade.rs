//! Cascading delete of a service and, when it ends up empty, its namespace.
//!
//! Nothing foreign is ever removed: a foreign service is left alone, a
//! single foreign endpoint blocks the whole deletion, and a foreign
//! namespace is never deleted even when empty.

use cnwan_core::{NamespaceName, ServiceName};

use crate::error::{listing_err, remote_err, SyncError};
use crate::ownership::Owned;
use crate::path::{leaf_name, PathResolver};
use crate::registry::{Endpoint, ServiceRegistry};
use crate::report::{Outcome, ResourceKind, SyncReport};

pub fn delete_service<R>(
    registry: &R,
    paths: &PathResolver,
    namespace: &NamespaceName,
    service: &ServiceName,
) -> Result<SyncReport, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let mut report = SyncReport::new(namespace, service);
    let service_path = paths.service(&namespace.0, &service.0);

    let Some(remote) = registry
        .get_service(&service_path)
        .map_err(|e| remote_err(&service_path, e))?
    else {
        tracing::debug!("service {} does not exist, nothing to delete", service_path);
        return Ok(report);
    };

    if !remote.is_owned() {
        tracing::warn!("service {} is not owned by us, not deleting", service_path);
        report.record(ResourceKind::Service, &service_path, Outcome::SkippedForeign);
        return Ok(report);
    }

    // Every child must be ours before the parent may go.
    let mut endpoints: Vec<Endpoint> = Vec::new();
    for item in registry.list_endpoints(&service_path) {
        let endpoint = item.map_err(|e| listing_err(&service_path, e))?;
        if !endpoint.is_owned() {
            tracing::warn!(
                "endpoint {} is not owned by us, keeping service {}",
                endpoint.name,
                service_path
            );
            report.record(ResourceKind::Endpoint, &endpoint.name, Outcome::SkippedForeign);
            report.record(
                ResourceKind::Service,
                &service_path,
                Outcome::Blocked { by: endpoint.name },
            );
            return Ok(report);
        }
        endpoints.push(endpoint);
    }

    registry
        .delete_service(&service_path)
        .map_err(|e| remote_err(&service_path, e))?;
    tracing::info!("deleted service {} with {} endpoint(s)", service_path, endpoints.len());
    for endpoint in endpoints {
        report.record(ResourceKind::Endpoint, endpoint.name, Outcome::Deleted);
    }
    report.record(ResourceKind::Service, &service_path, Outcome::Deleted);

    delete_namespace_if_empty(registry, paths, namespace, &mut report)?;
    Ok(report)
}

fn delete_namespace_if_empty<R>(
    registry: &R,
    paths: &PathResolver,
    namespace: &NamespaceName,
    report: &mut SyncReport,
) -> Result<(), SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let path = paths.namespace(&namespace.0);

    let Some(remote) = registry
        .get_namespace(&path)
        .map_err(|e| remote_err(&path, e))?
    else {
        return Ok(());
    };
    if !remote.is_owned() {
        tracing::debug!("namespace {} is not owned by us, keeping it", path);
        report.record(ResourceKind::Namespace, &path, Outcome::SkippedForeign);
        return Ok(());
    }

    let mut services = registry.list_services(&path);
    match services.any_remaining() {
        Ok(false) => {}
        Ok(true) => {
            let reason = match services.next() {
                Some(Ok(remaining)) => {
                    tracing::info!(
                        "namespace {} still holds {} service {}, keeping it",
                        path,
                        if remaining.is_owned() { "owned" } else { "foreign" },
                        leaf_name(&remaining.name)
                    );
                    format!("service {} remains", leaf_name(&remaining.name))
                }
                _ => "services remain".to_string(),
            };
            report.record(ResourceKind::Namespace, &path, Outcome::Kept { reason });
            return Ok(());
        }
        Err(err) => {
            tracing::warn!(
                "could not tell whether namespace {} is empty, keeping it: {}",
                path,
                err
            );
            report.record(
                ResourceKind::Namespace,
                &path,
                Outcome::Kept {
                    reason: format!("listing failed: {err}"),
                },
            );
            return Ok(());
        }
    }

    registry
        .delete_namespace(&path)
        .map_err(|e| remote_err(&path, e))?;
    tracing::info!("deleted namespace {}", path);
    report.record(ResourceKind::Namespace, path, Outcome::Deleted);
    Ok(())
}
