//! Service reconciliation: get-or-create of namespace and service, service
//! metadata diff, then the endpoint pass.

use cnwan_core::{Metadata, ServiceSnapshot};

use crate::endpoint::sync_endpoints;
use crate::error::{remote_err, SyncError};
use crate::ownership::{metadata_equivalent, with_owner_tag, Owned};
use crate::path::PathResolver;
use crate::registry::{Namespace, Service, ServiceRegistry, METADATA_MASK};
use crate::report::{Outcome, ResourceKind, SyncReport};

/// Bring the registry in line with `snapshot`.
///
/// A snapshot without endpoints is a no-op: no remote call is made and the
/// snapshot is not validated. Otherwise it must pass
/// [`ServiceSnapshot::validate`] before anything is read. If the
/// namespace had to be created and the service create then fails, the
/// namespace is deleted again (best effort) and the service error returned.
/// Endpoint-level failures are recorded in the report and do not fail the
/// call.
pub fn create_or_update<R>(
    registry: &R,
    paths: &PathResolver,
    snapshot: &ServiceSnapshot,
) -> Result<SyncReport, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let mut report = SyncReport::new(&snapshot.namespace, &snapshot.name);

    if snapshot.endpoints.is_empty() {
        tracing::debug!(
            "service {}/{} has no endpoints, nothing to write",
            snapshot.namespace,
            snapshot.name
        );
        return Ok(report);
    }
    snapshot.validate()?;

    let namespace_created = ensure_namespace(registry, paths, snapshot, &mut report)?;
    let service_created = ensure_service(registry, paths, snapshot, namespace_created, &mut report)?;
    sync_endpoints(registry, paths, snapshot, service_created, &mut report)?;

    tracing::info!(
        "reconciled {}/{}: {} change(s), {} failure(s)",
        snapshot.namespace,
        snapshot.name,
        report.mutations(),
        report.failures().count()
    );
    Ok(report)
}

/// Returns whether the namespace was created by this call.
fn ensure_namespace<R>(
    registry: &R,
    paths: &PathResolver,
    snapshot: &ServiceSnapshot,
    report: &mut SyncReport,
) -> Result<bool, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let path = paths.namespace(&snapshot.namespace.0);
    let existing = registry
        .get_namespace(&path)
        .map_err(|e| remote_err(&path, e))?;
    if existing.is_some() {
        tracing::debug!("namespace {} already exists", path);
        report.record(ResourceKind::Namespace, &path, Outcome::Unchanged);
        return Ok(false);
    }

    let namespace = Namespace {
        name: path.clone(),
        labels: with_owner_tag(&Metadata::new()),
    };
    registry
        .create_namespace(&paths.base(), &snapshot.namespace.0, namespace)
        .map_err(|e| remote_err(&path, e))?;
    tracing::info!("created namespace {}", path);
    report.record(ResourceKind::Namespace, path, Outcome::Created);
    Ok(true)
}

/// Returns whether the service was created by this call.
fn ensure_service<R>(
    registry: &R,
    paths: &PathResolver,
    snapshot: &ServiceSnapshot,
    namespace_created: bool,
    report: &mut SyncReport,
) -> Result<bool, SyncError>
where
    R: ServiceRegistry + ?Sized,
{
    let namespace_path = paths.namespace(&snapshot.namespace.0);
    let path = paths.service(&snapshot.namespace.0, &snapshot.name.0);

    // A namespace created a moment ago cannot hold the service yet.
    let existing = if namespace_created {
        None
    } else {
        registry
            .get_service(&path)
            .map_err(|e| remote_err(&path, e))?
    };

    let Some(mut service) = existing else {
        let service = Service {
            name: path.clone(),
            metadata: with_owner_tag(&snapshot.metadata),
        };
        if let Err(err) = registry.create_service(&namespace_path, &snapshot.name.0, service) {
            tracing::error!("could not create service {}: {}", path, err);
            if namespace_created {
                roll_back_namespace(registry, &namespace_path, report);
            }
            return Err(remote_err(path, err));
        }
        tracing::info!("created service {}", path);
        report.record(ResourceKind::Service, path, Outcome::Created);
        return Ok(true);
    };

    if !service.is_owned() {
        tracing::warn!("service {} is not owned by us, leaving its metadata alone", path);
        report.record(ResourceKind::Service, path, Outcome::SkippedForeign);
        return Ok(false);
    }

    if metadata_equivalent(&service.metadata, &snapshot.metadata) {
        tracing::debug!("service {} is up to date", path);
        report.record(ResourceKind::Service, path, Outcome::Unchanged);
        return Ok(false);
    }

    service.metadata = with_owner_tag(&snapshot.metadata);
    registry
        .update_service(service, METADATA_MASK)
        .map_err(|e| remote_err(&path, e))?;
    tracing::info!("updated service {}", path);
    report.record(ResourceKind::Service, path, Outcome::Updated);
    Ok(false)
}

/// Delete a namespace this call created. Failure is logged, never returned.
fn roll_back_namespace<R>(registry: &R, path: &str, report: &mut SyncReport)
where
    R: ServiceRegistry + ?Sized,
{
    match registry.delete_namespace(path) {
        Ok(()) => {
            tracing::warn!("rolled back namespace {}", path);
            report.record(ResourceKind::Namespace, path, Outcome::RolledBack);
        }
        Err(err) => {
            tracing::error!("could not roll back namespace {}: {}", path, err);
            report.record(
                ResourceKind::Namespace,
                path,
                Outcome::Failed {
                    reason: err.to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::memory::{Call, MemoryRegistry};
    use crate::ownership::{is_owned, OWNER_KEY};
    use cnwan_core::{EndpointSnapshot, Settings, SettingsHandle};

    fn paths() -> PathResolver {
        PathResolver::new(SettingsHandle::new(Settings::new("p", "r")))
    }

    fn md(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn snapshot() -> ServiceSnapshot {
        ServiceSnapshot::new("ns", "svc").with_endpoint(EndpointSnapshot::new("e1", "10.0.0.1", 8080))
    }

    #[test]
    fn empty_snapshot_makes_no_calls() {
        let registry = MemoryRegistry::new();
        let report = create_or_update(&registry, &paths(), &ServiceSnapshot::new("ns", "svc"))
            .expect("no-op");
        assert!(report.changes.is_empty());
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn empty_snapshot_with_blank_names_is_still_a_no_op() {
        let registry = MemoryRegistry::new();
        let report = create_or_update(&registry, &paths(), &ServiceSnapshot::new("", ""))
            .expect("no endpoints, nothing to validate");
        assert!(report.changes.is_empty());
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn invalid_snapshot_is_rejected_before_any_call() {
        let registry = MemoryRegistry::new();
        let bad = ServiceSnapshot::new("", "svc").with_endpoint(EndpointSnapshot::new("e1", "10.0.0.1", 1));
        let err = create_or_update(&registry, &paths(), &bad).unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn empty_registry_gets_three_tagged_creates() {
        let registry = MemoryRegistry::new();
        create_or_update(&registry, &paths(), &snapshot()).expect("sync");

        let creates: Vec<Call> = registry.mutation_calls();
        assert_eq!(creates.len(), 3);
        for call in &creates {
            let Call::Create(_, _, metadata) = call else {
                panic!("unexpected call {call:?}");
            };
            assert!(is_owned(metadata), "{call:?} lacks owner tag");
        }
        assert!(matches!(creates[0], Call::Create(ResourceKind::Namespace, ..)));
        assert!(matches!(creates[1], Call::Create(ResourceKind::Service, ..)));
        assert!(matches!(creates[2], Call::Create(ResourceKind::Endpoint, ..)));
    }

    #[test]
    fn new_namespace_skips_service_lookup() {
        let registry = MemoryRegistry::new();
        create_or_update(&registry, &paths(), &snapshot()).expect("sync");
        assert_eq!(
            registry.count(|c| matches!(c, Call::Get(ResourceKind::Service, _))),
            0
        );
        assert_eq!(registry.count(|c| matches!(c, Call::List(..))), 0);
    }

    #[test]
    fn failed_service_create_rolls_back_new_namespace() {
        let registry = MemoryRegistry::new();
        registry.fail_creates_of(ResourceKind::Service);

        let err = create_or_update(&registry, &paths(), &snapshot()).unwrap_err();
        let SyncError::Remote { path, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(path, &paths().service("ns", "svc"));
        assert!(registry.namespace(&paths().namespace("ns")).is_none());
        assert_eq!(
            registry.count(|c| matches!(c, Call::Delete(ResourceKind::Namespace, _))),
            1
        );
    }

    #[test]
    fn failed_service_create_keeps_existing_namespace() {
        let registry = MemoryRegistry::new();
        registry.seed_namespace(&paths().namespace("ns"), md(&[]));
        registry.fail_creates_of(ResourceKind::Service);

        create_or_update(&registry, &paths(), &snapshot()).unwrap_err();
        assert!(registry.namespace(&paths().namespace("ns")).is_some());
        assert_eq!(registry.count(|c| matches!(c, Call::Delete(..))), 0);
    }

    #[test]
    fn failed_rollback_still_returns_service_error() {
        let registry = MemoryRegistry::new();
        registry.fail_creates_of(ResourceKind::Service);
        registry.fail_path(&paths().namespace("ns"));

        let err = create_or_update(&registry, &paths(), &snapshot()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Remote {
                source: RegistryError::Remote { status: 500, .. },
                ..
            }
        ));
        assert!(registry.namespace(&paths().namespace("ns")).is_some());
    }

    #[test]
    fn stale_service_metadata_is_overwritten() {
        let registry = MemoryRegistry::new();
        let p = paths();
        registry.seed_namespace(&p.namespace("ns"), with_owner_tag(&md(&[])));
        registry.seed_service(&p.service("ns", "svc"), with_owner_tag(&md(&[("v", "1")])));

        let mut desired = snapshot();
        desired.metadata = md(&[("v", "2")]);
        let report = create_or_update(&registry, &p, &desired).expect("sync");

        assert_eq!(report.outcome_of(&p.service("ns", "svc")), Some(&Outcome::Updated));
        let stored = registry.service(&p.service("ns", "svc")).expect("service");
        assert_eq!(stored.metadata, with_owner_tag(&md(&[("v", "2")])));
    }

    #[test]
    fn foreign_service_metadata_is_never_touched() {
        let registry = MemoryRegistry::new();
        let p = paths();
        registry.seed_namespace(&p.namespace("ns"), md(&[]));
        registry.seed_service(&p.service("ns", "svc"), md(&[(OWNER_KEY, "someone-else")]));

        let mut desired = snapshot();
        desired.metadata = md(&[("v", "2")]);
        let report = create_or_update(&registry, &p, &desired).expect("sync");

        assert_eq!(
            report.outcome_of(&p.service("ns", "svc")),
            Some(&Outcome::SkippedForeign)
        );
        assert_eq!(registry.count(|c| matches!(c, Call::Update(..))), 0);
    }

    #[test]
    fn endpoint_listing_failure_fails_the_call_before_creating() {
        let registry = MemoryRegistry::new().with_page_size(1);
        let p = paths();
        registry.seed_namespace(&p.namespace("ns"), with_owner_tag(&md(&[])));
        registry.seed_service(&p.service("ns", "svc"), with_owner_tag(&md(&[])));
        registry.seed_endpoint(&p.endpoint("ns", "svc", "old"), "10.0.0.9", 1, with_owner_tag(&md(&[])));
        registry.fail_listing_after(&p.service("ns", "svc"), 1);

        let err = create_or_update(&registry, &p, &snapshot()).unwrap_err();
        assert!(matches!(err, SyncError::Listing { .. }));
        assert_eq!(
            registry.count(|c| matches!(c, Call::Create(ResourceKind::Endpoint, ..))),
            0
        );
    }
}
