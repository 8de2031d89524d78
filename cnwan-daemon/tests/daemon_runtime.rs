use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cnwan_core::{snapshot, EndpointSnapshot, ServiceSnapshot, Settings, SettingsHandle};
use cnwan_daemon::{request_apply, request_delete, request_status, request_stop, run_with};
use cnwan_sync::{MemoryRegistry, PathResolver, SyncCoordinator};
use serde_json::Value;
use tempfile::TempDir;

fn web_snapshot(name: &str) -> ServiceSnapshot {
    ServiceSnapshot::new("ns", name)
        .with_endpoint(EndpointSnapshot::new("e1", "10.0.0.1", 8080))
        .with_endpoint(EndpointSnapshot::new("e2", "10.0.0.2", 8080))
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(f).await.expect("blocking task")
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

async fn status(home: PathBuf) -> Value {
    blocking(move || request_status(&home)).await.expect("status")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_and_watcher_drive_the_registry() {
    let home = TempDir::new().expect("home");
    let home_path = home.path().to_path_buf();
    let registry = Arc::new(MemoryRegistry::new());
    let paths = PathResolver::new(SettingsHandle::new(Settings::new("proj", "us-west1")));
    let coordinator = SyncCoordinator::new(registry.clone(), paths.clone());

    let daemon = tokio::spawn(run_with(home_path.clone(), coordinator));

    let socket = cnwan_daemon::paths::socket_path(&home_path);
    assert!(
        wait_until(|| socket.exists(), Duration::from_secs(5)).await,
        "daemon socket never appeared"
    );
    let initial = status(home_path.clone()).await;
    assert_eq!(initial["running"], Value::Bool(true));
    assert_eq!(initial["target"], Value::from("projects/proj/locations/us-west1"));

    // Socket apply.
    let summary = {
        let home = home_path.clone();
        blocking(move || request_apply(&home, web_snapshot("api")))
            .await
            .expect("apply")
    };
    assert_eq!(summary["created"], Value::from(4));
    assert!(registry.service(&paths.service("ns", "api")).is_some());

    // Watched snapshot file.
    snapshot::save_snapshot_at(&home_path, &web_snapshot("web")).expect("save snapshot");
    let web = paths.service("ns", "web");
    assert!(
        wait_until(|| registry.service(&web).is_some(), Duration::from_secs(10)).await,
        "snapshot file was not applied"
    );

    let file = snapshot::snapshot_path_at(&home_path, &web_snapshot("web"));
    std::fs::remove_file(&file).expect("remove snapshot");
    assert!(
        wait_until(|| registry.service(&web).is_none(), Duration::from_secs(10)).await,
        "removed snapshot did not delete the service"
    );
    assert!(registry.namespace(&paths.namespace("ns")).is_some());

    // Socket delete of the last service removes the namespace too.
    let summary = {
        let home = home_path.clone();
        blocking(move || request_delete(&home, "ns", "api"))
            .await
            .expect("delete")
    };
    assert_eq!(summary["deleted"], Value::from(4));
    assert!(registry.namespace(&paths.namespace("ns")).is_none());

    let after = status(home_path.clone()).await;
    let services = after["services"].as_array().expect("services");
    assert_eq!(services.len(), 2);
    assert!(services.iter().all(|s| s["ok"] == Value::Bool(true)));

    {
        let home = home_path.clone();
        blocking(move || request_stop(&home)).await.expect("stop");
    }
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("daemon result");
    assert!(!socket.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_snapshots_are_applied_at_startup() {
    let home = TempDir::new().expect("home");
    let home_path = home.path().to_path_buf();
    snapshot::save_snapshot_at(&home_path, &web_snapshot("boot")).expect("save snapshot");

    let registry = Arc::new(MemoryRegistry::new());
    let paths = PathResolver::new(SettingsHandle::new(Settings::new("proj", "us-west1")));
    let coordinator = SyncCoordinator::new(registry.clone(), paths.clone());
    let daemon = tokio::spawn(run_with(home_path.clone(), coordinator));

    let boot = paths.endpoint("ns", "boot", "e2");
    assert!(
        wait_until(|| registry.endpoint(&boot).is_some(), Duration::from_secs(10)).await,
        "startup scan did not apply the snapshot"
    );

    let socket = cnwan_daemon::paths::socket_path(&home_path);
    assert!(wait_until(|| socket.exists(), Duration::from_secs(5)).await);
    {
        let home = home_path.clone();
        blocking(move || request_stop(&home)).await.expect("stop");
    }
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("daemon result");
}
