use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use cnwan_core::{settings, snapshot, NamespaceName, ServiceName, ServiceSnapshot, SettingsHandle};
use cnwan_sync::{
    DirectoryClient, Outcome, PathResolver, ResourceKind, SyncCoordinator, SyncReport,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{cnwan_root, services_dir, socket_path, DEBOUNCE_WINDOW, LOG_JSON_ENV};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Identity of one reconciled service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceKey {
    pub namespace: NamespaceName,
    pub service: ServiceName,
}

impl ServiceKey {
    fn of(snapshot: &ServiceSnapshot) -> Self {
        Self {
            namespace: snapshot.namespace.clone(),
            service: snapshot.name.clone(),
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.namespace, self.service)
    }
}

/// Snapshot file → the service it described when last read.
pub type SnapshotCache = HashMap<PathBuf, ServiceKey>;

/// Last result per service, for `status`.
pub type StatusMap = HashMap<ServiceKey, ServiceStatus>;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub action: String,
    pub ok: bool,
    pub last_sync_at_unix: u64,
    pub changes: usize,
    pub failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
enum SyncAction {
    Apply(ServiceSnapshot),
    Delete(ServiceKey),
}

impl SyncAction {
    fn key(&self) -> ServiceKey {
        match self {
            SyncAction::Apply(snapshot) => ServiceKey::of(snapshot),
            SyncAction::Delete(key) => key.clone(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SyncAction::Apply(_) => "apply",
            SyncAction::Delete(_) => "delete",
        }
    }
}

struct SyncJob {
    action: SyncAction,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub action: String,
    pub source: String,
    pub namespace: String,
    pub service: String,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub report: SyncReport,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon against the remote registry named in the settings file.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let settings = settings::load_settings_at(&home)?.with_env_overrides();
    settings.validate()?;
    tracing::info!(
        project = %settings.project,
        region = %settings.region,
        api = %settings.api_base_url,
        "loaded settings",
    );

    let handle = SettingsHandle::new(settings);
    let registry = Arc::new(DirectoryClient::new(handle.clone()));
    let coordinator = SyncCoordinator::new(registry, PathResolver::new(handle));
    run_with(home, coordinator).await
}

/// Run the daemon with an explicit coordinator.
pub async fn run_with(home: PathBuf, coordinator: SyncCoordinator) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let statuses: Arc<RwLock<StatusMap>> = Arc::new(RwLock::new(HashMap::new()));
    let started_at_unix = unix_seconds_now();
    let target = coordinator.paths().base();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let statuses = statuses.clone();
        tokio::spawn(async move {
            let result =
                sync_processor_task(coordinator, statuses, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let context = StatusContext {
            home: home.clone(),
            target,
            started_at_unix,
            statuses: statuses.clone(),
        };
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(context, sync_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };
    drop(sync_tx);

    let (watcher_result, processor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    home: PathBuf,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let dir = services_dir(&home);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Events arrive with real paths (e.g. /private/var/... on macOS).
    let dir = fs::canonicalize(&dir).unwrap_or(dir);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %dir.display(), "watching snapshot directory");

    let mut cache = SnapshotCache::new();
    for (path, snapshot) in load_snapshot_dir(&dir)? {
        cache.insert(path, ServiceKey::of(&snapshot));
        run_action(&sync_tx, SyncAction::Apply(snapshot), "startup").await;
    }

    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let wake = debouncer.next_deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until_opt(wake) => {
                for path in debouncer.due(Instant::now()) {
                    for action in watch_actions(&mut cache, &path) {
                        run_action(&sync_tx, action, "watcher").await;
                    }
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if path.parent() == Some(dir.as_path()) && snapshot::is_snapshot_file(&path) {
                        debouncer.note(path, Instant::now());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_action(sync_tx: &mpsc::Sender<SyncJob>, action: SyncAction, source: &'static str) {
    let label = action.key().label();
    match enqueue_sync(sync_tx, action, source).await {
        Ok(summary) => {
            tracing::info!(
                service = %label,
                action = %summary.action,
                source = source,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                failed = summary.failed,
                duration_ms = summary.duration_ms,
                "sync completed",
            );
        }
        Err(err) => {
            tracing::error!(service = %label, source = source, error = %err, "sync failed");
        }
    }
}

/// Read every parseable snapshot in `dir`. Malformed files are skipped.
fn load_snapshot_dir(dir: &Path) -> Result<Vec<(PathBuf, ServiceSnapshot)>, DaemonError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && snapshot::is_snapshot_file(path))
        .collect();
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        match snapshot::load_snapshot(&path) {
            Ok(snapshot) => loaded.push((path, snapshot)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
            }
        }
    }
    Ok(loaded)
}

/// Work implied by the current state of one snapshot file.
///
/// A present file is applied; if it used to describe another service, that
/// one is deleted first. A vanished file deletes the service it last
/// described, unless another file still describes it.
fn watch_actions(cache: &mut SnapshotCache, path: &Path) -> Vec<SyncAction> {
    let mut actions = Vec::new();

    if path.exists() {
        let snapshot = match snapshot::load_snapshot(path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable snapshot");
                return actions;
            }
        };
        let key = ServiceKey::of(&snapshot);
        if let Some(previous) = cache.insert(path.to_path_buf(), key.clone()) {
            if previous != key && !described_elsewhere(cache, &previous) {
                actions.push(SyncAction::Delete(previous));
            }
        }
        actions.push(SyncAction::Apply(snapshot));
    } else if let Some(previous) = cache.remove(path) {
        if !described_elsewhere(cache, &previous) {
            actions.push(SyncAction::Delete(previous));
        }
    }

    actions
}

fn described_elsewhere(cache: &SnapshotCache, key: &ServiceKey) -> bool {
    cache.values().any(|other| other == key)
}

/// Trailing-edge debounce: a path becomes due once it saw no event for
/// the whole window, so only the settled file contents are read.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    fn note(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    fn due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

// ---------------------------------------------------------------------------
// Sync processor
// ---------------------------------------------------------------------------

async fn sync_processor_task(
    coordinator: SyncCoordinator,
    statuses: Arc<RwLock<StatusMap>>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let key = job.action.key();
                let action_label = job.action.label();

                let action = job.action;
                let worker = coordinator.clone();
                let sync_result = tokio::task::spawn_blocking(move || match action {
                    SyncAction::Apply(snapshot) => worker.create_or_update(&snapshot),
                    SyncAction::Delete(key) => worker.delete(&key.namespace, &key.service),
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?;

                let status = match &sync_result {
                    Ok(report) => ServiceStatus {
                        action: action_label.to_string(),
                        ok: true,
                        last_sync_at_unix: unix_seconds_now(),
                        changes: report.mutations(),
                        failures: report.failures().count(),
                        error: None,
                    },
                    Err(err) => ServiceStatus {
                        action: action_label.to_string(),
                        ok: false,
                        last_sync_at_unix: unix_seconds_now(),
                        changes: 0,
                        failures: 0,
                        error: Some(err.to_string()),
                    },
                };
                statuses.write().await.insert(key.clone(), status);

                let outcome = sync_result
                    .map(|report| {
                        build_sync_summary(action_label, job.source, &key, report, started.elapsed())
                    })
                    .map_err(|err| err.to_string());
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    action: SyncAction,
    source: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            action,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn build_sync_summary(
    action: &'static str,
    source: &'static str,
    key: &ServiceKey,
    report: SyncReport,
    duration: Duration,
) -> SyncSummary {
    let count = |outcome: fn(&Outcome) -> bool| {
        [ResourceKind::Namespace, ResourceKind::Service, ResourceKind::Endpoint]
            .into_iter()
            .map(|kind| report.count(kind, outcome))
            .sum::<usize>()
    };

    SyncSummary {
        action: action.to_string(),
        source: source.to_string(),
        namespace: key.namespace.0.clone(),
        service: key.service.0.clone(),
        created: count(|o| matches!(o, Outcome::Created)),
        updated: count(|o| matches!(o, Outcome::Updated)),
        deleted: count(|o| matches!(o, Outcome::Deleted)),
        failed: report.failures().count(),
        duration_ms: duration.as_millis(),
        report,
    }
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StatusContext {
    home: PathBuf,
    target: String,
    started_at_unix: u64,
    statuses: Arc<RwLock<StatusMap>>,
}

async fn socket_server_task(
    context: StatusContext,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    context: StatusContext,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response = match cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&context).await),
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            "apply" | "delete" => match action_for_request(request) {
                Ok(action) => match enqueue_sync(&sync_tx, action, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                Err(message) => DaemonResponse::error(message),
            },
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn action_for_request(request: DaemonRequest) -> Result<SyncAction, String> {
    match request.cmd.as_str() {
        "apply" => request
            .snapshot
            .map(SyncAction::Apply)
            .ok_or_else(|| "apply requires a snapshot".to_string()),
        "delete" => match (request.namespace, request.service) {
            (Some(namespace), Some(service)) if !namespace.is_empty() && !service.is_empty() => {
                Ok(SyncAction::Delete(ServiceKey {
                    namespace: namespace.into(),
                    service: service.into(),
                }))
            }
            _ => Err("delete requires namespace and service".to_string()),
        },
        other => Err(format!("unknown command '{other}'")),
    }
}

async fn build_status_payload(context: &StatusContext) -> Value {
    let mut entries: Vec<(ServiceKey, ServiceStatus)> = {
        let statuses = context.statuses.read().await;
        statuses
            .iter()
            .map(|(key, status)| (key.clone(), status.clone()))
            .collect()
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let last_sync_at_unix = entries
        .iter()
        .map(|(_, status)| status.last_sync_at_unix)
        .max()
        .unwrap_or(0);

    let services: Vec<Value> = entries
        .into_iter()
        .map(|(key, status)| {
            let mut value = json!(status);
            value["namespace"] = json!(key.namespace);
            value["service"] = json!(key.service);
            value
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": context.started_at_unix,
        "last_sync_at_unix": last_sync_at_unix,
        "target": context.target,
        "services": services,
        "socket": socket_path(&context.home).display().to_string(),
        "services_dir": services_dir(&context.home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [cnwan_root(home), services_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the fmt subscriber. `log` records from the sync engine are
/// forwarded into it as well.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if std::env::var_os(LOG_JSON_ENV).is_some() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use cnwan_core::{EndpointSnapshot, Settings};
    use cnwan_sync::memory::{Call, MemoryRegistry};
    use tempfile::TempDir;
    use tokio::time::advance;

    fn snapshot(ns: &str, svc: &str) -> ServiceSnapshot {
        ServiceSnapshot::new(ns, svc).with_endpoint(EndpointSnapshot::new("e1", "10.0.0.1", 8080))
    }

    fn key(ns: &str, svc: &str) -> ServiceKey {
        ServiceKey {
            namespace: ns.into(),
            service: svc.into(),
        }
    }

    fn memory_coordinator() -> (Arc<MemoryRegistry>, SyncCoordinator) {
        let registry = Arc::new(MemoryRegistry::new());
        let paths = PathResolver::new(SettingsHandle::new(Settings::new("p", "r")));
        (registry.clone(), SyncCoordinator::new(registry, paths))
    }

    // ─── Debounce ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/tmp/ns.svc.yaml");
        let mut triggers = 0usize;

        for _ in 0..5 {
            debouncer.note(path.clone(), Instant::now());
            advance(Duration::from_millis(10)).await;
            triggers += debouncer.due(Instant::now()).len();
        }
        assert_eq!(triggers, 0, "nothing is due while events keep arriving");

        advance(Duration::from_millis(150)).await;
        triggers += debouncer.due(Instant::now()).len();
        assert_eq!(triggers, 1, "rapid saves should collapse to one trigger");
        assert!(debouncer.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_tracks_paths_independently() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let a = PathBuf::from("/tmp/a.yaml");
        let b = PathBuf::from("/tmp/b.yaml");

        debouncer.note(a.clone(), Instant::now());
        advance(Duration::from_millis(60)).await;
        debouncer.note(b.clone(), Instant::now());
        advance(Duration::from_millis(60)).await;

        assert_eq!(debouncer.due(Instant::now()), vec![a]);
        advance(Duration::from_millis(60)).await;
        assert_eq!(debouncer.due(Instant::now()), vec![b]);
    }

    // ─── Snapshot file → actions ─────────────────────────────────────────────

    #[test]
    fn new_file_is_applied_and_cached() {
        let home = TempDir::new().expect("home");
        let path = snapshot::save_snapshot_at(home.path(), &snapshot("ns", "svc")).expect("save");
        let mut cache = SnapshotCache::new();

        let actions = watch_actions(&mut cache, &path);
        assert!(matches!(actions.as_slice(), [SyncAction::Apply(s)] if s.name.0 == "svc"));
        assert_eq!(cache.get(&path), Some(&key("ns", "svc")));
    }

    #[test]
    fn removed_file_deletes_last_seen_service() {
        let home = TempDir::new().expect("home");
        let path = snapshot::save_snapshot_at(home.path(), &snapshot("ns", "svc")).expect("save");
        let mut cache = SnapshotCache::new();
        watch_actions(&mut cache, &path);

        fs::remove_file(&path).expect("remove");
        let actions = watch_actions(&mut cache, &path);
        assert!(matches!(actions.as_slice(), [SyncAction::Delete(k)] if *k == key("ns", "svc")));
        assert!(cache.is_empty());
        assert!(watch_actions(&mut cache, &path).is_empty());
    }

    #[test]
    fn renamed_service_in_same_file_deletes_the_old_one() {
        let home = TempDir::new().expect("home");
        let path = snapshot::services_dir_at(home.path()).join("web.yaml");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let write = |s: &ServiceSnapshot| {
            fs::write(&path, serde_yaml::to_string(s).expect("yaml")).expect("write")
        };
        let mut cache = SnapshotCache::new();

        write(&snapshot("ns", "old"));
        watch_actions(&mut cache, &path);
        write(&snapshot("ns", "new"));
        let actions = watch_actions(&mut cache, &path);

        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], SyncAction::Delete(k) if *k == key("ns", "old")));
        assert!(matches!(&actions[1], SyncAction::Apply(s) if s.name.0 == "new"));
    }

    #[test]
    fn service_still_described_by_another_file_is_kept() {
        let home = TempDir::new().expect("home");
        let dir = snapshot::services_dir_at(home.path());
        fs::create_dir_all(&dir).expect("mkdir");
        let first = dir.join("a.yaml");
        let second = dir.join("b.yaml");
        let yaml = serde_yaml::to_string(&snapshot("ns", "svc")).expect("yaml");
        fs::write(&first, &yaml).expect("write a");
        fs::write(&second, &yaml).expect("write b");

        let mut cache = SnapshotCache::new();
        watch_actions(&mut cache, &first);
        watch_actions(&mut cache, &second);
        fs::remove_file(&first).expect("remove a");

        assert!(watch_actions(&mut cache, &first).is_empty());
    }

    #[test]
    fn malformed_file_is_ignored() {
        let home = TempDir::new().expect("home");
        let dir = snapshot::services_dir_at(home.path());
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("broken.yaml");
        fs::write(&path, "name: [unterminated").expect("write");

        let mut cache = SnapshotCache::new();
        assert!(watch_actions(&mut cache, &path).is_empty());
        assert!(cache.is_empty());
        assert!(load_snapshot_dir(&dir).expect("scan").is_empty());
    }

    // ─── Sync processor ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn processor_runs_jobs_and_records_status() {
        let (registry, coordinator) = memory_coordinator();
        let statuses = Arc::new(RwLock::new(StatusMap::new()));
        let (sync_tx, sync_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let processor = tokio::spawn(sync_processor_task(
            coordinator,
            statuses.clone(),
            sync_rx,
            shutdown_tx.subscribe(),
        ));

        let summary = enqueue_sync(&sync_tx, SyncAction::Apply(snapshot("ns", "svc")), "test")
            .await
            .expect("apply");
        assert_eq!(summary.created, 3);
        assert_eq!(summary.action, "apply");
        assert_eq!(registry.count(|c| matches!(c, Call::Create(..))), 3);

        let summary = enqueue_sync(&sync_tx, SyncAction::Delete(key("ns", "svc")), "test")
            .await
            .expect("delete");
        assert_eq!(summary.deleted, 3);

        let status = statuses.read().await.get(&key("ns", "svc")).cloned().expect("status");
        assert!(status.ok);
        assert_eq!(status.action, "delete");

        let _ = shutdown_tx.send(());
        processor.await.expect("join").expect("processor");
    }

    #[tokio::test]
    async fn failed_job_is_reported_and_recorded() {
        let (registry, coordinator) = memory_coordinator();
        registry.fail_creates_of(ResourceKind::Service);
        let statuses = Arc::new(RwLock::new(StatusMap::new()));
        let (sync_tx, sync_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let processor = tokio::spawn(sync_processor_task(
            coordinator,
            statuses.clone(),
            sync_rx,
            shutdown_tx.subscribe(),
        ));

        let err = enqueue_sync(&sync_tx, SyncAction::Apply(snapshot("ns", "svc")), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));

        let status = statuses.read().await.get(&key("ns", "svc")).cloned().expect("status");
        assert!(!status.ok);
        assert!(status.error.is_some());

        let _ = shutdown_tx.send(());
        processor.await.expect("join").expect("processor");
    }

    // ─── Requests and status ─────────────────────────────────────────────────

    #[test]
    fn delete_request_needs_both_names() {
        let mut request = DaemonRequest::command("delete");
        request.namespace = Some("ns".into());
        assert!(action_for_request(request).is_err());
        assert!(matches!(
            action_for_request(DaemonRequest::delete("ns", "svc")),
            Ok(SyncAction::Delete(k)) if k == key("ns", "svc")
        ));
        assert!(action_for_request(DaemonRequest::command("apply")).is_err());
    }

    #[tokio::test]
    async fn status_payload_before_any_sync() {
        let home = TempDir::new().expect("home");
        let context = StatusContext {
            home: home.path().to_path_buf(),
            target: "projects/p/locations/r".into(),
            started_at_unix: 1_000_000,
            statuses: Arc::new(RwLock::new(StatusMap::new())),
        };

        let payload = build_status_payload(&context).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_sync_at_unix"], json!(0u64));
        assert_eq!(payload["target"], json!("projects/p/locations/r"));
        assert!(payload["services"].as_array().expect("services").is_empty());
    }

    #[tokio::test]
    async fn status_payload_lists_services_sorted_with_latest_sync() {
        let home = TempDir::new().expect("home");
        let status = |at: u64, ok: bool| ServiceStatus {
            action: "apply".into(),
            ok,
            last_sync_at_unix: at,
            changes: 1,
            failures: 0,
            error: (!ok).then(|| "boom".to_string()),
        };
        let statuses: StatusMap = [
            (key("ns", "web"), status(1_000_200, true)),
            (key("ns", "api"), status(1_000_100, false)),
        ]
        .into_iter()
        .collect();
        let context = StatusContext {
            home: home.path().to_path_buf(),
            target: "projects/p/locations/r".into(),
            started_at_unix: 1_000_000,
            statuses: Arc::new(RwLock::new(statuses)),
        };

        let payload = build_status_payload(&context).await;
        assert_eq!(payload["last_sync_at_unix"], json!(1_000_200u64));
        let services = payload["services"].as_array().expect("services");
        assert_eq!(services[0]["service"], json!("api"));
        assert_eq!(services[0]["ok"], json!(false));
        assert_eq!(services[0]["error"], json!("boom"));
        assert_eq!(services[1]["service"], json!("web"));
        assert!(services[1].get("error").is_none());
    }
}
