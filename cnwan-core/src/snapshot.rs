//! Snapshot files: one YAML document per service.
//!
//! ```text
//! ~/.cnwan/services/<namespace>.<service>.yaml
//! ```
//!
//! The daemon watches this directory; `cnwan apply` reads single files from
//! anywhere on disk.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::settings::{cnwan_root, set_dir_permissions, write_atomic};
use crate::types::ServiceSnapshot;

/// `<home>/.cnwan/services`
pub fn services_dir_at(home: &Path) -> PathBuf {
    cnwan_root(home).join("services")
}

/// `<home>/.cnwan/services/<namespace>.<service>.yaml`: pure, no I/O.
pub fn snapshot_path_at(home: &Path, snapshot: &ServiceSnapshot) -> PathBuf {
    services_dir_at(home).join(format!("{}.{}.yaml", snapshot.namespace, snapshot.name))
}

/// Whether `path` looks like a snapshot file (`*.yaml` / `*.yml`).
pub fn is_snapshot_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Load and validate a single snapshot file.
pub fn load_snapshot(path: &Path) -> Result<ServiceSnapshot, CoreError> {
    let contents = std::fs::read_to_string(path)?;
    let snapshot: ServiceSnapshot = serde_yaml::from_str(&contents).map_err(|e| {
        CoreError::Parse {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Walk `<home>/.cnwan/services/*.yaml` and load every snapshot.
///
/// Results are sorted by file name. A malformed file fails the whole listing
/// with its path in the error.
pub fn list_snapshots_at(home: &Path) -> Result<Vec<(PathBuf, ServiceSnapshot)>, CoreError> {
    let dir = services_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_snapshot_file(p))
        .collect();
    entries.sort();

    entries
        .into_iter()
        .map(|path| load_snapshot(&path).map(|snap| (path, snap)))
        .collect()
}

/// Atomically write a snapshot into the services directory.
pub fn save_snapshot_at(home: &Path, snapshot: &ServiceSnapshot) -> Result<PathBuf, CoreError> {
    snapshot.validate()?;
    let dir = services_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = snapshot_path_at(home, snapshot);
    let yaml = serde_yaml::to_string(snapshot)?;
    write_atomic(&path, &yaml)?;
    Ok(path)
}
