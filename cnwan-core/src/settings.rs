//! Process settings: target project, region, and remote API location.
//!
//! # Storage layout
//!
//! ```text
//! ~/.cnwan/
//!   settings.yaml      (mode 0600, written by `cnwan init`)
//!   services/          (one snapshot file per service, see [`crate::snapshot`])
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//!
//! Callers resolve the real home once with [`home`] and pass it down.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_API_BASE_URL: &str = "https://servicedirectory.googleapis.com/v1beta1";
pub const DEFAULT_TOKEN_ENV: &str = "CNWAN_ACCESS_TOKEN";

pub const PROJECT_ENV: &str = "CNWAN_PROJECT";
pub const REGION_ENV: &str = "CNWAN_REGION";

/// Settings consumed by the sync engine and the remote client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub project: String,
    pub region: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl Settings {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            api_base_url: default_api_base_url(),
            token_env: default_token_env(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.project.trim().is_empty() {
            return Err(CoreError::InvalidSettings("project is empty".into()));
        }
        if self.region.trim().is_empty() {
            return Err(CoreError::InvalidSettings("region is empty".into()));
        }
        Ok(())
    }

    /// Apply `CNWAN_PROJECT` / `CNWAN_REGION` when set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(PROJECT_ENV).ok(),
            std::env::var(REGION_ENV).ok(),
        )
    }

    fn with_overrides(mut self, project: Option<String>, region: Option<String>) -> Self {
        if let Some(project) = project.filter(|p| !p.is_empty()) {
            self.project = project;
        }
        if let Some(region) = region.filter(|r| !r.is_empty()) {
            self.region = region;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Shared, hot-swappable settings.
///
/// Readers call [`SettingsHandle::load`] every time they need a value, so a
/// [`SettingsHandle::store`] is visible to the very next call.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<ArcSwap<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    pub fn load(&self) -> Arc<Settings> {
        self.inner.load_full()
    }

    pub fn store(&self, settings: Settings) {
        self.inner.store(Arc::new(settings));
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.cnwan`
pub fn cnwan_root(home: &Path) -> PathBuf {
    home.join(".cnwan")
}

/// `<home>/.cnwan/settings.yaml`: pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    cnwan_root(home).join("settings.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.cnwan/settings.yaml`.
///
/// Returns `CoreError::SettingsNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML, and
/// `CoreError::InvalidSettings` if project or region is empty.
pub fn load_settings_at(home: &Path) -> Result<Settings, CoreError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Err(CoreError::SettingsNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let settings: Settings =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically save settings to `<home>/.cnwan/settings.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_settings_at(home: &Path, settings: &Settings) -> Result<PathBuf, CoreError> {
    settings.validate()?;
    let root = cnwan_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = settings_path_at(home);
    let yaml = serde_yaml::to_string(settings)?;
    write_atomic(&path, &yaml)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Crate helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), CoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp_path, contents)?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
