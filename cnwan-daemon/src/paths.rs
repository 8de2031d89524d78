use std::path::{Path, PathBuf};
use std::time::Duration;

pub use cnwan_core::settings::cnwan_root;
pub use cnwan_core::snapshot::services_dir_at as services_dir;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    cnwan_root(home).join(DAEMON_SOCKET)
}

/// Set to any value to make the daemon log one JSON object per line.
pub const LOG_JSON_ENV: &str = "CNWAN_LOG_JSON";
