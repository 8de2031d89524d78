//! cnwan core library: domain types, settings, snapshot files, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and desired-state snapshots
//! - [`error`]: [`CoreError`]
//! - [`settings`]: settings file load / save and the shared [`SettingsHandle`]
//! - [`snapshot`]: per-service snapshot files under `~/.cnwan/services/`

pub mod error;
pub mod settings;
pub mod snapshot;
pub mod types;

pub use error::CoreError;
pub use settings::{Settings, SettingsHandle};
pub use types::{EndpointName, EndpointSnapshot, Metadata, NamespaceName, ServiceName, ServiceSnapshot};
