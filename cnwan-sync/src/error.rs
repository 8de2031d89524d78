//! Error types for cnwan-sync.

use thiserror::Error;

use cnwan_core::CoreError;

/// Failures reported by a [`crate::registry::ServiceRegistry`] implementation.
///
/// Get-style operations never surface `NotFound`; they return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{path} not found")]
    NotFound { path: String },

    #[error("{path} already exists")]
    AlreadyExists { path: String },

    /// Any other non-success status returned by the remote registry.
    #[error("remote registry returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// All errors a reconciliation call can return to its caller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The primary resource of the call (namespace, service) could not be
    /// read, created, updated or deleted.
    #[error("remote call on {path} failed: {source}")]
    Remote {
        path: String,
        #[source]
        source: RegistryError,
    },

    /// A listing whose full contents decide the outcome stopped early.
    #[error("listing under {parent} failed mid-stream: {source}")]
    Listing {
        parent: String,
        #[source]
        source: RegistryError,
    },

    /// The desired state handed in was rejected before any remote call.
    #[error("invalid input: {0}")]
    Core(#[from] CoreError),
}

/// Convenience constructor for [`SyncError::Remote`].
pub(crate) fn remote_err(path: impl Into<String>, source: RegistryError) -> SyncError {
    SyncError::Remote {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Listing`].
pub(crate) fn listing_err(parent: impl Into<String>, source: RegistryError) -> SyncError {
    SyncError::Listing {
        parent: parent.into(),
        source,
    }
}
