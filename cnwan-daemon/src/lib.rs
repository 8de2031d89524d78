//! cnwan daemon: snapshot directory watcher, serialized sync worker and a
//! local control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_apply, request_delete, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{
    run, run_with, start_blocking, ServiceKey, ServiceStatus, SnapshotCache, StatusMap,
    SyncSummary,
};
