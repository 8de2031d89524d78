use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cnwan_core::ServiceSnapshot;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ServiceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Default::default()
        }
    }

    pub fn apply(snapshot: ServiceSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::command("apply")
        }
    }

    pub fn delete(namespace: &str, service: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            service: Some(service.to_string()),
            ..Self::command("delete")
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Status, retried briefly while the socket is still coming up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Queue a create-or-update and wait for its summary.
pub fn request_apply(home: &Path, snapshot: ServiceSnapshot) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::apply(snapshot))?;
    response_into_data(response)
}

/// Queue a cascading delete and wait for its summary.
pub fn request_delete(home: &Path, namespace: &str, service: &str) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::delete(namespace, service))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnwan_core::EndpointSnapshot;

    #[test]
    fn plain_commands_serialize_without_optional_fields() {
        let json = serde_json::to_string(&DaemonRequest::command("status")).expect("encode");
        assert_eq!(json, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn apply_request_carries_the_snapshot() {
        let snapshot = ServiceSnapshot::new("ns", "svc")
            .with_endpoint(EndpointSnapshot::new("e1", "10.0.0.1", 8080));
        let line = serde_json::to_string(&DaemonRequest::apply(snapshot.clone())).expect("encode");
        let decoded: DaemonRequest = serde_json::from_str(&line).expect("decode");
        assert_eq!(decoded.cmd, "apply");
        assert_eq!(decoded.snapshot, Some(snapshot));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = send_request(home.path(), &DaemonRequest::command("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(message) if message == "boom"));
    }
}
