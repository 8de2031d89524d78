//! `cnwan status`: watched snapshot files joined with the daemon's last
//! result per service.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use cnwan_core::snapshot;
use cnwan_daemon::{request_status, DaemonError};

/// Arguments for `cnwan status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let report = build_report(&home)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    daemon_running: bool,
    target: Option<String>,
    services: Vec<ServiceRow>,
}

#[derive(Debug, Serialize)]
struct ServiceRow {
    namespace: String,
    service: String,
    endpoints: usize,
    file: Option<String>,
    last_result: Option<String>,
    last_sync_at_unix: Option<u64>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "endpoints")]
    endpoints: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "last result")]
    last_result: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
}

fn build_report(home: &Path) -> Result<StatusReport> {
    let snapshots = snapshot::list_snapshots_at(home).context("failed to read snapshot files")?;

    let daemon = match request_status(home) {
        Ok(status) => Some(status),
        Err(DaemonError::DaemonNotRunning { .. }) => None,
        Err(err) => return Err(err).context("failed to query daemon status"),
    };

    // (namespace, service) → (result, last sync)
    let mut results: HashMap<(String, String), (String, u64)> = HashMap::new();
    if let Some(services) = daemon
        .as_ref()
        .and_then(|d| d.get("services"))
        .and_then(Value::as_array)
    {
        for entry in services {
            let text = |key: &str| entry.get(key).and_then(Value::as_str).unwrap_or_default();
            let result = if entry.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                format!("{} ok", text("action"))
            } else {
                format!("{} failed: {}", text("action"), text("error"))
            };
            let at = entry
                .get("last_sync_at_unix")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            results.insert((text("namespace").to_string(), text("service").to_string()), (result, at));
        }
    }

    let mut rows: Vec<ServiceRow> = snapshots
        .into_iter()
        .map(|(path, snapshot)| {
            let key = (snapshot.namespace.0.clone(), snapshot.name.0.clone());
            let last = results.remove(&key);
            ServiceRow {
                namespace: key.0,
                service: key.1,
                endpoints: snapshot.endpoints.len(),
                file: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                last_result: last.as_ref().map(|(r, _)| r.clone()),
                last_sync_at_unix: last.map(|(_, at)| at),
            }
        })
        .collect();

    // Services the daemon touched whose file is gone (typically deleted).
    for ((namespace, service), (result, at)) in results {
        rows.push(ServiceRow {
            namespace,
            service,
            endpoints: 0,
            file: None,
            last_result: Some(result),
            last_sync_at_unix: Some(at),
        });
    }
    rows.sort_by(|a, b| (&a.namespace, &a.service).cmp(&(&b.namespace, &b.service)));

    Ok(StatusReport {
        daemon_running: daemon.is_some(),
        target: daemon
            .as_ref()
            .and_then(|d| d.get("target"))
            .and_then(Value::as_str)
            .map(str::to_string),
        services: rows,
    })
}

fn print_table(report: StatusReport) {
    let daemon = if report.daemon_running {
        "daemon running".green().to_string()
    } else {
        "daemon stopped".bright_black().to_string()
    };
    println!(
        "cnwan v{} | {} | {} services{}",
        env!("CARGO_PKG_VERSION"),
        daemon,
        report.services.len(),
        report
            .target
            .as_deref()
            .map(|t| format!(" | {t}"))
            .unwrap_or_default(),
    );

    if report.services.is_empty() {
        println!("No snapshot files under ~/.cnwan/services/.");
        return;
    }

    let now = unix_seconds_now();
    let rows: Vec<StatusTableRow> = report
        .services
        .into_iter()
        .map(|row| StatusTableRow {
            service: format!("{}/{}", row.namespace, row.service),
            endpoints: if row.file.is_some() {
                row.endpoints.to_string()
            } else {
                "-".to_string()
            },
            file: row.file.unwrap_or_else(|| "(removed)".to_string()),
            last_result: row.last_result.unwrap_or_else(|| "-".to_string()),
            last_sync: row
                .last_sync_at_unix
                .map(|at| format_age(now.saturating_sub(at)))
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn format_age(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3_599 => format!("{}m ago", seconds / 60),
        3_600..=86_399 => format!("{}h ago", seconds / 3_600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
