pub mod apply;
pub mod daemon;
pub mod delete;
pub mod init;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use cnwan_core::{settings, Settings, SettingsHandle};
use cnwan_sync::{
    DirectoryClient, DryRun, Outcome, PathResolver, ResourceKind, ServiceRegistry,
    SyncCoordinator, SyncReport,
};

pub(crate) fn home() -> Result<PathBuf> {
    settings::home().context("could not determine home directory")
}

pub(crate) fn load_settings(home: &Path) -> Result<Settings> {
    let settings = settings::load_settings_at(home)
        .context("failed to load settings")?
        .with_env_overrides();
    settings.validate().context("settings are not usable")?;
    Ok(settings)
}

/// Coordinator against the configured registry. With `dry_run` no mutation
/// leaves the process.
pub(crate) fn coordinator(settings: Settings, dry_run: bool) -> SyncCoordinator {
    let handle = SettingsHandle::new(settings);
    let client = DirectoryClient::new(handle.clone());
    let registry: Arc<dyn ServiceRegistry> = if dry_run {
        Arc::new(DryRun::new(client))
    } else {
        Arc::new(client)
    };
    SyncCoordinator::new(registry, PathResolver::new(handle))
}

// ---------------------------------------------------------------------------
// Report output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "resource")]
    path: String,
    #[tabled(rename = "result")]
    outcome: String,
}

pub(crate) fn print_report(verb: &str, report: &SyncReport, dry_run: bool, as_json: bool) -> Result<()> {
    if as_json {
        let payload = json!({ "dry_run": dry_run, "report": report });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize report JSON")?
        );
        return Ok(());
    }

    let prefix = if dry_run { "[dry-run] " } else { "" };
    let failed = report.failures().count();
    let mark = if failed == 0 { "✓".green() } else { "✗".red() };
    println!(
        "{prefix}{mark} {}/{} {verb} ({} created, {} updated, {} deleted, {} failed)",
        report.namespace,
        report.service,
        total(report, |o| matches!(o, Outcome::Created)),
        total(report, |o| matches!(o, Outcome::Updated)),
        total(report, |o| matches!(o, Outcome::Deleted)),
        failed,
    );

    if report.changes.is_empty() {
        println!("  nothing to do");
        return Ok(());
    }

    let rows: Vec<ChangeRow> = report
        .changes
        .iter()
        .map(|change| ChangeRow {
            kind: change.kind.to_string(),
            path: change.path.clone(),
            outcome: outcome_label(&change.outcome),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Print the summary the daemon returns for a queued apply or delete.
pub(crate) fn print_daemon_summary(verb: &str, summary: &Value, as_json: bool) -> Result<()> {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).context("failed to serialize summary JSON")?
        );
        return Ok(());
    }

    let field = |name: &str| summary.get(name).and_then(Value::as_u64).unwrap_or(0);
    let text = |name: &str| {
        summary
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string()
    };
    let mark = if field("failed") == 0 { "✓".green() } else { "✗".red() };
    println!(
        "{mark} {}/{} {verb} via daemon ({} created, {} updated, {} deleted, {} failed, {} ms)",
        text("namespace"),
        text("service"),
        field("created"),
        field("updated"),
        field("deleted"),
        field("failed"),
        field("duration_ms"),
    );
    Ok(())
}

fn total(report: &SyncReport, pred: fn(&Outcome) -> bool) -> usize {
    [ResourceKind::Namespace, ResourceKind::Service, ResourceKind::Endpoint]
        .into_iter()
        .map(|kind| report.count(kind, pred))
        .sum()
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Created => "created".to_string(),
        Outcome::Updated => "updated".to_string(),
        Outcome::Deleted => "deleted".to_string(),
        Outcome::Unchanged => "unchanged".to_string(),
        Outcome::Kept { reason } => format!("kept: {reason}"),
        Outcome::SkippedForeign => "not owned, skipped".to_string(),
        Outcome::Blocked { by } => format!("blocked by {by}"),
        Outcome::RolledBack => "rolled back".to_string(),
        Outcome::Failed { reason } => format!("FAILED: {reason}"),
    }
}
