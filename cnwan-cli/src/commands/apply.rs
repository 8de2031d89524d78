//! `cnwan apply`: create or update one service from a snapshot file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use cnwan_core::snapshot;
use cnwan_daemon::request_apply;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Snapshot file (YAML) describing the service and its endpoints.
    pub file: PathBuf,

    /// Read the registry but send no mutations.
    #[arg(long, conflicts_with = "daemon")]
    pub dry_run: bool,

    /// Queue the apply on the running daemon instead of running it here.
    #[arg(long)]
    pub daemon: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let snapshot = snapshot::load_snapshot(&self.file)
            .with_context(|| format!("cannot read snapshot '{}'", self.file.display()))?;

        if self.daemon {
            let summary =
                request_apply(&home, snapshot).context("daemon could not apply snapshot")?;
            return super::print_daemon_summary("applied", &summary, self.json);
        }

        let settings = super::load_settings(&home)?;
        let coordinator = super::coordinator(settings, self.dry_run);
        let report = coordinator
            .create_or_update(&snapshot)
            .with_context(|| format!("apply failed for {}/{}", snapshot.namespace, snapshot.name))?;

        super::print_report("applied", &report, self.dry_run, self.json)
    }
}
