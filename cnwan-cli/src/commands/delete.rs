//! `cnwan delete <namespace> <service>`

use anyhow::{Context, Result};
use clap::Args;

use cnwan_core::{NamespaceName, ServiceName};
use cnwan_daemon::request_delete;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub namespace: String,

    pub service: String,

    /// Read the registry but send no mutations.
    #[arg(long, conflicts_with = "daemon")]
    pub dry_run: bool,

    /// Queue the delete on the running daemon.
    #[arg(long)]
    pub daemon: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DeleteArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;

        if self.daemon {
            let summary = request_delete(&home, &self.namespace, &self.service)
                .context("daemon could not delete service")?;
            return super::print_daemon_summary("deleted", &summary, self.json);
        }

        let settings = super::load_settings(&home)?;
        let coordinator = super::coordinator(settings, self.dry_run);
        let namespace = NamespaceName::from(self.namespace);
        let service = ServiceName::from(self.service);
        let report = coordinator
            .delete(&namespace, &service)
            .with_context(|| format!("delete failed for {namespace}/{service}"))?;

        super::print_report("deleted", &report, self.dry_run, self.json)
    }
}
