//! cnwan: publish service snapshots into a service registry.
//!
//! # Usage
//!
//! ```text
//! cnwan init --project <p> --region <r> [--api-base-url <url>] [--token-env <VAR>]
//! cnwan apply <snapshot.yaml> [--dry-run] [--daemon] [--json]
//! cnwan delete <namespace> <service> [--dry-run] [--daemon] [--json]
//! cnwan status [--json]
//! cnwan daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs, daemon::DaemonCommand, delete::DeleteArgs, init::InitArgs,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cnwan",
    version,
    about = "Reconcile service snapshots into a service registry",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the settings file (target project, region, API).
    Init(InitArgs),

    /// Create or update one service from a snapshot file.
    Apply(ApplyArgs),

    /// Delete one service, its endpoints and, once empty, its namespace.
    Delete(DeleteArgs),

    /// Show watched snapshot files and the daemon's last results.
    Status(StatusArgs),

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Apply(args) => args.run(),
        Commands::Delete(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
