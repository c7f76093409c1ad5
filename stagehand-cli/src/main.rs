//! Stagehand: push-to-deploy for small web apps.
//!
//! # Usage
//!
//! ```text
//! stagehand init <source> --app <name> [--root <dir>] [--transport local|shell]
//!                [--host H --user U --identity F] [--supervisor pidfile|systemd] [--no-detect]
//! stagehand apps
//! stagehand deploy <app> [--dry-run]
//! stagehand rollback <app>
//! stagehand releases <app>
//! stagehand status [--json]
//! stagehand diff <app>
//! stagehand health <app>
//! stagehand prune <app> [--keep N]
//! stagehand history <app> [--limit N]
//! stagehand daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apps::AppsArgs,
    daemon::DaemonCommand,
    deploy::{DeployArgs, RollbackArgs},
    diff::DiffArgs,
    health::HealthArgs,
    history::HistoryArgs,
    init::InitArgs,
    releases::{PruneArgs, ReleasesArgs},
    status::StatusArgs,
};
use stagehand_daemon::init_tracing;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stagehand",
    version,
    about = "Deploy web apps into versioned releases with health-gated rollback",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a source tree as an app.
    Init(InitArgs),

    /// List registered apps.
    Apps(AppsArgs),

    /// Stage, activate, restart and health-check the app's source tree.
    Deploy(DeployArgs),

    /// Switch the app back to the release before the live one.
    Rollback(RollbackArgs),

    /// List releases on the app's target.
    Releases(ReleasesArgs),

    /// Show live release, process state and drift for every app.
    Status(StatusArgs),

    /// Unified diff between the live release and the source tree.
    Diff(DiffArgs),

    /// Run the health gate against the live app.
    Health(HealthArgs),

    /// Remove old releases and unused environments.
    Prune(PruneArgs),

    /// Show recorded deployments, newest first.
    History(HistoryArgs),

    /// Manage the background auto-deploy daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

impl Commands {
    /// Progress of long-running commands is worth seeing; everything else
    /// only reports warnings.
    fn default_log_level(&self) -> &'static str {
        match self {
            Commands::Deploy(args) if !args.dry_run => "info",
            Commands::Rollback(_) | Commands::Daemon { command: DaemonCommand::Start(_) } => "info",
            _ => "warn",
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.command.default_log_level());
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Apps(args) => args.run(),
        Commands::Deploy(args) => args.run(),
        Commands::Rollback(args) => args.run(),
        Commands::Releases(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Health(args) => args.run(),
        Commands::Prune(args) => args.run(),
        Commands::History(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
