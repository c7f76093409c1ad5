//! `stagehand deploy` and `stagehand rollback`.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use stagehand_deploy::{DeployKind, DeployRecord, Phase};

use super::open_app;

/// Arguments for `stagehand deploy`.
#[derive(Args, Debug)]
pub struct DeployArgs {
    pub app: String,

    /// Show what would be uploaded and reused without touching the target.
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployArgs {
    pub fn run(self) -> Result<()> {
        let deployer = open_app(&self.app)?;

        if self.dry_run {
            let plan = deployer
                .plan()
                .with_context(|| format!("planning failed for '{}'", self.app))?;
            let previous = plan
                .plan
                .previous
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none".to_string());
            println!(
                "[dry-run] '{}' → release {} (live: {previous})",
                self.app, plan.plan.release
            );
            println!(
                "  {} files: {} to upload, {} reused",
                plan.files,
                plan.plan.upload.len(),
                plan.plan.reuse.len()
            );
            for path in &plan.plan.upload {
                println!("  ~  {path}");
            }
            return Ok(());
        }

        let record = deployer
            .deploy()
            .with_context(|| format!("deploy failed for '{}'", self.app))?;
        report(&record)
    }
}

/// Arguments for `stagehand rollback`.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    pub app: String,
}

impl RollbackArgs {
    pub fn run(self) -> Result<()> {
        let record = open_app(&self.app)?
            .rollback()
            .with_context(|| format!("rollback failed for '{}'", self.app))?;
        report(&record)
    }
}

/// Print the outcome; anything but `Succeeded` becomes an error.
fn report(record: &DeployRecord) -> Result<()> {
    let (verb, done) = match record.kind {
        DeployKind::Deploy => ("deploy", "deployed"),
        DeployKind::Rollback => ("rollback", "rolled back to"),
    };
    let release = record
        .release
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());

    if record.succeeded() {
        println!("{} '{}' {done} release {release}", "✓".green(), record.app);
        if record.kind == DeployKind::Deploy {
            println!(
                "  {} uploaded, {} reused, environment {}",
                record.uploaded,
                record.reused,
                record.environment.as_deref().unwrap_or("none")
            );
        }
        if let Some(attempts) = record.health_attempts {
            println!("  healthy after {attempts} attempt(s)");
        }
        println!("  record {}", record.id);
        return Ok(());
    }

    let mark = match record.phase {
        Phase::RolledBack => "↺".yellow(),
        _ => "✗".red(),
    };
    println!(
        "{mark} '{}' {verb} of {release} ended {}",
        record.app,
        record.phase.to_string().bold()
    );
    if let Some(previous) = &record.previous {
        if record.phase == Phase::RolledBack {
            println!("  live release restored to {previous}");
        }
    }
    println!("  record {}", record.id);
    bail!(
        "{verb} of '{}' ended {}: {}",
        record.app,
        record.phase,
        record.error.as_deref().unwrap_or("unknown error")
    )
}
