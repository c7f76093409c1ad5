//! `stagehand status`: live release, process state and drift per app.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use stagehand_core::{config::apply_env_overrides, registry, types::AppConfig};
use stagehand_deploy::{Deployer, ProcessStatus};
use stagehand_release::DriftSignal;

use super::home_dir;

/// Arguments for `stagehand status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let apps = registry::list_apps_at(&home)
            .context("failed to load app registry (run `stagehand init` first)")?;

        let rows: Vec<AppStatusRow> = apps
            .into_iter()
            .map(|mut config| {
                apply_env_overrides(&mut config);
                let name = config.name.to_string();
                collect(&home, config).unwrap_or_else(|err| AppStatusRow::unreachable(name, &err))
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&StatusReportJson {
                    apps: rows.len(),
                    drifted: rows.iter().filter(|r| r.drift != "current").count(),
                    rows,
                })
                .context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct AppStatusRow {
    app: String,
    live: Option<String>,
    releases: usize,
    process: String,
    pid: Option<u32>,
    drift: String,
    detail: String,
    last_phase: Option<String>,
    last_deploy_at: Option<DateTime<Utc>>,
}

impl AppStatusRow {
    fn unreachable(app: String, err: &anyhow::Error) -> Self {
        Self {
            app,
            live: None,
            releases: 0,
            process: "unknown".to_string(),
            pid: None,
            drift: "error".to_string(),
            detail: format!("{err:#}"),
            last_phase: None,
            last_deploy_at: None,
        }
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    apps: usize,
    drifted: usize,
    rows: Vec<AppStatusRow>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "app")]
    app: String,
    #[tabled(rename = "live")]
    live: String,
    #[tabled(rename = "process")]
    process: String,
    #[tabled(rename = "drift")]
    drift: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "last deploy")]
    last_deploy: String,
}

fn collect(home: &std::path::Path, config: AppConfig) -> Result<AppStatusRow> {
    let app = config.name.to_string();
    let deployer = Deployer::new(home, config)?;
    let status = deployer.status().with_context(|| format!("status failed for '{app}'"))?;
    let drift = deployer.drift().with_context(|| format!("drift check failed for '{app}'"))?;

    let (process, pid) = match status.process {
        ProcessStatus::Running { pid } => ("running".to_string(), pid),
        ProcessStatus::Stopped => ("stopped".to_string(), None),
    };
    Ok(AppStatusRow {
        app,
        live: status.current.map(|r| r.to_string()),
        releases: status.releases.len(),
        process,
        pid,
        drift: drift_key(&drift).to_string(),
        detail: drift_detail(&drift),
        last_phase: status.last.as_ref().map(|r| r.phase.to_string()),
        last_deploy_at: status.last.map(|r| r.finished_at.unwrap_or(r.started_at)),
    })
}

fn print_table(rows: Vec<AppStatusRow>) {
    println!(
        "Stagehand v{} | {} apps | {} drifted",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        rows.iter().filter(|r| r.drift != "current").count(),
    );
    if rows.is_empty() {
        println!("No apps registered.");
        return;
    }

    let pending = rows.iter().any(|r| r.drift == "pending");
    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            process: match row.pid {
                Some(pid) => format!("{} ({pid})", row.process),
                None => row.process,
            },
            live: row.live.unwrap_or_else(|| "-".to_string()),
            drift: drift_indicator(&row.drift),
            detail: row.detail,
            last_deploy: match (row.last_phase, row.last_deploy_at) {
                (Some(phase), Some(at)) => format!("{phase}, {}", format_age(at, Utc::now())),
                _ => "never".to_string(),
            },
            app: row.app,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if pending {
        println!("Run 'stagehand deploy <app>' to ship pending changes.");
    }
}

fn drift_key(signal: &DriftSignal) -> &'static str {
    match signal {
        DriftSignal::NeverDeployed => "never_deployed",
        DriftSignal::Current { .. } => "current",
        DriftSignal::Pending { .. } => "pending",
        DriftSignal::Missing { .. } => "missing",
        DriftSignal::Modified { .. } => "modified",
    }
}

fn drift_indicator(key: &str) -> String {
    let label = key.replace('_', " ").to_uppercase();
    match key {
        "current" => label.green().bold().to_string(),
        "pending" => label.yellow().bold().to_string(),
        "missing" | "modified" | "error" => label.red().bold().to_string(),
        _ => label.bright_black().bold().to_string(),
    }
}

fn drift_detail(signal: &DriftSignal) -> String {
    match signal {
        DriftSignal::NeverDeployed => "nothing live".to_string(),
        DriftSignal::Current { .. } => "up to date".to_string(),
        DriftSignal::Pending { changed, .. } => format!("{} changed", summarize_files(changed)),
        DriftSignal::Missing { files, .. } => format!("{} missing on target", summarize_files(files)),
        DriftSignal::Modified { files, .. } => format!("{} edited on target", summarize_files(files)),
    }
}

fn summarize_files(files: &[String]) -> String {
    if files.is_empty() {
        return "unknown file".to_string();
    }
    let mut names: Vec<String> = files.iter().take(2).cloned().collect();
    if files.len() > names.len() {
        names.push(format!("+{} more", files.len() - names.len()));
    }
    names.join(", ")
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
