//! `stagehand history <app> [--limit N]`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use stagehand_deploy::DeployKind;

use super::open_app;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    pub app: String,

    /// Show at most this many records.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "deploy")]
    id: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "release")]
    release: String,
    #[tabled(rename = "files")]
    files: String,
    #[tabled(rename = "error")]
    error: String,
}

impl HistoryArgs {
    pub fn run(self) -> Result<()> {
        let records = open_app(&self.app)?
            .history(Some(self.limit))
            .with_context(|| format!("failed to read deploy history of '{}'", self.app))?;

        if records.is_empty() {
            println!("No deployments recorded for '{}'.", self.app);
            return Ok(());
        }

        let rows: Vec<HistoryRow> = records
            .into_iter()
            .map(|rec| HistoryRow {
                id: rec.id.to_string(),
                kind: match rec.kind {
                    DeployKind::Deploy => "deploy",
                    DeployKind::Rollback => "rollback",
                }
                .to_string(),
                phase: rec.phase.to_string(),
                release: rec.release.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                files: match rec.kind {
                    DeployKind::Deploy => format!("{}↑ {}=", rec.uploaded, rec.reused),
                    DeployKind::Rollback => "-".to_string(),
                },
                error: rec.error.unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
