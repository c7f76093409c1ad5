//! `stagehand apps`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use stagehand_core::registry;

use super::home_dir;

#[derive(Args, Debug)]
pub struct AppsArgs {}

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "app")]
    name: String,
    #[tabled(rename = "runtime")]
    runtime: String,
    #[tabled(rename = "supervisor")]
    supervisor: String,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "auto deploy")]
    auto_deploy: String,
}

impl AppsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let apps = registry::list_apps_at(&home).context("failed to load app registry")?;

        if apps.is_empty() {
            println!("No apps registered.");
            println!("Run: stagehand init <source> --app <name>");
            return Ok(());
        }

        let rows: Vec<AppRow> = apps
            .iter()
            .map(|app| AppRow {
                name: app.name.to_string(),
                runtime: app.runtime.kind.to_string(),
                supervisor: app.process.supervisor.to_string(),
                target: match &app.target.host {
                    Some(host) => format!("{host}:{}", app.target.root.display()),
                    None => app.target.root.display().to_string(),
                },
                auto_deploy: if app.auto_deploy { "yes" } else { "no" }.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
