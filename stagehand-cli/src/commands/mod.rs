pub mod apps;
pub mod daemon;
pub mod deploy;
pub mod diff;
pub mod health;
pub mod history;
pub mod init;
pub mod releases;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

use stagehand_core::{config::load_resolved_at, registry, types::AppName};
use stagehand_deploy::Deployer;

pub fn home_dir() -> Result<PathBuf> {
    registry::home().context("could not determine home directory")
}

/// Resolved config for `app` wrapped in a [`Deployer`].
pub fn open_app(app: &str) -> Result<Deployer> {
    let home = home_dir()?;
    let name = AppName::parse(app)?;
    let config = load_resolved_at(&home, &name)
        .with_context(|| format!("failed to load app '{app}' (run `stagehand init` first)"))?;
    Deployer::new(&home, config).with_context(|| format!("failed to prepare deployer for '{app}'"))
}
