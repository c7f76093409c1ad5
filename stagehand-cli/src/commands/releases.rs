//! `stagehand releases <app>` and `stagehand prune <app> [--keep N]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::open_app;

#[derive(Args, Debug)]
pub struct ReleasesArgs {
    pub app: String,
}

impl ReleasesArgs {
    pub fn run(self) -> Result<()> {
        let deployer = open_app(&self.app)?;
        let store = deployer.store();
        let current = store
            .current()
            .with_context(|| format!("failed to read live release of '{}'", self.app))?;
        let releases = store
            .list()
            .with_context(|| format!("failed to list releases of '{}'", self.app))?;

        if releases.is_empty() {
            println!("No releases for '{}'.", self.app);
            return Ok(());
        }

        for release in releases.iter().rev() {
            if current.as_ref() == Some(release) {
                println!("{} {} (live)", "*".green().bold(), release.to_string().bold());
            } else {
                println!("  {release}");
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    pub app: String,

    /// Newest releases to keep besides the live one. Defaults to `keep_releases`.
    #[arg(long)]
    pub keep: Option<usize>,
}

impl PruneArgs {
    pub fn run(self) -> Result<()> {
        let deployer = open_app(&self.app)?;
        let keep = self.keep.unwrap_or(deployer.config().keep_releases);
        let removed = deployer
            .prune(keep)
            .with_context(|| format!("prune failed for '{}'", self.app))?;

        if removed.is_empty() {
            println!("✓ '{}': nothing to prune (keeping {keep})", self.app);
            return Ok(());
        }
        println!("✓ '{}' pruned {} release(s)", self.app, removed.len());
        for release in removed {
            println!("  -  {release}");
        }
        Ok(())
    }
}
