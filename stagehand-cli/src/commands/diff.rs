//! `stagehand diff <app>`: what the next deploy would change.

use anyhow::{Context, Result};
use clap::Args;

use super::open_app;

/// Arguments for `stagehand diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    pub app: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let result = open_app(&self.app)?
            .diff()
            .with_context(|| format!("diff failed for '{}'", self.app))?;

        if result.diffs.is_empty() {
            println!("No differences for '{}'.", self.app);
            return Ok(());
        }
        if result.release.is_none() {
            println!("'{}' has no live release; showing every file as added.", self.app);
        }

        for diff in result.diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
