//! `stagehand health <app>`

use anyhow::{Context, Result};
use clap::Args;

use super::open_app;

#[derive(Args, Debug)]
pub struct HealthArgs {
    pub app: String,
}

impl HealthArgs {
    pub fn run(self) -> Result<()> {
        let deployer = open_app(&self.app)?;
        let url = deployer.config().health.url.clone();
        let attempts = deployer
            .health_check()
            .with_context(|| format!("'{}' is unhealthy", self.app))?;
        println!("✓ '{}' healthy at {url} (attempt {attempts})", self.app);
        Ok(())
    }
}
