//! # stagehand-deploy
//!
//! Turns a staged release into a running one.
//!
//! - [`env`]: runtime environments shared between releases by fingerprint
//! - [`supervisor`]: pidfile and systemd process control
//! - [`health`]: HTTP health gate with capped exponential backoff
//! - [`machine`]: deployment phases and the persisted [`DeployRecord`]
//! - [`records`]: `~/.stagehand/deployments/` store
//! - [`lock`]: one deploy per app at a time
//! - [`pipeline`]: [`Deployer`], the entry point used by the CLI and the daemon

pub mod env;
pub mod error;
pub mod health;
pub mod lock;
pub mod machine;
pub mod pipeline;
pub mod records;
pub mod supervisor;

pub use error::DeployError;
pub use machine::{DeployKind, DeployRecord, Phase};
pub use pipeline::{AppStatus, DeployPlan, Deployer};
pub use records::RecordStore;
pub use supervisor::{ProcessStatus, ProcessSupervisor, StopOutcome};
