//! Stagehand core library: domain types, app registry persistence, errors.
//!
//! - [`types`]: newtypes and config structs
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: load / save / register
//! - [`config`]: secret overrides and resolved loading

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use types::{
    AppConfig, AppName, DeployId, HealthConfig, HealthProbe, ProcessConfig, ReleaseId,
    RuntimeConfig, RuntimeKind, SupervisorKind, SystemdConfig, TargetConfig, TransportKind,
};
