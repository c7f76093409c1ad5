//! # stagehand-renderer
//!
//! Tera templates for the files a process supervisor needs on the target:
//! the detached launcher script and the systemd unit.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use stagehand_core::types::AppConfig;
//! use stagehand_renderer::{Artefact, Renderer, SupervisorContext};
//!
//! fn unit_for(config: &AppConfig) -> Option<String> {
//!     let renderer = Renderer::new(None).ok()?;
//!     let ctx = SupervisorContext::new(
//!         config,
//!         &config.target.root.join("current"),
//!         &config.target.root.join("logs/app.log"),
//!         &config.target.root.join("run/app.pid"),
//!     );
//!     renderer.render(Artefact::SystemdUnit, &ctx).ok()
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{systemd_quote, EnvVar, SupervisorContext};
pub use engine::{templates_dir_at, Artefact, Renderer};
pub use error::RenderError;
