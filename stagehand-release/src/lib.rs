//! # stagehand-release
//!
//! Source manifests and release management on a deploy target.
//!
//! Build a [`ReleaseStore`] from a transport and a [`ReleaseLayout`], then
//! [`plan`](ReleaseStore::plan), [`stage`](ReleaseStore::stage) and
//! [`activate`](ReleaseStore::activate). [`drift::check`] and
//! [`diff::diff_app`] compare the source tree with what is live.

pub mod diff;
pub mod drift;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod store;

pub use drift::DriftSignal;
pub use error::ReleaseError;
pub use layout::ReleaseLayout;
pub use manifest::Manifest;
pub use store::{ReleaseStore, StagePlan, StagedRelease};
