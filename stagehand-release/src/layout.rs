//! Paths under a target's deploy root.
//!
//! ```text
//! <root>/
//!   staging/<release>/
//!   releases/<release>/
//!   current -> releases/<release>
//!   envs/<fingerprint>/
//!   run/<app>.pid
//!   logs/<app>.log
//! ```

use std::path::{Path, PathBuf};

use stagehand_core::types::{AppName, ReleaseId};

/// Per-file manifest (relative path → SHA-256) stored in every release.
pub const MANIFEST_FILE: &str = ".stagehand-manifest.json";
/// `sha256sum -c` input stored in every release.
pub const CHECKSUM_FILE: &str = ".stagehand-sha256";
/// Fingerprint of the execution environment linked into the release.
pub const ENV_MARKER_FILE: &str = ".stagehand-env";
/// Launcher script written by the pidfile supervisor.
pub const LAUNCHER_FILE: &str = ".stagehand-launch.sh";

/// Every path stagehand touches on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    root: PathBuf,
    app: AppName,
}

impl ReleaseLayout {
    pub fn new(root: impl Into<PathBuf>, app: AppName) -> Self {
        Self {
            root: root.into(),
            app,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn staging(&self, id: &ReleaseId) -> PathBuf {
        self.staging_dir().join(id.as_str())
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    pub fn release(&self, id: &ReleaseId) -> PathBuf {
        self.releases_dir().join(id.as_str())
    }

    /// The live pointer.
    pub fn current(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    pub fn env(&self, fingerprint: &str) -> PathBuf {
        self.envs_dir().join(fingerprint)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("run").join(format!("{}.pid", self.app))
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("logs").join(format!("{}.log", self.app))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_root() {
        let layout = ReleaseLayout::new("/srv/app", AppName::from("web"));
        let id = ReleaseId::from("20260101T000000Z-abcdef12");
        assert_eq!(layout.staging(&id), PathBuf::from("/srv/app/staging/20260101T000000Z-abcdef12"));
        assert_eq!(layout.release(&id), PathBuf::from("/srv/app/releases/20260101T000000Z-abcdef12"));
        assert_eq!(layout.current(), PathBuf::from("/srv/app/current"));
        assert_eq!(layout.env("0123"), PathBuf::from("/srv/app/envs/0123"));
        assert_eq!(layout.pid_file(), PathBuf::from("/srv/app/run/web.pid"));
        assert_eq!(layout.log_file(), PathBuf::from("/srv/app/logs/web.log"));
    }
}
