use std::path::{Path, PathBuf};
use std::time::Duration;

use stagehand_core::registry::stagehand_root;

/// Quiet period after the last source change before an auto-deploy fires.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn apps_dir(home: &Path) -> PathBuf {
    stagehand_root(home).join("apps")
}

pub fn socket_path(home: &Path) -> PathBuf {
    stagehand_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    stagehand_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
