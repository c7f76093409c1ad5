//! Size-based rotation of the daemon's stdout/stderr logs.
//!
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.<keep>`; the oldest copy
//! is dropped and a fresh empty log takes the original name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{stderr_log_path, stdout_log_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, five copies.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            keep: 5,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log` if it is at least `max_bytes`. Missing files are skipped.
    pub fn rotate(&self, log: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes {
            return Ok(false);
        }

        remove_if_exists(&numbered(log, self.keep))?;
        for n in (1..self.keep).rev() {
            let from = numbered(log, n);
            if from.exists() {
                fs::rename(&from, numbered(log, n + 1))?;
            }
        }
        if self.keep > 0 {
            fs::rename(log, numbered(log, 1))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log)?;
        Ok(true)
    }
}

/// Rotate both daemon logs under `home`; failures are logged, not returned.
pub fn rotate_logs(home: &Path, policy: RotationPolicy) {
    for log in [stdout_log_path(home), stderr_log_path(home)] {
        match policy.rotate(&log) {
            Ok(true) => tracing::info!(path = %log.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
        }
    }
}

fn numbered(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small() -> RotationPolicy {
        RotationPolicy {
            max_bytes: 16,
            keep: 3,
        }
    }

    #[test]
    fn under_threshold_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, "short").unwrap();
        assert!(!small().rotate(&log).unwrap());
        assert!(!numbered(&log, 1).exists());
    }

    #[test]
    fn oversized_log_moves_to_dot_one() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, "x".repeat(32)).unwrap();

        assert!(small().rotate(&log).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(fs::read_to_string(numbered(&log, 1)).unwrap().len(), 32);
    }

    #[test]
    fn copies_beyond_keep_are_dropped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        for round in 0..5 {
            fs::write(&log, format!("round-{round}-").repeat(4)).unwrap();
            small().rotate(&log).unwrap();
        }
        assert!(fs::read_to_string(numbered(&log, 1)).unwrap().starts_with("round-4"));
        assert!(fs::read_to_string(numbered(&log, 3)).unwrap().starts_with("round-2"));
        assert!(!numbered(&log, 4).exists());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(!small().rotate(&dir.path().join("none.log")).unwrap());
    }

    #[test]
    fn default_policy_matches_daemon_limits() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.max_bytes, 10 * 1024 * 1024);
        assert_eq!(policy.keep, 5);
    }
}
