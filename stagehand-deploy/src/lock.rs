//! Per-app deploy lock.
//!
//! `<home>/.stagehand/locks/<app>.lock` is created with `create_new` and holds
//! the owner's pid. The file is removed when the [`AppLock`] is dropped.
//!
//! A process killed mid-deploy never runs `Drop`. A lock whose recorded pid is
//! no longer alive is therefore taken over, once.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use stagehand_core::registry::stagehand_root;
use stagehand_core::types::AppName;

use crate::error::{io_err, DeployError};

pub fn lock_path_at(home: &Path, app: &AppName) -> PathBuf {
    stagehand_root(home)
        .join("locks")
        .join(format!("{}.lock", app.as_str()))
}

#[derive(Debug)]
pub struct AppLock {
    path: PathBuf,
}

impl AppLock {
    pub fn acquire_at(home: &Path, app: &AppName) -> Result<Self, DeployError> {
        let path = lock_path_at(home, app);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }

        match Self::try_create(&path, app)? {
            Some(lock) => Ok(lock),
            None => {
                let holder = read_holder(&path);
                let stale_pid = holder.parse::<u32>().ok().filter(|pid| !pid_alive(*pid));
                let Some(pid) = stale_pid else {
                    return Err(locked(app, holder, path));
                };

                tracing::warn!(app = %app, pid, path = %path.display(), "removing stale deploy lock");
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&path, e)),
                }
                match Self::try_create(&path, app)? {
                    Some(lock) => Ok(lock),
                    None => Err(locked(app, read_holder(&path), path)),
                }
            }
        }
    }

    /// `None` when the file already exists.
    fn try_create(path: &Path, app: &AppName) -> Result<Option<Self>, DeployError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id()).map_err(|e| io_err(path, e))?;
                tracing::debug!(app = %app, path = %path.display(), "acquired deploy lock");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_holder(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn locked(app: &AppName, holder: String, path: PathBuf) -> DeployError {
    DeployError::Locked {
        app: app.clone(),
        holder: if holder.is_empty() {
            "unknown".to_string()
        } else {
            holder
        },
        path,
    }
}

/// `kill -0 <pid>`. If the check itself cannot run, the holder is assumed alive.
fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

impl Drop for AppLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove deploy lock");
        }
    }
}
