//! Transport for a target directory on this machine.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::command::{CommandOutput, RemoteCommand};
use crate::error::{io_err, TransportError};
use crate::Transport;

/// Runs commands with the local `sh` and copies files with `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> String {
        "local".to_string()
    }

    fn exec(&self, cmd: &RemoteCommand) -> Result<CommandOutput, TransportError> {
        let line = cmd.render();
        debug!(transport = "local", command = %line, "exec");
        let out = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .output()
            .map_err(|source| TransportError::Spawn {
                program: "sh".to_string(),
                source,
            })?;
        Ok(out.into())
    }

    /// Copy via a sibling temp file and `rename`, so readers never observe a
    /// partially written file. Permissions of `local` are preserved.
    fn upload(&self, local: &Path, remote: &Path) -> Result<(), TransportError> {
        debug!(transport = "local", src = %local.display(), dest = %remote.display(), "upload");
        if let Some(parent) = remote.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file_name = remote
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::InvalidTarget(format!("no file name in {}", remote.display())))?;
        let tmp = remote.with_file_name(format!(".{file_name}.stagehand-tmp"));
        std::fs::copy(local, &tmp).map_err(|e| io_err(local, e))?;
        std::fs::rename(&tmp, remote).map_err(|e| io_err(remote, e))?;
        Ok(())
    }
}
