//! Stagehand transport: how commands and files reach a deploy target.
//!
//! - [`Transport`]: the capability interface used by every other crate
//! - [`LocalTransport`]: target directory on this machine
//! - [`ShellTransport`]: commands and copies delegated to configured wrapper programs
//! - [`command`]: [`RemoteCommand`], [`CommandOutput`], quoting

pub mod command;
pub mod error;
pub mod local;
pub mod shell;

use std::io::Write;
use std::path::Path;

use stagehand_core::types::{TargetConfig, TransportKind};

pub use command::{quote_path, shell_quote, CommandOutput, RemoteCommand};
pub use error::TransportError;
pub use local::LocalTransport;
pub use shell::ShellTransport;

/// Exit status used by [`Transport::read_to_string`] to signal "no such file".
const MISSING_FILE_STATUS: i32 = 44;

/// Copy files to, and execute commands on, a deploy target.
///
/// Paths passed to a transport are paths on the target.
pub trait Transport: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> String;

    /// Run `cmd` and capture its output. A non-zero exit is *not* an error here.
    fn exec(&self, cmd: &RemoteCommand) -> Result<CommandOutput, TransportError>;

    /// Copy the local file `local` to `remote`. The remote parent directory is
    /// created when missing.
    fn upload(&self, local: &Path, remote: &Path) -> Result<(), TransportError>;

    // -----------------------------------------------------------------------
    // Provided helpers
    // -----------------------------------------------------------------------

    /// [`exec`](Transport::exec), failing on a non-zero exit.
    fn run(&self, cmd: &RemoteCommand, context: &str) -> Result<CommandOutput, TransportError> {
        self.exec(cmd)?.into_result(context)
    }

    /// Run a shell script, returning stdout.
    fn script(&self, script: &str, context: &str) -> Result<String, TransportError> {
        Ok(self.run(&RemoteCommand::shell(script), context)?.stdout)
    }

    /// `test -e <path>`.
    fn exists(&self, path: &Path) -> Result<bool, TransportError> {
        let out = self.exec(&RemoteCommand::new("test").arg("-e").arg(path.to_string_lossy()))?;
        Ok(out.success())
    }

    /// Read a text file from the target. `Ok(None)` if it does not exist.
    fn read_to_string(&self, path: &Path) -> Result<Option<String>, TransportError> {
        let quoted = quote_path(path);
        let script = format!("[ -f {quoted} ] || exit {MISSING_FILE_STATUS}; cat -- {quoted}");
        let out = self.exec(&RemoteCommand::shell(script))?;
        if out.status == Some(MISSING_FILE_STATUS) {
            return Ok(None);
        }
        let out = out.into_result(&format!("read {}", path.display()))?;
        Ok(Some(out.stdout))
    }

    /// Write `contents` to `remote` by uploading a local temporary file.
    fn write_file(&self, remote: &Path, contents: &[u8]) -> Result<(), TransportError> {
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| error::io_err(std::env::temp_dir(), e))?;
        if let Err(e) = tmp.write_all(contents).and_then(|_| tmp.flush()) {
            return Err(error::io_err(tmp.path(), e));
        }
        self.upload(tmp.path(), remote)
    }
}

/// Build the transport described by `target`.
pub fn transport_for(target: &TargetConfig) -> Result<Box<dyn Transport>, TransportError> {
    match target.transport {
        TransportKind::Local => Ok(Box::new(LocalTransport::new())),
        TransportKind::Shell => Ok(Box::new(ShellTransport::from_target(target)?)),
    }
}
