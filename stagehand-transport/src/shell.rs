//! Transport that delegates to user-configured wrapper programs.
//!
//! The wrappers are argv templates from the target config. No remote-access
//! program is assumed; a typical setup names an ssh/scp-like pair, but any
//! program that runs a shell line or copies a file will do.
//!
//! | Placeholder  | Value                                  |
//! |--------------|----------------------------------------|
//! | `{host}`     | `target.host`                          |
//! | `{user}`     | `target.user`                          |
//! | `{identity}` | `target.identity_file`                 |
//! | `{command}`  | rendered [`RemoteCommand`] (exec only) |
//! | `{src}`      | local file (copy only)                 |
//! | `{dest}`     | target path (copy only)                |

use std::path::Path;
use std::process::Command;

use stagehand_core::types::TargetConfig;
use tracing::debug;

use crate::command::{quote_path, CommandOutput, RemoteCommand};
use crate::error::TransportError;
use crate::Transport;

#[derive(Debug, Clone)]
pub struct ShellTransport {
    exec_wrapper: Vec<String>,
    copy_wrapper: Vec<String>,
    host: Option<String>,
    user: Option<String>,
    identity: Option<String>,
}

impl ShellTransport {
    pub fn from_target(target: &TargetConfig) -> Result<Self, TransportError> {
        if target.exec_wrapper.is_empty() || target.copy_wrapper.is_empty() {
            return Err(TransportError::InvalidTarget(
                "shell transport needs exec_wrapper and copy_wrapper".to_string(),
            ));
        }
        Ok(Self {
            exec_wrapper: target.exec_wrapper.clone(),
            copy_wrapper: target.copy_wrapper.clone(),
            host: target.host.clone(),
            user: target.user.clone(),
            identity: target
                .identity_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        })
    }

    /// Substitute placeholders into every element of `template`.
    fn expand(
        &self,
        template: &[String],
        extra: &[(&str, &str)],
    ) -> Result<Vec<String>, TransportError> {
        let fixed = [
            ("host", self.host.as_deref()),
            ("user", self.user.as_deref()),
            ("identity", self.identity.as_deref()),
        ];
        template
            .iter()
            .map(|part| -> Result<String, TransportError> {
                let mut out = part.clone();
                for (key, value) in fixed {
                    out = substitute(&out, key, value)?;
                }
                for &(key, value) in extra {
                    out = substitute(&out, key, Some(value))?;
                }
                Ok(out)
            })
            .collect()
    }

    fn spawn(argv: &[String]) -> Result<CommandOutput, TransportError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TransportError::InvalidTarget("empty wrapper".to_string()))?;
        let out = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| TransportError::Spawn {
                program: program.clone(),
                source,
            })?;
        Ok(out.into())
    }
}

fn substitute(part: &str, key: &str, value: Option<&str>) -> Result<String, TransportError> {
    let placeholder = format!("{{{key}}}");
    if !part.contains(&placeholder) {
        return Ok(part.to_string());
    }
    match value {
        Some(v) => Ok(part.replace(&placeholder, v)),
        None => Err(TransportError::MissingPlaceholder {
            placeholder: key.to_string(),
        }),
    }
}

impl Transport for ShellTransport {
    fn name(&self) -> String {
        match &self.host {
            Some(host) => format!("shell:{host}"),
            None => "shell".to_string(),
        }
    }

    fn exec(&self, cmd: &RemoteCommand) -> Result<CommandOutput, TransportError> {
        let line = cmd.render();
        let argv = self.expand(&self.exec_wrapper, &[("command", line.as_str())])?;
        debug!(transport = %self.name(), command = %line, "exec");
        Self::spawn(&argv)
    }

    fn upload(&self, local: &Path, remote: &Path) -> Result<(), TransportError> {
        if let Some(parent) = remote.parent() {
            self.run(
                &RemoteCommand::new("mkdir").arg("-p").arg(parent.to_string_lossy()),
                "create remote directory",
            )?;
        }
        let src = local.to_string_lossy();
        let dest = remote.to_string_lossy();
        let argv = self.expand(&self.copy_wrapper, &[("src", src.as_ref()), ("dest", dest.as_ref())])?;
        debug!(transport = %self.name(), src = %local.display(), dest = %quote_path(remote), "upload");
        Self::spawn(&argv)?.into_result(&format!("upload {}", remote.display()))?;
        Ok(())
    }
}
