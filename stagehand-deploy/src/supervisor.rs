//! Process supervisors: stop the running app, start a release, report status.
//!
//! | Supervisor | Start                                   | Survives reboot |
//! |------------|-----------------------------------------|-----------------|
//! | pidfile    | launcher script, `nohup`, pid in `run/` | no              |
//! | systemd    | unit file + `systemctl restart`         | yes             |

use std::path::PathBuf;

use stagehand_core::types::{AppConfig, ReleaseId, SupervisorKind};
use stagehand_release::layout::{ReleaseLayout, LAUNCHER_FILE};
use stagehand_renderer::{Artefact, Renderer, SupervisorContext};
use stagehand_transport::{quote_path, RemoteCommand, Transport};

use crate::error::DeployError;

/// Exit status the stop script uses for "nothing was running".
const NOT_RUNNING_STATUS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Running { pid: Option<u32> },
    Stopped,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running { .. })
    }
}

pub trait ProcessSupervisor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stop the app. A process that is not running is not an error.
    fn stop(&self, transport: &dyn Transport) -> Result<StopOutcome, DeployError>;

    /// Start `release`. The caller has already stopped the previous process.
    fn start(&self, transport: &dyn Transport, release: &ReleaseId) -> Result<(), DeployError>;

    fn status(&self, transport: &dyn Transport) -> Result<ProcessStatus, DeployError>;
}

/// Supervisor selected by `process.supervisor`.
pub fn supervisor_for(
    config: &AppConfig,
    layout: &ReleaseLayout,
    renderer: Renderer,
) -> Box<dyn ProcessSupervisor> {
    match config.process.supervisor {
        SupervisorKind::Pidfile => Box::new(PidFileSupervisor::new(config, layout, renderer)),
        SupervisorKind::Systemd => Box::new(SystemdSupervisor::new(config, layout, renderer)),
    }
}

fn parse_pid(raw: &str) -> Option<u32> {
    raw.trim().parse().ok().filter(|pid| *pid > 0)
}

// ---------------------------------------------------------------------------
// pidfile
// ---------------------------------------------------------------------------

/// A detached process tracked through `run/<app>.pid`.
pub struct PidFileSupervisor {
    config: AppConfig,
    layout: ReleaseLayout,
    renderer: Renderer,
}

impl PidFileSupervisor {
    pub fn new(config: &AppConfig, layout: &ReleaseLayout, renderer: Renderer) -> Self {
        Self {
            config: config.clone(),
            layout: layout.clone(),
            renderer,
        }
    }

    fn stop_script(&self) -> String {
        let pidfile = quote_path(&self.layout.pid_file());
        // Poll every 200ms.
        let polls = self.config.process.stop_timeout_secs.saturating_mul(5).max(1);
        format!(
            r#"PIDFILE={pidfile}
[ -f "$PIDFILE" ] || exit {NOT_RUNNING_STATUS}
PID=$(cat "$PIDFILE")
if [ -z "$PID" ] || ! kill -0 "$PID" 2>/dev/null; then rm -f "$PIDFILE"; exit {NOT_RUNNING_STATUS}; fi
kill -TERM "$PID" 2>/dev/null || true
i=0
while kill -0 "$PID" 2>/dev/null; do
  if [ "$i" -ge {polls} ]; then kill -KILL "$PID" 2>/dev/null || true; break; fi
  sleep 0.2
  i=$((i + 1))
done
rm -f "$PIDFILE""#
        )
    }
}

impl ProcessSupervisor for PidFileSupervisor {
    fn name(&self) -> &'static str {
        "pidfile"
    }

    fn stop(&self, transport: &dyn Transport) -> Result<StopOutcome, DeployError> {
        let out = transport.exec(&RemoteCommand::shell(self.stop_script()))?;
        if out.status == Some(NOT_RUNNING_STATUS) {
            tracing::debug!(app = %self.config.name, "no running process to stop");
            return Ok(StopOutcome::NotRunning);
        }
        out.into_result("stop process")?;
        tracing::info!(app = %self.config.name, "stopped process");
        Ok(StopOutcome::Stopped)
    }

    fn start(&self, transport: &dyn Transport, release: &ReleaseId) -> Result<(), DeployError> {
        let release_dir = self.layout.release(release);
        let ctx = SupervisorContext::new(
            &self.config,
            &release_dir,
            &self.layout.log_file(),
            &self.layout.pid_file(),
        );
        let launcher = self.renderer.render(Artefact::Launcher, &ctx)?;
        let path = release_dir.join(LAUNCHER_FILE);
        transport.write_file(&path, launcher.as_bytes())?;
        transport.script(
            &format!("chmod +x {p} && sh {p}", p = quote_path(&path)),
            "launch process",
        )?;

        let pid = transport
            .read_to_string(&self.layout.pid_file())?
            .as_deref()
            .and_then(parse_pid);
        tracing::info!(app = %self.config.name, release = %release, pid = ?pid, "started process");
        Ok(())
    }

    fn status(&self, transport: &dyn Transport) -> Result<ProcessStatus, DeployError> {
        let Some(raw) = transport.read_to_string(&self.layout.pid_file())? else {
            return Ok(ProcessStatus::Stopped);
        };
        let Some(pid) = parse_pid(&raw) else {
            return Ok(ProcessStatus::Stopped);
        };
        let alive = transport
            .exec(&RemoteCommand::new("kill").arg("-0").arg(pid.to_string()))?
            .success();
        Ok(if alive {
            ProcessStatus::Running { pid: Some(pid) }
        } else {
            ProcessStatus::Stopped
        })
    }
}

// ---------------------------------------------------------------------------
// systemd
// ---------------------------------------------------------------------------

/// A unit managed with `systemctl`, working directory `current/`.
pub struct SystemdSupervisor {
    config: AppConfig,
    layout: ReleaseLayout,
    renderer: Renderer,
}

impl SystemdSupervisor {
    pub fn new(config: &AppConfig, layout: &ReleaseLayout, renderer: Renderer) -> Self {
        Self {
            config: config.clone(),
            layout: layout.clone(),
            renderer,
        }
    }

    fn unit(&self) -> String {
        format!("{}.service", self.config.systemd_unit())
    }

    fn systemctl(&self, verb: &str) -> RemoteCommand {
        let mut cmd = RemoteCommand::new("systemctl");
        if self.config.process.systemd.user_mode {
            cmd = cmd.arg("--user");
        }
        cmd.arg(verb)
    }

    /// Configured unit dir, or the systemd default for the mode. The per-user
    /// default is resolved against `$HOME` on the target.
    fn unit_dir(&self, transport: &dyn Transport) -> Result<PathBuf, DeployError> {
        if let Some(dir) = &self.config.process.systemd.unit_dir {
            return Ok(dir.clone());
        }
        if !self.config.process.systemd.user_mode {
            return Ok(PathBuf::from("/etc/systemd/system"));
        }
        let home = transport.script("printf %s \"$HOME\"", "resolve target home")?;
        let home = home.trim();
        if home.is_empty() {
            return Err(DeployError::Supervisor(
                "$HOME is not set on the target; configure process.systemd.unit_dir".into(),
            ));
        }
        Ok(PathBuf::from(home).join(".config/systemd/user"))
    }
}

impl ProcessSupervisor for SystemdSupervisor {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn stop(&self, transport: &dyn Transport) -> Result<StopOutcome, DeployError> {
        let out = transport.exec(&self.systemctl("stop").arg(self.unit()))?;
        if out.success() {
            tracing::info!(app = %self.config.name, unit = %self.unit(), "stopped unit");
            Ok(StopOutcome::Stopped)
        } else {
            tracing::debug!(app = %self.config.name, stderr = %out.stderr.trim(), "systemctl stop failed; ignoring");
            Ok(StopOutcome::NotRunning)
        }
    }

    fn start(&self, transport: &dyn Transport, release: &ReleaseId) -> Result<(), DeployError> {
        let ctx = SupervisorContext::new(
            &self.config,
            &self.layout.current(),
            &self.layout.log_file(),
            &self.layout.pid_file(),
        );
        let unit_file = self.renderer.render(Artefact::SystemdUnit, &ctx)?;
        let path = self.unit_dir(transport)?.join(self.unit());
        transport.write_file(&path, unit_file.as_bytes())?;

        transport.run(&self.systemctl("daemon-reload"), "systemctl daemon-reload")?;
        transport.run(&self.systemctl("enable").arg(self.unit()), "systemctl enable")?;
        transport.run(&self.systemctl("restart").arg(self.unit()), "systemctl restart")?;
        tracing::info!(app = %self.config.name, release = %release, unit = %self.unit(), "restarted unit");
        Ok(())
    }

    fn status(&self, transport: &dyn Transport) -> Result<ProcessStatus, DeployError> {
        let active = transport.exec(&self.systemctl("is-active").arg(self.unit()))?;
        if active.stdout.trim() != "active" {
            return Ok(ProcessStatus::Stopped);
        }
        let pid = transport
            .exec(
                &self
                    .systemctl("show")
                    .args(["-p", "MainPID", "--value"])
                    .arg(self.unit()),
            )?
            .stdout;
        Ok(ProcessStatus::Running {
            pid: parse_pid(&pid),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::types::{AppName, TargetConfig};

    fn config() -> AppConfig {
        let mut cfg = AppConfig::new(
            AppName::from("flask_app"),
            PathBuf::from("/src/flask_app"),
            TargetConfig::local(PathBuf::from("/srv/flask_app")),
        );
        cfg.process.command = vec!["sleep".into(), "60".into()];
        cfg.process.stop_timeout_secs = 2;
        cfg
    }

    #[test]
    fn parse_pid_rejects_garbage() {
        assert_eq!(parse_pid("1234\n"), Some(1234));
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("abc"), None);
    }

    #[test]
    fn stop_script_polls_for_timeout() {
        let cfg = config();
        let layout = ReleaseLayout::new(cfg.target.root.clone(), cfg.name.clone());
        let sup = PidFileSupervisor::new(&cfg, &layout, Renderer::new(None).unwrap());
        let script = sup.stop_script();
        assert!(script.contains("PIDFILE=/srv/flask_app/run/flask_app.pid"));
        assert!(script.contains("-ge 10"));
        assert!(script.contains("kill -KILL"));
    }

    #[test]
    fn systemctl_user_mode_flag() {
        let mut cfg = config();
        let layout = ReleaseLayout::new(cfg.target.root.clone(), cfg.name.clone());
        let sup = SystemdSupervisor::new(&cfg, &layout, Renderer::new(None).unwrap());
        assert_eq!(sup.systemctl("restart").render(), "systemctl --user restart");

        cfg.process.systemd.user_mode = false;
        let sup = SystemdSupervisor::new(&cfg, &layout, Renderer::new(None).unwrap());
        assert_eq!(sup.systemctl("restart").render(), "systemctl restart");
        assert_eq!(sup.unit(), "stagehand-flask_app.service");
    }
}
