//! `stagehand init <source> --app <name> [--root <dir>] [--transport ...] [--no-detect]`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Args;

use stagehand_core::registry::{self, app_path_at};
use stagehand_core::types::{
    AppConfig, AppName, HealthProbe, SupervisorKind, TargetConfig, TransportKind,
};
use stagehand_detector::{detect_runtime, Confidence, DetectError};

use super::home_dir;

/// Register a source tree as an app.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Source tree to deploy.
    pub source: PathBuf,

    /// App name (letters, digits, `-`, `_`).
    #[arg(long, short = 'a')]
    pub app: String,

    /// Deploy root on the target. Defaults to `~/stagehand/<app>` for local
    /// targets and `/srv/<app>` for shell targets.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// local | shell.
    #[arg(long, default_value = "local")]
    pub transport: TransportArg,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub user: Option<String>,

    /// SSH identity file for shell targets.
    #[arg(long)]
    pub identity: Option<PathBuf>,

    /// pidfile | systemd.
    #[arg(long, default_value = "pidfile")]
    pub supervisor: SupervisorArg,

    /// Skip runtime detection; fill in `runtime` and `process.command` by hand.
    #[arg(long)]
    pub no_detect: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let name = AppName::parse(&self.app)?;
        let source = self
            .source
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.source.display()))?;

        let path = app_path_at(&home, &name);
        if path.exists() {
            println!("'{name}' is already registered ({})", path.display());
            return Ok(());
        }

        let target = self.target(&home, &name)?;
        let mut config = AppConfig::new(name.clone(), source.clone(), target);
        config.process.supervisor = self.supervisor.0;
        // The health URL is usually loopback on the target, so probe from there.
        if config.target.transport == TransportKind::Shell {
            config.health.probe = HealthProbe::Transport;
        }

        if !self.no_detect {
            match detect_runtime(&source) {
                Ok(detected) => {
                    detected.apply(&mut config);
                    let framework = detected.framework.as_deref().unwrap_or("unknown framework");
                    let guess = match detected.confidence {
                        Confidence::High => "",
                        Confidence::Medium => " (start command is a guess)",
                    };
                    println!("  Detected {} / {framework}{guess}", detected.kind);
                }
                Err(DetectError::UnknownRuntime { .. }) => {
                    println!("  No runtime detected; set `runtime` and `process.command` by hand.");
                }
                Err(err) => return Err(err).context("runtime detection failed"),
            }
        }

        let config = registry::register_at(&home, config)
            .with_context(|| format!("failed to register '{name}'"))?;

        println!("✓ Registered '{}' from {}", config.name, source.display());
        println!("  Target:   {} ({})", config.target.root.display(), config.target.transport);
        println!("  Saved to: {}", path.display());
        if config.process.command.is_empty() {
            println!("  Edit process.command before the first deploy.");
        }
        Ok(())
    }

    fn target(&self, home: &Path, name: &AppName) -> Result<TargetConfig> {
        let transport = self.transport.0;
        let root = match (&self.root, transport) {
            (Some(root), TransportKind::Local) if root.is_relative() => std::env::current_dir()
                .context("cannot read current directory")?
                .join(root),
            (Some(root), _) => root.clone(),
            (None, TransportKind::Local) => home.join("stagehand").join(name.as_str()),
            (None, TransportKind::Shell) => PathBuf::from("/srv").join(name.as_str()),
        };
        if !root.is_absolute() {
            bail!("--root must be absolute for shell targets");
        }

        let mut target = TargetConfig::local(root);
        target.transport = transport;
        target.host = self.host.clone();
        target.user = self.user.clone();
        target.identity_file = self.identity.clone();
        if transport == TransportKind::Shell {
            if target.host.is_none() {
                bail!("--host is required for shell targets");
            }
            let (exec, copy) = ssh_wrappers(target.user.is_some(), target.identity_file.is_some());
            target.exec_wrapper = exec;
            target.copy_wrapper = copy;
        }
        Ok(target)
    }
}

/// `ssh`/`scp` argv templates for a shell target.
fn ssh_wrappers(with_user: bool, with_identity: bool) -> (Vec<String>, Vec<String>) {
    let destination = if with_user { "{user}@{host}" } else { "{host}" };
    let identity: &[&str] = if with_identity { &["-i", "{identity}"] } else { &[] };
    let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut exec = owned(&["ssh", "-o", "BatchMode=yes"]);
    exec.extend(owned(identity));
    exec.extend(owned(&[destination, "{command}"]));

    let mut copy = owned(&["scp", "-q", "-o", "BatchMode=yes"]);
    copy.extend(owned(identity));
    copy.push("{src}".to_string());
    copy.push(format!("{destination}:{{dest}}"));
    (exec, copy)
}

// ---------------------------------------------------------------------------
// Argument wrappers so clap can parse core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TransportArg(pub TransportKind);

impl FromStr for TransportArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self(TransportKind::Local)),
            "shell" => Ok(Self(TransportKind::Shell)),
            other => Err(format!("unknown transport '{other}'; expected: local, shell")),
        }
    }
}

impl fmt::Display for TransportArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorArg(pub SupervisorKind);

impl FromStr for SupervisorArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pidfile" => Ok(Self(SupervisorKind::Pidfile)),
            "systemd" => Ok(Self(SupervisorKind::Systemd)),
            other => Err(format!("unknown supervisor '{other}'; expected: pidfile, systemd")),
        }
    }
}

impl fmt::Display for SupervisorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
