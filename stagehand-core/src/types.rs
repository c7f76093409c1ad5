//! Domain types for the Stagehand app registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a registered application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppName(pub String);

impl AppName {
    /// Validate `raw` as an app name.
    ///
    /// App names end up as file names locally (`apps/<name>.yaml`) and on the
    /// target (`run/<name>.pid`), so only a conservative charset is accepted.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(RegistryError::InvalidName {
                name: raw.to_owned(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AppName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a staged release: `<UTC timestamp>-<manifest digest prefix>`.
///
/// Lexical order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseId(pub String);

impl ReleaseId {
    pub fn generate(at: DateTime<Utc>, manifest_digest: &str) -> Self {
        let prefix: String = manifest_digest.chars().take(8).collect();
        Self(format!("{}-{}", at.format("%Y%m%dT%H%M%SZ"), prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ReleaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReleaseId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a single deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeployId(pub String);

impl DeployId {
    pub fn generate(at: DateTime<Utc>, app: &AppName) -> Self {
        Self(format!("{}-{}", at.format("%Y%m%dT%H%M%S%3fZ"), app.0))
    }
}

impl fmt::Display for DeployId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DeployId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How commands and files reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Target directory on this machine.
    #[default]
    Local,
    /// Commands and copies wrapped by user-configured programs.
    Shell,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::Shell => write!(f, "shell"),
        }
    }
}

/// Execution environment flavour of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    None,
    Python,
    Node,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::None => write!(f, "none"),
            RuntimeKind::Python => write!(f, "python"),
            RuntimeKind::Node => write!(f, "node"),
        }
    }
}

/// Which process manager owns the serving process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    /// Detached process tracked by a pidfile; no persistence across reboots.
    #[default]
    Pidfile,
    Systemd,
}

impl fmt::Display for SupervisorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorKind::Pidfile => write!(f, "pidfile"),
            SupervisorKind::Systemd => write!(f, "systemd"),
        }
    }
}

/// Where the health check request originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthProbe {
    /// HTTP request issued by stagehand itself.
    #[default]
    Direct,
    /// `curl` executed on the target, so loopback URLs mean the target's loopback.
    Transport,
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Where and how an app is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// argv template for running a command; placeholders `{host}`, `{user}`,
    /// `{identity}`, `{command}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec_wrapper: Vec<String>,
    /// argv template for copying a file; placeholders `{host}`, `{user}`,
    /// `{identity}`, `{src}`, `{dest}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy_wrapper: Vec<String>,
    /// Deploy root on the target.
    pub root: PathBuf,
}

impl TargetConfig {
    pub fn local(root: PathBuf) -> Self {
        Self {
            transport: TransportKind::Local,
            host: None,
            user: None,
            identity_file: None,
            exec_wrapper: vec![],
            copy_wrapper: vec![],
            root,
        }
    }
}

/// Interpreter and lockfile used to build the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<String>,
}

impl RuntimeConfig {
    /// Interpreter command, falling back to the conventional one for `kind`.
    pub fn interpreter(&self) -> &str {
        match (&self.interpreter, self.kind) {
            (Some(explicit), _) => explicit,
            (None, RuntimeKind::Python) => "python3",
            (None, RuntimeKind::Node) => "node",
            (None, RuntimeKind::None) => "",
        }
    }

    /// Lockfile path relative to the release root.
    pub fn lockfile(&self) -> &str {
        match (&self.lockfile, self.kind) {
            (Some(explicit), _) => explicit,
            (None, RuntimeKind::Python) => "requirements.txt",
            (None, RuntimeKind::Node) => "package-lock.json",
            (None, RuntimeKind::None) => "",
        }
    }
}

/// systemd-specific supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemdConfig {
    /// Unit name without `.service`; defaults to `stagehand-<app>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Use `systemctl --user` and the per-user unit directory.
    pub user_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_dir: Option<PathBuf>,
}

impl Default for SystemdConfig {
    fn default() -> Self {
        Self {
            unit: None,
            user_mode: true,
            unit_dir: None,
        }
    }
}

/// The serving process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub supervisor: SupervisorKind,
    /// argv, executed with the live release as working directory.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stop_timeout_secs: u64,
    pub systemd: SystemdConfig,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorKind::Pidfile,
            command: vec![],
            env: BTreeMap::new(),
            stop_timeout_secs: 10,
            systemd: SystemdConfig::default(),
        }
    }
}

/// Health gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub url: String,
    pub expect_status: u16,
    pub probe: HealthProbe,
    pub initial_delay_ms: u64,
    pub attempts: u32,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/".to_string(),
            expect_status: 200,
            probe: HealthProbe::Direct,
            initial_delay_ms: 1_000,
            attempts: 10,
            interval_ms: 500,
            max_interval_ms: 5_000,
            timeout_secs: 5,
        }
    }
}

/// Paths skipped when scanning a source tree.
pub fn default_ignore() -> Vec<String> {
    [
        ".git",
        "__pycache__",
        "*.pyc",
        ".venv",
        "venv",
        "node_modules",
        ".stagehand*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_keep_releases() -> usize {
    5
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// One deployable application, persisted as `~/.stagehand/apps/<name>.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: AppName,
    /// Local source tree that gets deployed.
    pub source: PathBuf,
    pub target: TargetConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default)]
    pub auto_deploy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppConfig {
    /// A config with every optional section at its default.
    pub fn new(name: AppName, source: PathBuf, target: TargetConfig) -> Self {
        let now = Utc::now();
        Self {
            name,
            source,
            target,
            runtime: RuntimeConfig::default(),
            process: ProcessConfig::default(),
            health: HealthConfig::default(),
            ignore: default_ignore(),
            keep_releases: default_keep_releases(),
            verify: true,
            auto_deploy: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// systemd unit name without the `.service` suffix.
    pub fn systemd_unit(&self) -> String {
        self.process
            .systemd
            .unit
            .clone()
            .unwrap_or_else(|| format!("stagehand-{}", self.name))
    }

    /// Check the invariants a deploy relies on.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: &str| RegistryError::Invalid {
            app: self.name.0.clone(),
            message: message.to_string(),
        };

        if !self.target.root.is_absolute() {
            return Err(invalid("target.root must be an absolute path"));
        }
        if self.process.command.is_empty() {
            return Err(invalid("process.command is empty"));
        }
        if let Some(key) = self.process.env.keys().find(|k| !is_env_name(k)) {
            return Err(invalid(&format!(
                "process.env key '{key}' is not a valid variable name"
            )));
        }
        if self.target.transport == TransportKind::Shell
            && (self.target.exec_wrapper.is_empty() || self.target.copy_wrapper.is_empty())
        {
            return Err(invalid(
                "shell transport needs both target.exec_wrapper and target.copy_wrapper",
            ));
        }
        if self.keep_releases == 0 {
            return Err(invalid("keep_releases must be at least 1"));
        }
        if self.health.attempts == 0 {
            return Err(invalid("health.attempts must be at least 1"));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the names a POSIX shell can `export`.
fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> AppConfig {
        let mut cfg = AppConfig::new(
            AppName::from("flask_app"),
            PathBuf::from("/src/flask_app"),
            TargetConfig::local(PathBuf::from("/srv/flask_app")),
        );
        cfg.process.command = vec!["sleep".to_string(), "60".to_string()];
        cfg
    }

    #[test]
    fn newtype_display() {
        assert_eq!(AppName::from("foo").to_string(), "foo");
        assert_eq!(ReleaseId::from("r1").to_string(), "r1");
    }

    #[test]
    fn app_name_rejects_path_like_names() {
        assert!(AppName::parse("flask_app").is_ok());
        assert!(AppName::parse("api-v2.1").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "with space"] {
            assert!(
                matches!(AppName::parse(bad), Err(RegistryError::InvalidName { .. })),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn release_ids_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap();
        let a = ReleaseId::generate(early, "ffffffffffff");
        let b = ReleaseId::generate(late, "000000000000");
        assert_eq!(a.as_str(), "20260102T030405Z-ffffffff");
        assert!(a < b);
    }

    #[test]
    fn runtime_defaults_follow_kind() {
        let python = RuntimeConfig {
            kind: RuntimeKind::Python,
            ..Default::default()
        };
        assert_eq!(python.interpreter(), "python3");
        assert_eq!(python.lockfile(), "requirements.txt");

        let node = RuntimeConfig {
            kind: RuntimeKind::Node,
            interpreter: Some("/opt/node/bin/node".to_string()),
            lockfile: None,
        };
        assert_eq!(node.interpreter(), "/opt/node/bin/node");
        assert_eq!(node.lockfile(), "package-lock.json");
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let yaml = r#"
name: flask_app
source: /src/flask_app
target:
  root: /srv/flask_app
process:
  command: [".venv/bin/flask", "run"]
created_at: 2026-01-01T00:00:00Z
updated_at: 2026-01-01T00:00:00Z
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.target.transport, TransportKind::Local);
        assert_eq!(cfg.health.url, "http://127.0.0.1:5000/");
        assert_eq!(cfg.health.expect_status, 200);
        assert_eq!(cfg.process.stop_timeout_secs, 10);
        assert_eq!(cfg.keep_releases, 5);
        assert!(cfg.verify);
        assert!(!cfg.auto_deploy);
        assert!(cfg.ignore.iter().any(|p| p == ".git"));
        cfg.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_relative_root_and_empty_command() {
        let mut cfg = sample();
        cfg.target.root = PathBuf::from("srv/app");
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.process.command.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("process.command"));
    }

    #[test]
    fn validate_requires_wrappers_for_shell_transport() {
        let mut cfg = sample();
        cfg.target.transport = TransportKind::Shell;
        assert!(cfg.validate().is_err());

        cfg.target.exec_wrapper = vec!["runner".into(), "{command}".into()];
        cfg.target.copy_wrapper = vec!["copier".into(), "{src}".into(), "{dest}".into()];
        cfg.validate().expect("valid once wrappers are set");
    }

    #[rstest::rstest]
    #[case("A-B")]
    #[case("1PORT")]
    #[case("")]
    #[case("PATH;rm")]
    #[case("MY VAR")]
    fn validate_rejects_unexportable_env_keys(#[case] key: &str) {
        let mut cfg = sample();
        cfg.process.env.insert(key.to_string(), "x".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("process.env key"), "{err}");
    }

    #[test]
    fn validate_accepts_shell_variable_names() {
        let mut cfg = sample();
        for key in ["FLASK_ENV", "_private", "port8080"] {
            cfg.process.env.insert(key.to_string(), "x".to_string());
        }
        cfg.validate().expect("valid");
    }

    #[test]
    fn systemd_unit_defaults_to_prefixed_name() {
        let mut cfg = sample();
        assert_eq!(cfg.systemd_unit(), "stagehand-flask_app");
        cfg.process.systemd.unit = Some("web".to_string());
        assert_eq!(cfg.systemd_unit(), "web");
    }

    #[test]
    fn app_config_serde_roundtrip() {
        let cfg = sample();
        let yaml = serde_yaml::to_string(&cfg).expect("serialize");
        let back: AppConfig = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, cfg);
    }
}
