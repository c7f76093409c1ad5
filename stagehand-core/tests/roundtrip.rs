//! Roundtrip serialisation tests for `stagehand-core` config types.
//!
//! Each `#[case]` is isolated: no shared state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rstest::rstest;
use stagehand_core::types::{
    AppConfig, AppName, HealthProbe, RuntimeConfig, RuntimeKind, SupervisorKind, TargetConfig,
    TransportKind,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minimal() -> AppConfig {
    AppConfig::new(
        AppName::from("minimal"),
        PathBuf::from("/src/minimal"),
        TargetConfig::local(PathBuf::from("/srv/minimal")),
    )
}

fn full() -> AppConfig {
    let mut cfg = minimal();
    cfg.target = TargetConfig {
        transport: TransportKind::Shell,
        host: Some("203.0.113.7".to_string()),
        user: Some("deploy".to_string()),
        identity_file: Some(PathBuf::from("/keys/id")),
        exec_wrapper: vec!["remote-run".into(), "{host}".into(), "{command}".into()],
        copy_wrapper: vec!["remote-copy".into(), "{src}".into(), "{host}:{dest}".into()],
        root: PathBuf::from("/srv/full"),
    };
    cfg.runtime = RuntimeConfig {
        kind: RuntimeKind::Python,
        interpreter: Some("python3.12".to_string()),
        lockfile: Some("requirements.lock".to_string()),
    };
    cfg.process.supervisor = SupervisorKind::Systemd;
    cfg.process.command = vec![".venv/bin/gunicorn".into(), "app:app".into()];
    cfg.process.env = BTreeMap::from([("FLASK_ENV".to_string(), "production".to_string())]);
    cfg.process.systemd.unit = Some("flask".to_string());
    cfg.health.probe = HealthProbe::Transport;
    cfg.health.url = "http://127.0.0.1:8000/healthz".to_string();
    cfg.keep_releases = 3;
    cfg.verify = false;
    cfg.auto_deploy = true;
    cfg
}

fn unicode() -> AppConfig {
    let mut cfg = minimal();
    cfg.source = PathBuf::from("/code/日本語-app");
    cfg.process.env = BTreeMap::from([("GREETING".to_string(), "héllo «wörld» 🚀".to_string())]);
    cfg
}

fn empty_ignore() -> AppConfig {
    let mut cfg = minimal();
    cfg.ignore.clear();
    cfg
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("minimal", minimal())]
#[case("all_fields", full())]
#[case("unicode_strings", unicode())]
#[case("empty_ignore", empty_ignore())]
fn app_config_roundtrip(#[case] label: &str, #[case] cfg: AppConfig) {
    let yaml = serde_yaml::to_string(&cfg)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: AppConfig = serde_yaml::from_str(&yaml)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(cfg, back, "[{label}]");
}

#[rstest]
#[case(SupervisorKind::Pidfile, "pidfile")]
#[case(SupervisorKind::Systemd, "systemd")]
fn supervisor_kind_serialises_lowercase(#[case] kind: SupervisorKind, #[case] expected: &str) {
    let yaml = serde_yaml::to_string(&kind).expect("serialize");
    assert_eq!(yaml.trim(), expected);
    assert_eq!(kind.to_string(), expected);
}

#[rstest]
#[case(RuntimeKind::None)]
#[case(RuntimeKind::Python)]
#[case(RuntimeKind::Node)]
fn runtime_kind_roundtrip(#[case] kind: RuntimeKind) {
    let yaml = serde_yaml::to_string(&kind).expect("serialize");
    let back: RuntimeKind = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(kind, back);
}
