//! Registry error-message, atomic-write-safety, and register integration tests.
//! Storage: ~/.stagehand/apps/<app>.yaml

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use stagehand_core::{
    config, registry,
    types::{AppConfig, AppName, TargetConfig},
    RegistryError,
};
use std::fs;
use std::path::PathBuf;

fn name() -> AppName {
    AppName::from("flask_app")
}

fn app(source: PathBuf) -> AppConfig {
    let mut cfg = AppConfig::new(name(), source, TargetConfig::local(PathBuf::from("/srv/flask_app")));
    cfg.process.command = vec![".venv/bin/python".to_string(), "app.py".to_string()];
    cfg
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_app_names_the_expected_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_app_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::AppNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("not registered"));
    assert!(err.to_string().contains("flask_app.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".stagehand").join("apps");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("flask_app.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_app_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("flask_app.yaml"));
}

#[test]
fn load_missing_required_field_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".stagehand/apps/flask_app.yaml")
        .write_str("name: flask_app\nsource: /src\n")
        .expect("write");

    let err = registry::load_app_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::save_app_at(home.path(), &app(PathBuf::from("/src/flask_app"))).expect("save");

    let yaml_path = registry::app_path_at(home.path(), &name());
    let original_bytes = fs::read(&yaml_path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = yaml_path.with_file_name("flask_app.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&yaml_path).expect("read after crash"));
    let listed = registry::list_apps_at(home.path()).expect("orphan .tmp is skipped");
    assert_eq!(listed.len(), 1);
}

// ---------------------------------------------------------------------------
// 3. Register integration
// ---------------------------------------------------------------------------

#[test]
fn register_creates_private_yaml() {
    let home = assert_fs::TempDir::new().expect("home");
    let source = assert_fs::TempDir::new().expect("source");

    registry::register_at(home.path(), app(source.path().to_path_buf())).expect("register");

    home.child(".stagehand/apps/flask_app.yaml")
        .assert(predicate::path::exists())
        .assert(predicate::str::contains("root: /srv/flask_app"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = registry::app_path_at(home.path(), &name());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn list_apps_sorted_by_name() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    for n in ["worker", "api", "frontend"] {
        let mut cfg = app(PathBuf::from("/src").join(n));
        cfg.name = AppName::from(n);
        registry::register_at(home.path(), cfg).expect("register");
    }

    let names: Vec<String> = registry::list_apps_at(home.path())
        .expect("list")
        .into_iter()
        .map(|a| a.name.0)
        .collect();
    assert_eq!(names, vec!["api", "frontend", "worker"]);
}

#[test]
fn touch_and_save_updates_timestamp_only() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = registry::register_at(home.path(), app(PathBuf::from("/src/a"))).expect("register");
    let created = cfg.created_at;

    std::thread::sleep(std::time::Duration::from_millis(5));
    cfg.auto_deploy = true;
    registry::touch_and_save_at(home.path(), &mut cfg).expect("save");

    let loaded = registry::load_app_at(home.path(), &name()).expect("load");
    assert!(loaded.auto_deploy);
    assert_eq!(loaded.created_at, created);
    assert!(loaded.updated_at > created);
}

// ---------------------------------------------------------------------------
// 4. Resolved loading
// ---------------------------------------------------------------------------

#[test]
fn load_resolved_rejects_invalid_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = app(PathBuf::from("/src/a"));
    cfg.process.command.clear();
    registry::save_app_at(home.path(), &cfg).expect("save");

    let err = config::load_resolved_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::Invalid { .. }), "got: {err}");
}
