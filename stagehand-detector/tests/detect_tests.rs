//! Parameterised runtime detection tests for `stagehand-detector`.
//!
//! Each `#[case]` gets an isolated `TempDir`: no shared state.

use std::fs;
use std::path::PathBuf;

use rstest::rstest;
use stagehand_core::types::{AppConfig, AppName, RuntimeKind, TargetConfig};
use stagehand_detector::{detect_runtime, Confidence, DetectError};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn make_dir() -> TempDir {
    TempDir::new().expect("tempdir")
}

fn write(dir: &TempDir, filename: &str, content: &str) {
    fs::write(dir.path().join(filename), content).expect("write fixture");
}

const FLASK_APP: &str = "from flask import Flask\n\napp = Flask(__name__)\n\n@app.route('/')\ndef home_page():\n    return \"Hello from my Flask app!\"\n";

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

#[test]
fn bare_flask_module_without_requirements() {
    let dir = make_dir();
    write(&dir, "app.py", FLASK_APP);

    let r = detect_runtime(dir.path()).expect("detect");
    assert_eq!(r.kind, RuntimeKind::Python);
    assert_eq!(r.framework.as_deref(), Some("Flask"));
    assert_eq!(r.lockfile, None);
    assert_eq!(r.port, Some(5000));
    assert_eq!(
        r.command,
        vec![".venv/bin/flask", "--app", "app", "run", "--host", "0.0.0.0", "--port", "5000"]
    );
    assert_eq!(r.confidence, Confidence::High);
}

#[rstest]
#[case("flask==3.0.0\n", "main.py", "Flask", 5000)]
#[case("fastapi\nuvicorn\n", "main.py", "FastAPI", 8000)]
#[case("Flask\ngunicorn\n", "wsgi.py", "Flask", 5000)]
fn python_framework_from_requirements(
    #[case] requirements: &str,
    #[case] entry: &str,
    #[case] framework: &str,
    #[case] port: u16,
) {
    let dir = make_dir();
    write(&dir, "requirements.txt", requirements);
    write(&dir, entry, "import os\n");

    let r = detect_runtime(dir.path()).expect("detect");
    assert_eq!(r.kind, RuntimeKind::Python);
    assert_eq!(r.framework.as_deref(), Some(framework));
    assert_eq!(r.lockfile.as_deref(), Some("requirements.txt"));
    assert_eq!(r.port, Some(port));
    let module = entry.trim_end_matches(".py");
    assert!(
        r.command.iter().any(|a| a.starts_with(module)),
        "command should reference {module}: {:?}",
        r.command
    );
}

#[test]
fn django_needs_manage_py() {
    let dir = make_dir();
    write(&dir, "requirements.txt", "Django>=5\n");
    write(&dir, "manage.py", "#!/usr/bin/env python\n");

    let r = detect_runtime(dir.path()).expect("detect");
    assert_eq!(r.framework.as_deref(), Some("Django"));
    assert_eq!(r.command[1], "manage.py");
}

#[test]
fn plain_python_script_is_medium_confidence() {
    let dir = make_dir();
    write(&dir, "server.py", "import http.server\n");

    let r = detect_runtime(dir.path()).expect("detect");
    assert_eq!(r.framework, None);
    assert_eq!(r.command, vec![".venv/bin/python", "server.py"]);
    assert_eq!(r.port, None);
    assert_eq!(r.confidence, Confidence::Medium);
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[rstest]
#[case(r#"{"dependencies": {"express": "^4"}, "scripts": {"start": "node server.js"}}"#, Some("Express"), &["npm", "run", "start"][..])]
#[case(r#"{"dependencies": {"fastify": "^4"}, "main": "src/app.js"}"#, Some("Fastify"), &["node", "src/app.js"][..])]
#[case(r#"{"dependencies": {"lodash": "^4"}}"#, None, &["node", "index.js"][..])]
fn node_detection(
    #[case] package_json: &str,
    #[case] framework: Option<&str>,
    #[case] command: &[&str],
) {
    let dir = make_dir();
    write(&dir, "package.json", package_json);
    write(&dir, "package-lock.json", "{}");

    let r = detect_runtime(dir.path()).expect("detect");
    assert_eq!(r.kind, RuntimeKind::Node);
    assert_eq!(r.framework.as_deref(), framework);
    assert_eq!(r.command, command);
    assert_eq!(r.lockfile.as_deref(), Some("package-lock.json"));
}

#[test]
fn package_json_wins_over_python_files() {
    let dir = make_dir();
    write(&dir, "package.json", r#"{"dependencies": {"express": "^4"}}"#);
    write(&dir, "app.py", FLASK_APP);
    assert_eq!(detect_runtime(dir.path()).expect("detect").kind, RuntimeKind::Node);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn malformed_package_json_is_a_parse_error() {
    let dir = make_dir();
    write(&dir, "package.json", "{ not json");
    let err = detect_runtime(dir.path()).unwrap_err();
    assert!(matches!(err, DetectError::ParseError { .. }), "got: {err}");
}

#[test]
fn empty_dir_is_unknown() {
    let dir = make_dir();
    let err = detect_runtime(dir.path()).unwrap_err();
    assert!(matches!(err, DetectError::UnknownRuntime { .. }));
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

#[test]
fn apply_fills_runtime_command_and_health_port() {
    let dir = make_dir();
    write(&dir, "requirements.txt", "fastapi\n");
    write(&dir, "main.py", "from fastapi import FastAPI\n");
    let r = detect_runtime(dir.path()).expect("detect");

    let mut cfg = AppConfig::new(
        AppName::from("api"),
        dir.path().to_path_buf(),
        TargetConfig::local(PathBuf::from("/srv/api")),
    );
    r.apply(&mut cfg);

    assert_eq!(cfg.runtime.kind, RuntimeKind::Python);
    assert_eq!(cfg.runtime.lockfile, None, "default lockfile is not stored");
    assert_eq!(cfg.process.command[0], ".venv/bin/uvicorn");
    assert_eq!(cfg.health.url, "http://127.0.0.1:8000/");
    cfg.validate().expect("valid");
}
