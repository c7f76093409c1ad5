//! Exercises both transports against a temp directory standing in for the target.
//!
//! The shell transport is configured with `sh -c {command}` / `cp {src} {dest}`
//! wrappers, which keeps the test hermetic while going through the same
//! placeholder expansion a remote setup uses.

use std::path::PathBuf;

use rstest::rstest;
use stagehand_core::types::{TargetConfig, TransportKind};
use stagehand_transport::{transport_for, RemoteCommand, Transport, TransportError};
use tempfile::TempDir;

fn target(kind: TransportKind, root: PathBuf) -> TargetConfig {
    let mut t = TargetConfig::local(root);
    t.transport = kind;
    if kind == TransportKind::Shell {
        t.exec_wrapper = vec!["sh".into(), "-c".into(), "{command}".into()];
        t.copy_wrapper = vec!["cp".into(), "{src}".into(), "{dest}".into()];
    }
    t
}

#[rstest]
#[case(TransportKind::Local)]
#[case(TransportKind::Shell)]
fn upload_then_exec_sees_the_file(#[case] kind: TransportKind) {
    let root = TempDir::new().expect("root");
    let local = TempDir::new().expect("local");
    let src = local.path().join("app.py");
    std::fs::write(&src, "print('hello')\n").expect("write");

    let t = transport_for(&target(kind, root.path().to_path_buf())).expect("transport");
    let dest = root.path().join("staging/r1/app.py");
    t.upload(&src, &dest).expect("upload");

    let out = t
        .run(
            &RemoteCommand::new("cat").arg("app.py").cwd(root.path().join("staging/r1")),
            "cat",
        )
        .expect("run");
    assert_eq!(out.stdout, "print('hello')\n");
}

#[rstest]
#[case(TransportKind::Local)]
#[case(TransportKind::Shell)]
fn failing_command_maps_to_command_failed(#[case] kind: TransportKind) {
    let root = TempDir::new().expect("root");
    let t = transport_for(&target(kind, root.path().to_path_buf())).expect("transport");

    let err = t.script("echo nope >&2; exit 3", "probe").unwrap_err();
    match err {
        TransportError::CommandFailed { status, stderr, .. } => {
            assert_eq!(status, Some(3));
            assert_eq!(stderr, "nope");
        }
        other => panic!("expected CommandFailed, got {other}"),
    }
}

#[test]
fn shell_transport_without_wrappers_is_rejected() {
    let mut t = TargetConfig::local(PathBuf::from("/srv/app"));
    t.transport = TransportKind::Shell;
    assert!(transport_for(&t).is_err());
}
