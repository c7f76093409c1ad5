//! Environment resolution with a stand-in interpreter, and systemd control
//! through a recording transport.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use stagehand_core::types::{
    AppConfig, AppName, ReleaseId, RuntimeConfig, RuntimeKind, SupervisorKind, TargetConfig,
};
use stagehand_deploy::env::{EnvResolver, EnvSpec, READY_MARKER};
use stagehand_deploy::supervisor::{supervisor_for, ProcessStatus, StopOutcome};
use stagehand_deploy::DeployError;
use stagehand_release::layout::ENV_MARKER_FILE;
use stagehand_release::{manifest, ReleaseLayout, ReleaseStore};
use stagehand_renderer::Renderer;
use stagehand_transport::{
    CommandOutput, LocalTransport, RemoteCommand, Transport, TransportError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Python environments
// ---------------------------------------------------------------------------

/// A `python3` that answers `--version` and fakes `-m venv` with a pip that
/// logs its arguments.
const FAKE_PYTHON: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "Python 3.11.4"; exit 0; fi
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
  mkdir -p "$3/bin"
  printf '#!/bin/sh\necho "$@" >> "$(dirname "$0")/../pip.log"\n' > "$3/bin/pip"
  chmod +x "$3/bin/pip"
  exit 0
fi
exit 1
"#;

struct EnvFixture {
    _dir: TempDir,
    source: PathBuf,
    layout: ReleaseLayout,
    spec: EnvSpec,
}

impl EnvFixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("app.py"), "print('hi')\n").unwrap();
        std::fs::write(source.join("requirements.txt"), "flask==3.0.0\n").unwrap();

        let python = dir.path().join("python3");
        std::fs::write(&python, FAKE_PYTHON).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let layout = ReleaseLayout::new(dir.path().join("srv"), AppName::from("flask_app"));
        let spec = EnvSpec::from_runtime(&RuntimeConfig {
            kind: RuntimeKind::Python,
            interpreter: Some(python.to_string_lossy().into_owned()),
            lockfile: None,
        });
        Self {
            _dir: dir,
            source,
            layout,
            spec,
        }
    }

    /// Stage and promote the current source; returns its id and manifest.
    fn stage(&self, transport: &dyn Transport) -> (ReleaseId, manifest::Manifest) {
        let store = ReleaseStore::new(transport, &self.layout);
        let manifest = manifest::scan(&self.source, &[]).unwrap();
        let plan = store.plan(&manifest, chrono::Utc::now()).unwrap();
        let staged = store.stage(&self.source, &manifest, &plan, false).unwrap();
        store.activate(&staged.id).unwrap();
        (staged.id, manifest)
    }
}

#[test]
fn python_env_is_built_once_and_reused() {
    let fx = EnvFixture::new();
    let transport = LocalTransport::new();
    let resolver = EnvResolver::new(&transport, &fx.layout);

    let (first, manifest) = fx.stage(&transport);
    let built = resolver.ensure(&fx.spec, &first, &manifest).unwrap().unwrap();
    assert!(!built.reused);

    let env_dir = fx.layout.env(&built.fingerprint);
    assert!(env_dir.join(READY_MARKER).exists());
    let pip_log = std::fs::read_to_string(env_dir.join("pip.log")).unwrap();
    assert!(pip_log.contains("install --disable-pip-version-check -q -r"));
    assert!(pip_log.contains("requirements.txt"));

    let release_dir = fx.layout.release(&first);
    assert_eq!(
        std::fs::read_link(release_dir.join(".venv")).unwrap(),
        env_dir
    );
    assert_eq!(
        std::fs::read_to_string(release_dir.join(ENV_MARKER_FILE)).unwrap().trim(),
        built.fingerprint
    );

    std::fs::write(fx.source.join("app.py"), "print('v2')\n").unwrap();
    let (second, manifest) = fx.stage(&transport);
    let again = resolver.ensure(&fx.spec, &second, &manifest).unwrap().unwrap();
    assert!(again.reused);
    assert_eq!(again.fingerprint, built.fingerprint);
}

#[test]
fn lockfile_change_builds_new_env_and_prune_drops_old() {
    let fx = EnvFixture::new();
    let transport = LocalTransport::new();
    let resolver = EnvResolver::new(&transport, &fx.layout);

    let (first, manifest) = fx.stage(&transport);
    let old = resolver.ensure(&fx.spec, &first, &manifest).unwrap().unwrap();

    std::fs::write(fx.source.join("requirements.txt"), "flask==3.1.0\n").unwrap();
    let (second, manifest) = fx.stage(&transport);
    let new = resolver.ensure(&fx.spec, &second, &manifest).unwrap().unwrap();
    assert_ne!(old.fingerprint, new.fingerprint);
    assert!(!new.reused);

    // Only the second release remains, so only its env is referenced.
    ReleaseStore::new(&transport, &fx.layout).prune(1).unwrap();
    let removed = resolver.prune().unwrap();
    assert_eq!(removed, vec![old.fingerprint.clone()]);
    assert!(!fx.layout.env(&old.fingerprint).exists());
    assert!(fx.layout.env(&new.fingerprint).exists());
}

#[test]
fn interrupted_build_is_redone() {
    let fx = EnvFixture::new();
    let transport = LocalTransport::new();
    let resolver = EnvResolver::new(&transport, &fx.layout);
    let (release, manifest) = fx.stage(&transport);

    let fp = resolver.fingerprint_for(&fx.spec, &manifest).unwrap().unwrap();
    // A half-built environment without the ready marker.
    std::fs::create_dir_all(fx.layout.env(&fp).join("bin")).unwrap();

    let env = resolver.ensure(&fx.spec, &release, &manifest).unwrap().unwrap();
    assert!(!env.reused);
    assert!(fx.layout.env(&fp).join(READY_MARKER).exists());
}

#[test]
fn missing_interpreter_is_a_resolve_error() {
    let fx = EnvFixture::new();
    let transport = LocalTransport::new();
    let resolver = EnvResolver::new(&transport, &fx.layout);
    let (release, manifest) = fx.stage(&transport);

    let spec = EnvSpec {
        interpreter: "stagehand-no-such-python".to_string(),
        ..fx.spec.clone()
    };
    let err = resolver.ensure(&spec, &release, &manifest).unwrap_err();
    match err {
        DeployError::Resolve(msg) => assert!(msg.contains("not found")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn runtime_none_needs_no_environment() {
    let fx = EnvFixture::new();
    let transport = LocalTransport::new();
    let resolver = EnvResolver::new(&transport, &fx.layout);
    let (release, manifest) = fx.stage(&transport);
    let spec = EnvSpec::from_runtime(&RuntimeConfig::default());
    assert!(resolver.ensure(&spec, &release, &manifest).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// systemd
// ---------------------------------------------------------------------------

/// Records every command; answers from a fixed script of responses.
#[derive(Default)]
struct RecordingTransport {
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
    active: bool,
}

impl Transport for RecordingTransport {
    fn name(&self) -> String {
        "recording".to_string()
    }

    fn exec(&self, cmd: &RemoteCommand) -> Result<CommandOutput, TransportError> {
        let line = cmd.render();
        self.commands.lock().unwrap().push(line.clone());
        let stdout = if line.contains("is-active") {
            if self.active { "active\n" } else { "inactive\n" }
        } else if line.contains("MainPID") {
            "4242\n"
        } else if line.contains("$HOME") {
            "/home/deploy"
        } else {
            ""
        };
        let status = if line.contains(" stop ") && !self.active { 5 } else { 0 };
        Ok(CommandOutput {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn upload(&self, local: &Path, remote: &Path) -> Result<(), TransportError> {
        let contents = std::fs::read_to_string(local).unwrap_or_default();
        self.uploads
            .lock()
            .unwrap()
            .push((remote.to_path_buf(), contents));
        Ok(())
    }
}

fn systemd_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        AppName::from("flask_app"),
        PathBuf::from("/src/flask_app"),
        TargetConfig::local(PathBuf::from("/srv/flask_app")),
    );
    cfg.process.supervisor = SupervisorKind::Systemd;
    cfg.process.command = vec![".venv/bin/flask".into(), "run".into()];
    cfg
}

#[test]
fn systemd_start_uploads_unit_and_restarts() {
    let cfg = systemd_config();
    let layout = ReleaseLayout::new(cfg.target.root.clone(), cfg.name.clone());
    let sup = supervisor_for(&cfg, &layout, Renderer::new(None).unwrap());
    let transport = RecordingTransport::default();

    sup.start(&transport, &ReleaseId::from("20250101T000000Z-abcdef12"))
        .unwrap();

    let uploads = transport.uploads.lock().unwrap();
    let (path, unit) = &uploads[0];
    assert_eq!(
        path,
        &PathBuf::from("/home/deploy/.config/systemd/user/stagehand-flask_app.service")
    );
    assert!(unit.contains("WorkingDirectory=/srv/flask_app/current"));
    assert!(unit.contains("WantedBy=default.target"));

    let commands = transport.commands.lock().unwrap();
    let systemctl: Vec<&str> = commands
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("systemctl"))
        .collect();
    assert_eq!(
        systemctl,
        vec![
            "systemctl --user daemon-reload",
            "systemctl --user enable stagehand-flask_app.service",
            "systemctl --user restart stagehand-flask_app.service",
        ]
    );
}

#[test]
fn systemd_system_mode_uses_etc() {
    let mut cfg = systemd_config();
    cfg.process.systemd.user_mode = false;
    let layout = ReleaseLayout::new(cfg.target.root.clone(), cfg.name.clone());
    let sup = supervisor_for(&cfg, &layout, Renderer::new(None).unwrap());
    let transport = RecordingTransport::default();

    sup.start(&transport, &ReleaseId::from("r1")).unwrap();
    let uploads = transport.uploads.lock().unwrap();
    assert_eq!(
        uploads[0].0,
        PathBuf::from("/etc/systemd/system/stagehand-flask_app.service")
    );
    assert!(uploads[0].1.contains("WantedBy=multi-user.target"));
}

#[test]
fn systemd_stop_and_status() {
    let cfg = systemd_config();
    let layout = ReleaseLayout::new(cfg.target.root.clone(), cfg.name.clone());

    let idle = RecordingTransport::default();
    let sup = supervisor_for(&cfg, &layout, Renderer::new(None).unwrap());
    assert_eq!(sup.stop(&idle).unwrap(), StopOutcome::NotRunning);
    assert_eq!(sup.status(&idle).unwrap(), ProcessStatus::Stopped);

    let running = RecordingTransport {
        active: true,
        ..RecordingTransport::default()
    };
    assert_eq!(sup.stop(&running).unwrap(), StopOutcome::Stopped);
    assert_eq!(
        sup.status(&running).unwrap(),
        ProcessStatus::Running { pid: Some(4242) }
    );
}
