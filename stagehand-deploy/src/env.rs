//! Dependency resolver: builds, reuses and links runtime environments.
//!
//! Environments live in `envs/<fingerprint>/` under the target root and are
//! shared by every release with the same fingerprint. A build is only
//! considered complete once `.stagehand-ready` exists inside it, so an
//! interrupted install is rebuilt from scratch on the next deploy.
//!
//! ```text
//! fingerprint = sha256(kind \0 interpreter --version \0 lockfile sha256 | "none")[..16]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use sha2::{Digest, Sha256};

use stagehand_core::types::{ReleaseId, RuntimeConfig, RuntimeKind};
use stagehand_release::layout::{ReleaseLayout, ENV_MARKER_FILE};
use stagehand_release::{Manifest, ReleaseStore};
use stagehand_transport::{quote_path, shell_quote, RemoteCommand, Transport};

use crate::error::DeployError;

/// Written last; its presence means the environment is complete.
pub const READY_MARKER: &str = ".stagehand-ready";

const INTERPRETER_MISSING_STATUS: i32 = 127;

/// What an environment is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec {
    pub kind: RuntimeKind,
    pub interpreter: String,
    /// Relative to the release root.
    pub lockfile: String,
}

impl EnvSpec {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            kind: runtime.kind,
            interpreter: runtime.interpreter().to_string(),
            lockfile: runtime.lockfile().to_string(),
        }
    }

    /// Link created inside each release, pointing into `envs/`.
    fn link_name(&self) -> Option<&'static str> {
        match self.kind {
            RuntimeKind::Python => Some(".venv"),
            RuntimeKind::Node => Some("node_modules"),
            RuntimeKind::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnv {
    pub fingerprint: String,
    pub reused: bool,
}

/// `sha256(kind, version, lockfile hash)`, first 16 hex chars.
pub fn fingerprint(kind: RuntimeKind, version: &str, lockfile_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(version.trim().as_bytes());
    hasher.update([0]);
    hasher.update(lockfile_hash.unwrap_or("none").as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(16);
    hex
}

pub struct EnvResolver<'a> {
    transport: &'a dyn Transport,
    layout: &'a ReleaseLayout,
}

impl<'a> EnvResolver<'a> {
    pub fn new(transport: &'a dyn Transport, layout: &'a ReleaseLayout) -> Self {
        Self { transport, layout }
    }

    /// `<interpreter> --version` on the target; stdout and stderr combined.
    pub fn interpreter_version(&self, spec: &EnvSpec) -> Result<String, DeployError> {
        let interp = shell_quote(&spec.interpreter);
        let script = format!(
            "command -v {interp} >/dev/null 2>&1 || exit {INTERPRETER_MISSING_STATUS}; {interp} --version 2>&1"
        );
        let out = self.transport.exec(&RemoteCommand::shell(script))?;
        if out.status == Some(INTERPRETER_MISSING_STATUS) {
            return Err(DeployError::Resolve(format!(
                "interpreter '{}' not found on {}",
                spec.interpreter,
                self.transport.name()
            )));
        }
        if !out.success() {
            return Err(DeployError::Resolve(format!(
                "'{} --version' failed: {}",
                spec.interpreter,
                out.stdout.trim()
            )));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Fingerprint of the environment `manifest` needs; `None` for runtime `none`.
    pub fn fingerprint_for(
        &self,
        spec: &EnvSpec,
        manifest: &Manifest,
    ) -> Result<Option<String>, DeployError> {
        if spec.kind == RuntimeKind::None {
            return Ok(None);
        }
        let version = self.interpreter_version(spec)?;
        let lock_hash = manifest.files.get(&spec.lockfile).map(String::as_str);
        Ok(Some(fingerprint(spec.kind, &version, lock_hash)))
    }

    /// Make sure the environment for `release` exists, then link it in.
    pub fn ensure(
        &self,
        spec: &EnvSpec,
        release: &ReleaseId,
        manifest: &Manifest,
    ) -> Result<Option<ResolvedEnv>, DeployError> {
        let Some(fp) = self.fingerprint_for(spec, manifest)? else {
            return Ok(None);
        };
        let env_dir = self.layout.env(&fp);
        let release_dir = self.layout.release(release);

        let reused = self.transport.exists(&env_dir.join(READY_MARKER))?;
        if reused {
            tracing::info!(app = %self.layout.app(), fingerprint = %fp, "reusing environment");
        } else {
            tracing::info!(app = %self.layout.app(), fingerprint = %fp, "building environment");
            let has_lockfile = manifest.files.contains_key(&spec.lockfile);
            let script = build_script(spec, &env_dir, &release_dir, has_lockfile);
            let out = self.transport.exec(&RemoteCommand::shell(script))?;
            if !out.success() {
                return Err(DeployError::Resolve(format!(
                    "building {} environment {fp} failed: {}",
                    spec.kind,
                    format!("{}{}", out.stdout, out.stderr).trim()
                )));
            }
        }

        self.link(spec, &env_dir, &release_dir)?;
        self.transport
            .write_file(&release_dir.join(ENV_MARKER_FILE), format!("{fp}\n").as_bytes())?;

        Ok(Some(ResolvedEnv {
            fingerprint: fp,
            reused,
        }))
    }

    fn link(&self, spec: &EnvSpec, env_dir: &Path, release_dir: &Path) -> Result<(), DeployError> {
        let Some(name) = spec.link_name() else {
            return Ok(());
        };
        let target = match spec.kind {
            RuntimeKind::Node => env_dir.join("node_modules"),
            _ => env_dir.to_path_buf(),
        };
        let link = release_dir.join(name);
        self.transport.script(
            &format!(
                "rm -rf {link} && ln -sfn {target} {link}",
                link = quote_path(&link),
                target = quote_path(&target),
            ),
            "link environment",
        )?;
        Ok(())
    }

    /// Fingerprints recorded by releases still on the target.
    pub fn referenced(&self) -> Result<BTreeSet<String>, DeployError> {
        let store = ReleaseStore::new(self.transport, self.layout);
        let mut fps = BTreeSet::new();
        for id in store.list()? {
            let marker = self.layout.release(&id).join(ENV_MARKER_FILE);
            if let Some(raw) = self.transport.read_to_string(&marker)? {
                let fp = raw.trim();
                if !fp.is_empty() {
                    fps.insert(fp.to_string());
                }
            }
        }
        Ok(fps)
    }

    /// Remove environments no remaining release refers to.
    pub fn prune(&self) -> Result<Vec<String>, DeployError> {
        let keep = self.referenced()?;
        let dir = quote_path(&self.layout.envs_dir());
        let listing = self.transport.script(
            &format!("if [ -d {dir} ]; then ls -1 {dir}; fi"),
            "list environments",
        )?;

        let removed: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !keep.contains(*name))
            .map(str::to_string)
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }

        let script = removed
            .iter()
            .map(|fp| format!("rm -rf {}", quote_path(&self.layout.env(fp))))
            .collect::<Vec<_>>()
            .join(" && ");
        self.transport.script(&script, "prune environments")?;
        tracing::info!(app = %self.layout.app(), count = removed.len(), "pruned environments");
        Ok(removed)
    }
}

fn build_script(spec: &EnvSpec, env_dir: &Path, release_dir: &Path, has_lockfile: bool) -> String {
    let env = quote_path(env_dir);
    let lock = quote_path(&release_dir.join(&spec.lockfile));
    let interp = shell_quote(&spec.interpreter);
    let mut lines = vec!["set -e".to_string(), format!("rm -rf {env}")];

    match spec.kind {
        RuntimeKind::Python => {
            lines.push(format!("{interp} -m venv {env}"));
            if has_lockfile {
                lines.push(format!(
                    "{env}/bin/pip install --disable-pip-version-check -q -r {lock}"
                ));
            }
        }
        RuntimeKind::Node => {
            lines.push(format!("mkdir -p {env}"));
            lines.push(format!(
                "cp {} {env}/",
                quote_path(&release_dir.join("package.json"))
            ));
            if has_lockfile {
                lines.push(format!("cp {lock} {env}/"));
                lines.push(format!("cd {env} && npm ci --omit=dev"));
            } else {
                lines.push(format!("cd {env} && npm install --omit=dev"));
            }
        }
        RuntimeKind::None => {}
    }

    lines.push(format!("touch {env}/{READY_MARKER}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn fingerprint_is_16_hex_and_stable() {
        let a = fingerprint(RuntimeKind::Python, "Python 3.11.4", Some("abc"));
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, fingerprint(RuntimeKind::Python, "Python 3.11.4\n", Some("abc")));
    }

    #[test]
    fn fingerprint_changes_with_inputs() {
        let base = fingerprint(RuntimeKind::Python, "Python 3.11.4", Some("abc"));
        assert_ne!(base, fingerprint(RuntimeKind::Python, "Python 3.12.0", Some("abc")));
        assert_ne!(base, fingerprint(RuntimeKind::Python, "Python 3.11.4", Some("def")));
        assert_ne!(base, fingerprint(RuntimeKind::Python, "Python 3.11.4", None));
        assert_ne!(base, fingerprint(RuntimeKind::Node, "Python 3.11.4", Some("abc")));
    }

    #[test]
    fn python_script_installs_lockfile_and_marks_ready_last() {
        let spec = EnvSpec::from_runtime(&RuntimeConfig {
            kind: RuntimeKind::Python,
            ..RuntimeConfig::default()
        });
        let script = build_script(
            &spec,
            &PathBuf::from("/srv/app/envs/abcd"),
            &PathBuf::from("/srv/app/releases/r1"),
            true,
        );
        assert!(script.contains("python3 -m venv /srv/app/envs/abcd"));
        assert!(script.contains(
            "/srv/app/envs/abcd/bin/pip install --disable-pip-version-check -q -r /srv/app/releases/r1/requirements.txt"
        ));
        assert!(script.trim_end().ends_with("touch /srv/app/envs/abcd/.stagehand-ready"));
    }

    #[test]
    fn python_script_without_lockfile_skips_pip() {
        let spec = EnvSpec::from_runtime(&RuntimeConfig {
            kind: RuntimeKind::Python,
            ..RuntimeConfig::default()
        });
        let script = build_script(&spec, Path::new("/e"), Path::new("/r"), false);
        assert!(!script.contains("pip install"));
    }

    #[test]
    fn node_script_uses_npm_ci_with_lockfile() {
        let spec = EnvSpec::from_runtime(&RuntimeConfig {
            kind: RuntimeKind::Node,
            ..RuntimeConfig::default()
        });
        let script = build_script(&spec, Path::new("/e"), Path::new("/r"), true);
        assert!(script.contains("cp /r/package.json /e/"));
        assert!(script.contains("cp /r/package-lock.json /e/"));
        assert!(script.contains("npm ci --omit=dev"));
    }
}
