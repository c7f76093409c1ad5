//! Runtime detection for `stagehand-detector`.
//!
//! `detect_runtime(path)` inspects indicator files in a source tree and returns
//! the runtime kind, web framework, lockfile, a start command, and the port
//! that command listens on. `package.json` takes priority over Python
//! indicators, since Python tooling files are common in Node repos but not the
//! reverse.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use stagehand_core::types::{AppConfig, RuntimeKind};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Confidence level of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Indicator file with a framework match.
    High,
    /// Runtime identified, framework unknown; the start command is a guess.
    Medium,
}

/// What `init` should pre-fill for a source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedRuntime {
    pub kind: RuntimeKind,
    /// Framework name (e.g. `"Flask"`, `"Express"`).
    pub framework: Option<String>,
    /// Lockfile relative to the source root, if one exists.
    pub lockfile: Option<String>,
    /// argv run from the release directory.
    pub command: Vec<String>,
    /// Port the start command listens on, when known.
    pub port: Option<u16>,
    pub confidence: Confidence,
}

impl DetectedRuntime {
    /// Copy the detection into `config`.
    ///
    /// The health URL port is rewritten only when the port is known; the
    /// lockfile is recorded only when it differs from the runtime default.
    pub fn apply(&self, config: &mut AppConfig) {
        config.runtime.kind = self.kind;
        config.runtime.lockfile = None;
        if let Some(lockfile) = &self.lockfile {
            if lockfile != config.runtime.lockfile() {
                config.runtime.lockfile = Some(lockfile.clone());
            }
        }
        config.process.command = self.command.clone();
        if let Some(port) = self.port {
            config.health.url = format!("http://127.0.0.1:{port}/");
        }
    }
}

/// Errors from runtime detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("could not determine runtime for '{path}': no known indicator file found")]
    UnknownRuntime { path: PathBuf },
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DetectError {
    DetectError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the runtime of the source tree at `path`.
///
/// Returns `DetectError::UnknownRuntime` if nothing deployable is recognised.
pub fn detect_runtime(path: &Path) -> Result<DetectedRuntime, DetectError> {
    if let Some(r) = detect_node(path)? {
        return Ok(r);
    }
    if let Some(r) = detect_python(path)? {
        return Ok(r);
    }
    Err(DetectError::UnknownRuntime {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Runtime detectors
// ---------------------------------------------------------------------------

/// Files that may hold the WSGI/ASGI application object, in priority order.
const PYTHON_ENTRIES: &[&str] = &["app.py", "main.py", "wsgi.py", "server.py"];
const PYTHON_MANIFESTS: &[&str] = &["requirements.txt", "pyproject.toml", "Pipfile", "setup.py"];

fn detect_python(path: &Path) -> Result<Option<DetectedRuntime>, DetectError> {
    let entry = PYTHON_ENTRIES.iter().find(|f| path.join(f).is_file()).copied();
    let manage_py = path.join("manage.py").is_file();
    let manifests: Vec<&str> = PYTHON_MANIFESTS
        .iter()
        .filter(|f| path.join(f).is_file())
        .copied()
        .collect();

    if entry.is_none() && !manage_py && manifests.is_empty() {
        return Ok(None);
    }

    // Framework hints come from both the dependency list and the entry module.
    let mut corpus = String::new();
    for file in manifests.iter().copied().chain(entry) {
        corpus.push_str(&read(&path.join(file))?.to_lowercase());
        corpus.push('\n');
    }

    let module = entry.map(|e| e.trim_end_matches(".py")).unwrap_or("app");

    let (framework, command, port) = if corpus.contains("fastapi") {
        (
            Some("FastAPI"),
            argv(&[".venv/bin/uvicorn", &format!("{module}:app"), "--host", "0.0.0.0", "--port", "8000"]),
            Some(8000),
        )
    } else if manage_py && corpus.contains("django") {
        (
            Some("Django"),
            argv(&[".venv/bin/python", "manage.py", "runserver", "0.0.0.0:8000", "--noreload"]),
            Some(8000),
        )
    } else if corpus.contains("flask") {
        (
            Some("Flask"),
            argv(&[".venv/bin/flask", "--app", module, "run", "--host", "0.0.0.0", "--port", "5000"]),
            Some(5000),
        )
    } else {
        let script = entry.unwrap_or("app.py");
        (None, argv(&[".venv/bin/python", script]), None)
    };

    let lockfile = path
        .join("requirements.txt")
        .is_file()
        .then(|| "requirements.txt".to_string());

    Ok(Some(DetectedRuntime {
        kind: RuntimeKind::Python,
        framework: framework.map(str::to_string),
        lockfile,
        command,
        port,
        confidence: if framework.is_some() { Confidence::High } else { Confidence::Medium },
    }))
}

fn detect_node(path: &Path) -> Result<Option<DetectedRuntime>, DetectError> {
    let file = path.join("package.json");
    if !file.exists() {
        return Ok(None);
    }
    let content = read(&file)?;
    let json: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| DetectError::ParseError {
            path: file.clone(),
            message: e.to_string(),
        })?;

    let deps = collect_package_json_deps(&json);
    let framework = if deps.contains("next") {
        Some("Next.js")
    } else if deps.contains("@nestjs/core") {
        Some("NestJS")
    } else if deps.contains("express") {
        Some("Express")
    } else if deps.contains("fastify") {
        Some("Fastify")
    } else if deps.contains("koa") {
        Some("Koa")
    } else {
        None
    };

    let has_start = json
        .get("scripts")
        .and_then(|s| s.get("start"))
        .is_some();
    let command = if has_start {
        argv(&["npm", "run", "start"])
    } else {
        let main = json
            .get("main")
            .and_then(|m| m.as_str())
            .unwrap_or("index.js");
        argv(&["node", main])
    };

    let lockfile = ["package-lock.json", "npm-shrinkwrap.json"]
        .iter()
        .find(|f| path.join(f).is_file())
        .map(|f| f.to_string());

    Ok(Some(DetectedRuntime {
        kind: RuntimeKind::Node,
        framework: framework.map(str::to_string),
        lockfile,
        command,
        port: framework.map(|_| 3000),
        confidence: if framework.is_some() { Confidence::High } else { Confidence::Medium },
    }))
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn read(path: &Path) -> Result<String, DetectError> {
    fs::read_to_string(path).map_err(|e| io_err(path, e))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn collect_package_json_deps(json: &serde_json::Value) -> HashSet<String> {
    let mut deps = HashSet::new();
    for key in &["dependencies", "peerDependencies"] {
        if let Some(obj) = json.get(key).and_then(|v| v.as_object()) {
            for k in obj.keys() {
                deps.insert(k.clone());
            }
        }
    }
    deps
}
