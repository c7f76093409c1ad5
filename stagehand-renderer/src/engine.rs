//! Tera rendering engine: [`Artefact`] enum and [`Renderer`].
//!
//! | Artefact      | Template               | Lands at (on the target)                  |
//! |---------------|------------------------|-------------------------------------------|
//! | `Launcher`    | `launch.sh.tera`       | `releases/<id>/.stagehand-launch.sh`      |
//! | `SystemdUnit` | `systemd.service.tera` | `<unit dir>/<unit>.service`               |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::{Tera, Value};

use stagehand_core::registry::stagehand_root;
use stagehand_transport::shell_quote;

use crate::context::SupervisorContext;
use crate::error::{io_err, RenderError};

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("launch.sh.tera", include_str!("templates/launch.sh.tera")),
    ("systemd.service.tera", include_str!("templates/systemd.service.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

/// `{{ value | sh }}`: POSIX shell quoting.
fn sh_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(Value::String(shell_quote(&raw)))
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.register_filter("sh", sh_filter);
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// Artefact
// ---------------------------------------------------------------------------

/// Files the supervisors place on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artefact {
    /// Detaches the serving process and records its pid.
    Launcher,
    SystemdUnit,
}

impl Artefact {
    pub fn all() -> &'static [Artefact] {
        &[Artefact::Launcher, Artefact::SystemdUnit]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            Artefact::Launcher => "launch.sh.tera",
            Artefact::SystemdUnit => "systemd.service.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Tera-based renderer with optional user overrides.
///
/// A `.tera` file in the user template directory replaces the embedded template
/// of the same (lowercased) file name. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Embedded templates plus overrides from `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(user_template_dir)? })
    }

    /// Overrides from `<home>/.stagehand/templates/`.
    pub fn for_home(home: &Path) -> Result<Self, RenderError> {
        Self::new(Some(&templates_dir_at(home)))
    }

    pub fn render(&self, artefact: Artefact, ctx: &SupervisorContext) -> Result<String, RenderError> {
        if ctx.command_line.is_empty() {
            return Err(RenderError::EmptyCommand { app: ctx.app.clone() });
        }
        let template = artefact.template_name();
        let tera_ctx = ctx.to_tera_context().map_err(|source| RenderError::Template {
            template: template.to_string(),
            source,
        })?;
        self.tera
            .render(template, &tera_ctx)
            .map_err(|source| RenderError::Template {
                template: template.to_string(),
                source,
            })
    }
}

/// `<home>/.stagehand/templates/`
pub fn templates_dir_at(home: &Path) -> PathBuf {
    stagehand_root(home).join("templates")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
