//! Unified diff between the live release and the local source tree.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;

use stagehand_core::types::ReleaseId;

use crate::error::{io_err, ReleaseError};
use crate::manifest::{self, Manifest};
use crate::store::ReleaseStore;

/// A single changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub unified_diff: String,
}

/// Diff result for an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDiff {
    /// Live release compared against; `None` if nothing is deployed.
    pub release: Option<ReleaseId>,
    pub diffs: Vec<FileDiff>,
}

/// What the next deploy would change, file by file.
///
/// Live contents are read through the transport; nothing is written.
pub fn diff_app(
    store: &ReleaseStore<'_>,
    source: &Path,
    ignore: &[String],
) -> Result<AppDiff, ReleaseError> {
    let local = manifest::scan(source, ignore)?;
    let (release, live) = match store.live()? {
        Some((id, m)) => (Some(id), m),
        None => (None, Manifest::new(Default::default())),
    };

    let mut diffs = Vec::new();
    for rel in local.changed_paths(&live) {
        let old = match (&release, live.files.contains_key(&rel)) {
            (Some(id), true) => store
                .transport()
                .read_to_string(&store.layout().release(id).join(&rel))?
                .unwrap_or_default(),
            _ => String::new(),
        };
        let new = read_local_or_empty(&source.join(&rel))?;

        let unified_diff = if old.contains('\0') || new.contains('\0') {
            format!("Binary files a/{rel} and b/{rel} differ\n")
        } else {
            TextDiff::from_lines(&normalize(&old), &normalize(&new))
                .unified_diff()
                .header(&format!("a/{rel}"), &format!("b/{rel}"))
                .context_radius(3)
                .to_string()
        };
        diffs.push(FileDiff { path: rel, unified_diff });
    }

    Ok(AppDiff { release, diffs })
}

fn read_local_or_empty(path: &Path) -> Result<String, ReleaseError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n")
}
