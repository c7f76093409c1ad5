//! Source manifests: SHA-256 of every deployable file in a source tree.
//!
//! A manifest is the identity of a release: its [`Manifest::digest`] names the
//! release, its entries decide which files are uploaded and which are reused,
//! and its checksum rendering is what the target verifies against.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{io_err, ReleaseError};

/// Relative POSIX path → lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub files: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self {
            generated_at: Utc::now(),
            files,
        }
    }

    /// Hash of the sorted `(path, hash)` list. Independent of `generated_at`.
    pub fn digest(&self) -> String {
        let mut h = Sha256::new();
        for (path, hash) in &self.files {
            h.update(path.as_bytes());
            h.update([0u8]);
            h.update(hash.as_bytes());
            h.update([b'\n']);
        }
        hex::encode(h.finalize())
    }

    /// `sha256sum -c` input: `<hash>  <path>` per line.
    pub fn checksum_file(&self) -> String {
        self.files
            .iter()
            .map(|(path, hash)| format!("{hash}  {path}\n"))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, ReleaseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ReleaseError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Paths whose hash differs between `self` and `other`, including paths
    /// present on only one side. Sorted.
    pub fn changed_paths(&self, other: &Manifest) -> Vec<String> {
        let mut changed: Vec<String> = self
            .files
            .iter()
            .filter(|(path, hash)| other.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

/// Walk `source` and hash every regular file not matched by `ignore`.
///
/// Symlinks are not followed and not recorded.
pub fn scan(source: &Path, ignore: &[String]) -> Result<Manifest, ReleaseError> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy(), ignore));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                tracing::debug!("skipping symlink: {}", entry.path().display());
            }
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(rel, hash_file(entry.path())?);
    }

    tracing::debug!("scanned {} file(s) under {}", files.len(), source.display());
    Ok(Manifest::new(files))
}

/// SHA-256 of a file's bytes, streamed.
pub fn hash_file(path: &Path) -> Result<String, ReleaseError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Match one path component against the ignore list.
///
/// Patterns are exact names, `*suffix`, or `prefix*`.
pub fn is_ignored(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else {
            name == pattern
        }
    })
}
