//! Release staging, promotion, activation and retention on a target.
//!
//! ## `stage`: 5-step protocol
//!
//! 1. Recreate `staging/<id>/` (a leftover of the same id is removed first).
//! 2. Copy files whose hash matches the live manifest from the live release,
//!    target-side, then check the copies against the new manifest. Copies that
//!    fail (edited or deleted on the target) are uploaded from the source
//!    along with everything else.
//! 3. Upload the manifest and checksum file.
//! 4. Optionally verify every checksum on the target.
//! 5. `mv staging/<id> releases/<id>` (promotion).
//!
//! `current` is only ever changed by [`ReleaseStore::activate`], which swaps the
//! symlink atomically. A failure anywhere in `stage` leaves it untouched.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use stagehand_core::types::ReleaseId;
use stagehand_transport::{quote_path, RemoteCommand, Transport};

use crate::error::ReleaseError;
use crate::layout::{ReleaseLayout, CHECKSUM_FILE, MANIFEST_FILE};
use crate::manifest::Manifest;

/// Exit status the activation script uses for "no such release".
const MISSING_RELEASE_STATUS: i32 = 44;
/// Files per target-side copy script.
const REUSE_BATCH: usize = 200;
/// Checksum list for the reused subset; removed once checked.
const REUSE_CHECKSUM_FILE: &str = ".stagehand-reuse-sha256";

// ---------------------------------------------------------------------------
// Plan / result types
// ---------------------------------------------------------------------------

/// What `stage` will do. Produced without touching the target beyond reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub release: ReleaseId,
    /// Live release at planning time; source of reused files.
    pub previous: Option<ReleaseId>,
    pub upload: Vec<String>,
    pub reuse: Vec<String>,
}

/// A promoted, not yet activated release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRelease {
    pub id: ReleaseId,
    pub uploaded: usize,
    pub reused: usize,
}

/// Build a stage plan from the new manifest and the live one.
///
/// `existing` lists releases already on the target; the generated id is pushed
/// forward one second at a time until it sorts after all of them, keeping
/// lexical order equal to deploy order.
pub fn plan(
    manifest: &Manifest,
    live: Option<(&ReleaseId, &Manifest)>,
    existing: &[ReleaseId],
    at: DateTime<Utc>,
) -> StagePlan {
    let digest = manifest.digest();
    let mut when = at;
    let mut release = ReleaseId::generate(when, &digest);
    while existing.iter().any(|e| e >= &release) {
        when += Duration::seconds(1);
        release = ReleaseId::generate(when, &digest);
    }

    let mut upload = Vec::new();
    let mut reuse = Vec::new();
    for (path, hash) in &manifest.files {
        let unchanged = live
            .map(|(_, m)| m.files.get(path) == Some(hash))
            .unwrap_or(false);
        if unchanged {
            reuse.push(path.clone());
        } else {
            upload.push(path.clone());
        }
    }

    StagePlan {
        release,
        previous: live.map(|(id, _)| id.clone()),
        upload,
        reuse,
    }
}

// ---------------------------------------------------------------------------
// ReleaseStore
// ---------------------------------------------------------------------------

/// Release operations for one app on one target.
pub struct ReleaseStore<'a> {
    transport: &'a dyn Transport,
    layout: &'a ReleaseLayout,
}

impl<'a> ReleaseStore<'a> {
    pub fn new(transport: &'a dyn Transport, layout: &'a ReleaseLayout) -> Self {
        Self { transport, layout }
    }

    pub fn layout(&self) -> &ReleaseLayout {
        self.layout
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Release `current` points at, if any.
    pub fn current(&self) -> Result<Option<ReleaseId>, ReleaseError> {
        let link = quote_path(&self.layout.current());
        let out = self.transport.script(
            &format!("if [ -L {link} ]; then readlink {link}; fi"),
            "read current release",
        )?;
        let target = out.trim();
        if target.is_empty() {
            return Ok(None);
        }
        Ok(Path::new(target)
            .file_name()
            .map(|n| ReleaseId::from(n.to_string_lossy().as_ref())))
    }

    /// Promoted releases, oldest first.
    pub fn list(&self) -> Result<Vec<ReleaseId>, ReleaseError> {
        let dir = quote_path(&self.layout.releases_dir());
        let out = self.transport.script(
            &format!("if [ -d {dir} ]; then ls -1 {dir}; fi"),
            "list releases",
        )?;
        let mut ids: Vec<ReleaseId> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ReleaseId::from)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Newest release strictly older than `id`.
    pub fn previous_of(&self, id: &ReleaseId) -> Result<Option<ReleaseId>, ReleaseError> {
        Ok(self.list()?.into_iter().rev().find(|r| r < id))
    }

    pub fn fetch_manifest(&self, id: &ReleaseId) -> Result<Option<Manifest>, ReleaseError> {
        let path = self.layout.release(id).join(MANIFEST_FILE);
        match self.transport.read_to_string(&path)? {
            Some(raw) => Ok(Some(Manifest::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// The live release together with its manifest.
    pub fn live(&self) -> Result<Option<(ReleaseId, Manifest)>, ReleaseError> {
        let Some(id) = self.current()? else {
            return Ok(None);
        };
        Ok(self.fetch_manifest(&id)?.map(|m| (id, m)))
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Plan against the live release.
    pub fn plan(&self, manifest: &Manifest, at: DateTime<Utc>) -> Result<StagePlan, ReleaseError> {
        let live = self.live()?;
        let existing = self.list()?;
        Ok(plan(
            manifest,
            live.as_ref().map(|(id, m)| (id, m)),
            &existing,
            at,
        ))
    }

    /// Execute `plan`: upload, reuse, verify, promote.
    pub fn stage(
        &self,
        source: &Path,
        manifest: &Manifest,
        plan: &StagePlan,
        verify: bool,
    ) -> Result<StagedRelease, ReleaseError> {
        let id = &plan.release;
        let staging = self.layout.staging(id);

        // Step 1: fresh staging dir.
        self.transport.script(
            &format!(
                "rm -rf {s} && mkdir -p {s} {r}",
                s = quote_path(&staging),
                r = quote_path(&self.layout.releases_dir()),
            ),
            "prepare staging directory",
        )?;

        // Step 2: reuse from the live release, repair bad copies, upload the rest.
        let mut upload = plan.upload.clone();
        let mut reused = 0;
        if let Some(previous) = &plan.previous {
            let from = self.layout.release(previous);
            for chunk in plan.reuse.chunks(REUSE_BATCH) {
                self.transport
                    .script(&reuse_script(&from, &staging, chunk), "reuse unchanged files")?;
            }
            let stale = self.check_reused(&staging, manifest, &plan.reuse)?;
            if !stale.is_empty() {
                tracing::warn!(
                    "{} reused file(s) differ from release {} on the target; uploading them",
                    stale.len(),
                    previous
                );
            }
            reused = plan.reuse.len() - stale.len();
            upload.extend(stale);
        }
        for rel in &upload {
            self.transport.upload(&source.join(rel), &staging.join(rel))?;
        }
        tracing::info!("staged {}: {} uploaded, {} reused", id, upload.len(), reused);

        // Step 3: manifest + checksums.
        self.transport
            .write_file(&staging.join(MANIFEST_FILE), manifest.to_json()?.as_bytes())?;
        self.transport
            .write_file(&staging.join(CHECKSUM_FILE), manifest.checksum_file().as_bytes())?;

        // Step 4: verify.
        if verify {
            let out = self.transport.exec(
                &RemoteCommand::shell(checksum_script(CHECKSUM_FILE)).cwd(&staging),
            )?;
            if !out.success() {
                let detail = format!("{}{}", out.stdout, out.stderr).trim().to_string();
                return Err(ReleaseError::VerificationFailed {
                    release: id.clone(),
                    detail,
                });
            }
        }

        // Step 5: promote.
        self.transport.script(
            &format!(
                "rm -rf {dest} && mv {src} {dest}",
                src = quote_path(&staging),
                dest = quote_path(&self.layout.release(id)),
            ),
            "promote release",
        )?;
        tracing::info!("promoted release {}", id);

        Ok(StagedRelease {
            id: id.clone(),
            uploaded: upload.len(),
            reused,
        })
    }

    /// Check the reused copies in `staging` against `manifest`. Returns the
    /// paths that must be uploaded instead, sorted.
    ///
    /// If the target cannot report per-file results (no checksum tool), every
    /// reused path is returned.
    fn check_reused(
        &self,
        staging: &Path,
        manifest: &Manifest,
        reused: &[String],
    ) -> Result<Vec<String>, ReleaseError> {
        if reused.is_empty() {
            return Ok(vec![]);
        }
        let list: String = reused
            .iter()
            .filter_map(|path| manifest.files.get(path).map(|hash| format!("{hash}  {path}\n")))
            .collect();
        self.transport
            .write_file(&staging.join(REUSE_CHECKSUM_FILE), list.as_bytes())?;

        let script = format!(
            "{}; status=$?; rm -f {REUSE_CHECKSUM_FILE}; exit $status",
            checksum_script(REUSE_CHECKSUM_FILE)
        );
        let out = self
            .transport
            .exec(&RemoteCommand::shell(script).cwd(staging))?;
        if out.success() {
            return Ok(vec![]);
        }

        let (missing, modified) = parse_check_failures(&out.stdout);
        if missing.is_empty() && modified.is_empty() {
            tracing::warn!(
                "could not check reused files in {}: {}",
                staging.display(),
                out.stderr.trim()
            );
            return Ok(reused.to_vec());
        }
        let mut stale: Vec<String> = missing.into_iter().chain(modified).collect();
        stale.sort();
        Ok(stale)
    }

    // -----------------------------------------------------------------------
    // Activation / retention
    // -----------------------------------------------------------------------

    /// Point `current` at `id` with a symlink rename.
    pub fn activate(&self, id: &ReleaseId) -> Result<(), ReleaseError> {
        let root = quote_path(self.layout.root());
        let rel = quote_path(&Path::new("releases").join(id.as_str()));
        let script = format!(
            "cd {root} && {{ [ -d {rel} ] || exit {MISSING_RELEASE_STATUS}; }} && \
             ln -sfn {rel} current.tmp && \
             {{ mv -Tf current.tmp current 2>/dev/null || mv -hf current.tmp current; }}"
        );
        let out = self
            .transport
            .exec(&RemoteCommand::shell(script))?;
        if out.status == Some(MISSING_RELEASE_STATUS) {
            return Err(ReleaseError::ReleaseNotFound { release: id.clone() });
        }
        out.into_result("activate release")?;
        tracing::info!("activated release {}", id);
        Ok(())
    }

    /// Remove a release that never went live (staging and promoted copies).
    pub fn discard(&self, id: &ReleaseId) -> Result<(), ReleaseError> {
        if self.current()?.as_ref() == Some(id) {
            return Err(ReleaseError::ReleaseIsLive { release: id.clone() });
        }
        self.transport.script(
            &format!(
                "rm -rf {} {}",
                quote_path(&self.layout.staging(id)),
                quote_path(&self.layout.release(id)),
            ),
            "discard release",
        )?;
        tracing::info!("discarded release {}", id);
        Ok(())
    }

    /// Keep the `keep` newest releases plus the live one; remove the rest and
    /// any leftover staging directories. Returns removed ids, oldest first.
    pub fn prune(&self, keep: usize) -> Result<Vec<ReleaseId>, ReleaseError> {
        let all = self.list()?;
        let current = self.current()?;
        let keep_set: BTreeSet<&ReleaseId> = all
            .iter()
            .rev()
            .take(keep)
            .chain(current.iter())
            .collect();
        let removed: Vec<ReleaseId> = all
            .iter()
            .filter(|id| !keep_set.contains(id))
            .cloned()
            .collect();

        let mut script = format!("rm -rf {}/*", quote_path(&self.layout.staging_dir()));
        for id in &removed {
            script.push_str(" && rm -rf ");
            script.push_str(&quote_path(&self.layout.release(id)));
        }
        self.transport.script(&script, "prune releases")?;
        if !removed.is_empty() {
            tracing::info!("pruned {} release(s)", removed.len());
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Script helpers
// ---------------------------------------------------------------------------

/// Verify checksum list `file` in the working directory, printing failures only.
pub(crate) fn checksum_script(file: &str) -> String {
    format!(
        "if command -v sha256sum >/dev/null 2>&1; \
         then sha256sum -c --quiet {file}; \
         else shasum -a 256 -c --quiet {file}; fi"
    )
}

/// Split `sha256sum -c` failure lines into `(missing, modified)`, sorted.
pub(crate) fn parse_check_failures(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut missing = Vec::new();
    let mut modified = Vec::new();
    for line in stdout.lines() {
        if let Some(path) = line.strip_suffix(": FAILED open or read") {
            missing.push(path.to_string());
        } else if let Some(path) = line.strip_suffix(": FAILED") {
            modified.push(path.to_string());
        }
    }
    missing.sort();
    modified.sort();
    (missing, modified)
}

fn reuse_script(from: &Path, to: &Path, files: &[String]) -> String {
    let parents: BTreeSet<String> = files
        .iter()
        .filter_map(|rel| Path::new(rel).parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| quote_path(&to.join(p)))
        .collect();

    let mut script = String::from("set -e\n");
    if !parents.is_empty() {
        script.push_str("mkdir -p");
        for p in &parents {
            script.push(' ');
            script.push_str(p);
        }
        script.push('\n');
    }
    // A copy that fails here is caught by the checksum pass.
    for rel in files {
        script.push_str(&format!(
            "cp -p {} {} 2>/dev/null || :\n",
            quote_path(&from.join(rel)),
            quote_path(&to.join(rel))
        ));
    }
    script
}
