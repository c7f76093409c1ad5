//! Drift detection between the source tree, the live manifest and the live
//! release on the target.
//!
//! Signal precedence:
//! 1. `NeverDeployed` (no `current` link, or the live release has no manifest)
//! 2. `Missing` (files in the live manifest are gone from the live release)
//! 3. `Modified` (live files no longer match their recorded hash)
//! 4. `Pending` (the source tree differs from the live manifest)
//! 5. `Current`

use std::path::Path;

use stagehand_core::types::ReleaseId;
use stagehand_transport::{CommandOutput, RemoteCommand};

use crate::error::ReleaseError;
use crate::manifest;
use crate::layout::CHECKSUM_FILE;
use crate::store::{checksum_script, parse_check_failures, ReleaseStore};

/// Drift classification for an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftSignal {
    NeverDeployed,
    Current { release: ReleaseId },
    Pending { release: ReleaseId, changed: Vec<String> },
    Missing { release: ReleaseId, files: Vec<String> },
    Modified { release: ReleaseId, files: Vec<String> },
}

/// Compare `source` against what is live.
pub fn check(
    store: &ReleaseStore<'_>,
    source: &Path,
    ignore: &[String],
) -> Result<DriftSignal, ReleaseError> {
    let Some((release, live)) = store.live()? else {
        return Ok(DriftSignal::NeverDeployed);
    };

    let (missing, modified) = verify_live(store, &release)?;
    if !missing.is_empty() {
        return Ok(DriftSignal::Missing { release, files: missing });
    }
    if !modified.is_empty() {
        return Ok(DriftSignal::Modified { release, files: modified });
    }

    let local = manifest::scan(source, ignore)?;
    let changed = local.changed_paths(&live);
    if !changed.is_empty() {
        return Ok(DriftSignal::Pending { release, changed });
    }
    Ok(DriftSignal::Current { release })
}

/// Run the checksum file of `release` on the target and split failures into
/// `(missing, modified)`.
fn verify_live(
    store: &ReleaseStore<'_>,
    release: &ReleaseId,
) -> Result<(Vec<String>, Vec<String>), ReleaseError> {
    let dir = store.layout().release(release);
    let out = store
        .transport()
        .exec(&RemoteCommand::shell(checksum_script(CHECKSUM_FILE)).cwd(dir))?;
    classify_check(release, &out)
}

/// A failed run that names no file means the check itself did not work, which
/// must not read as "no drift".
fn classify_check(
    release: &ReleaseId,
    out: &CommandOutput,
) -> Result<(Vec<String>, Vec<String>), ReleaseError> {
    if out.success() {
        return Ok((vec![], vec![]));
    }
    let (missing, modified) = parse_check_failures(&out.stdout);
    if missing.is_empty() && modified.is_empty() {
        let detail = format!("{}{}", out.stdout, out.stderr).trim().to_string();
        return Err(ReleaseError::CheckFailed {
            release: release.clone(),
            status: out.status,
            detail,
        });
    }
    Ok((missing, modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(status: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn failed_lines_are_drift() {
        let release = ReleaseId::from("r1");
        let out = output(1, "app.py: FAILED\n", "sha256sum: WARNING: 1 computed checksum did NOT match\n");
        let (missing, modified) = classify_check(&release, &out).unwrap();
        assert!(missing.is_empty());
        assert_eq!(modified, vec!["app.py"]);
    }

    #[test]
    fn failure_without_file_lines_is_an_error() {
        let release = ReleaseId::from("r1");
        let out = output(127, "", "sh: shasum: not found\n");
        match classify_check(&release, &out).unwrap_err() {
            ReleaseError::CheckFailed { status, detail, .. } => {
                assert_eq!(status, Some(127));
                assert!(detail.contains("shasum: not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clean_run_has_no_drift() {
        let out = output(0, "", "");
        assert_eq!(classify_check(&ReleaseId::from("r1"), &out).unwrap(), (vec![], vec![]));
    }
}
