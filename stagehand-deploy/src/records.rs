//! Deployment record store.
//!
//! One JSON document per deployment at
//! `<home>/.stagehand/deployments/<app>/<deploy_id>.json`, rewritten after
//! every transition with the `.tmp` + rename pattern the registry uses.

use std::path::{Path, PathBuf};

use stagehand_core::registry::stagehand_root;
use stagehand_core::types::{AppName, DeployId};

use crate::error::{io_err, DeployError};
use crate::machine::DeployRecord;

/// `<home>/.stagehand/deployments/<app>/`
pub fn records_dir_at(home: &Path, app: &AppName) -> PathBuf {
    stagehand_root(home).join("deployments").join(app.as_str())
}

pub fn record_path_at(home: &Path, app: &AppName, id: &DeployId) -> PathBuf {
    records_dir_at(home, app).join(format!("{}.json", id.0))
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    home: PathBuf,
}

impl RecordStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn save(&self, record: &DeployRecord) -> Result<(), DeployError> {
        let dir = records_dir_at(&self.home, &record.app);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let path = record_path_at(&self.home, &record.app, &record.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    pub fn load(&self, app: &AppName, id: &DeployId) -> Result<DeployRecord, DeployError> {
        let path = record_path_at(&self.home, app, id);
        if !path.exists() {
            return Err(DeployError::RecordNotFound { path });
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Records for `app`, newest first. Leftover `.tmp` files are skipped.
    pub fn history(&self, app: &AppName, limit: Option<usize>) -> Result<Vec<DeployRecord>, DeployError> {
        let dir = records_dir_at(&self.home, app);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        // Deploy ids start with a millisecond timestamp.
        paths.sort();
        paths.reverse();
        if let Some(limit) = limit {
            paths.truncate(limit);
        }

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            records.push(serde_json::from_str(&raw)?);
        }
        Ok(records)
    }

    pub fn latest(&self, app: &AppName) -> Result<Option<DeployRecord>, DeployError> {
        Ok(self.history(app, Some(1))?.into_iter().next())
    }
}
