//! Deploy pipeline shared by the CLI and the daemon.
//!
//! ```text
//! lock → scan → plan → stage → resolve → activate → stop → start → verify → prune
//! ```
//!
//! Every phase change is written to the record store before the phase's work
//! starts, so a crashed deploy leaves a record showing where it stopped.
//! Failures before activation discard the staged release; failures after
//! activation roll back to the previous release when there is one.

use std::path::{Path, PathBuf};

use chrono::Utc;

use stagehand_core::types::{AppConfig, ReleaseId};
use stagehand_release::diff::{diff_app, AppDiff};
use stagehand_release::{drift, manifest, DriftSignal, Manifest, ReleaseLayout, ReleaseStore, StagePlan};
use stagehand_renderer::Renderer;
use stagehand_transport::{transport_for, Transport};

use crate::env::{EnvResolver, EnvSpec};
use crate::error::DeployError;
use crate::health::HealthGate;
use crate::lock::AppLock;
use crate::machine::{DeployKind, DeployRecord, Phase};
use crate::records::RecordStore;
use crate::supervisor::{supervisor_for, ProcessStatus, ProcessSupervisor, StopOutcome};

/// Dry-run result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    pub plan: StagePlan,
    pub files: usize,
    pub digest: String,
}

/// Snapshot for `status`.
#[derive(Debug, Clone)]
pub struct AppStatus {
    pub current: Option<ReleaseId>,
    pub releases: Vec<ReleaseId>,
    pub process: ProcessStatus,
    pub last: Option<DeployRecord>,
}

pub struct Deployer {
    home: PathBuf,
    config: AppConfig,
    layout: ReleaseLayout,
    transport: Box<dyn Transport>,
    supervisor: Box<dyn ProcessSupervisor>,
    health: HealthGate,
    records: RecordStore,
}

impl Deployer {
    /// Transport and supervisor as configured; templates from `<home>/.stagehand/templates/`.
    pub fn new(home: &Path, config: AppConfig) -> Result<Self, DeployError> {
        let transport = transport_for(&config.target)?;
        let layout = ReleaseLayout::new(config.target.root.clone(), config.name.clone());
        let supervisor = supervisor_for(&config, &layout, Renderer::for_home(home)?);
        Ok(Self::with_parts(home, config, transport, supervisor))
    }

    /// Explicit transport and supervisor.
    pub fn with_parts(
        home: &Path,
        config: AppConfig,
        transport: Box<dyn Transport>,
        supervisor: Box<dyn ProcessSupervisor>,
    ) -> Self {
        let layout = ReleaseLayout::new(config.target.root.clone(), config.name.clone());
        Self {
            home: home.to_path_buf(),
            health: HealthGate::new(config.health.clone()),
            records: RecordStore::new(home),
            config,
            layout,
            transport,
            supervisor,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &ReleaseLayout {
        &self.layout
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn store(&self) -> ReleaseStore<'_> {
        ReleaseStore::new(self.transport.as_ref(), &self.layout)
    }

    fn resolver(&self) -> EnvResolver<'_> {
        EnvResolver::new(self.transport.as_ref(), &self.layout)
    }

    fn scan(&self) -> Result<Manifest, DeployError> {
        Ok(manifest::scan(&self.config.source, &self.config.ignore)?)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// What `deploy` would upload and reuse. Reads the target, writes nothing.
    pub fn plan(&self) -> Result<DeployPlan, DeployError> {
        let manifest = self.scan()?;
        let plan = self.store().plan(&manifest, Utc::now())?;
        Ok(DeployPlan {
            plan,
            files: manifest.files.len(),
            digest: manifest.digest(),
        })
    }

    /// Deploy the source tree.
    ///
    /// `Ok` carries the finished record whatever the outcome; check
    /// [`DeployRecord::phase`]. `Err` means the deploy never started (lock held,
    /// record store unwritable) or its state could not be persisted.
    pub fn deploy(&self) -> Result<DeployRecord, DeployError> {
        let _lock = AppLock::acquire_at(&self.home, &self.config.name)?;
        let mut rec = DeployRecord::new(self.config.name.clone(), DeployKind::Deploy, Utc::now());
        self.records.save(&rec)?;
        tracing::info!(app = %self.config.name, deploy = %rec.id, "deploy started");

        if let Err(err) = self.run_deploy(&mut rec) {
            self.recover(&mut rec, err)?;
        }
        self.finish(&rec);
        Ok(rec)
    }

    /// Switch back to the release before the live one, with the same restart and
    /// health gating as a deploy.
    pub fn rollback(&self) -> Result<DeployRecord, DeployError> {
        let _lock = AppLock::acquire_at(&self.home, &self.config.name)?;
        let store = self.store();
        let current = store.current()?.ok_or_else(|| DeployError::NothingDeployed {
            app: self.config.name.clone(),
        })?;
        let target = store
            .previous_of(&current)?
            .ok_or_else(|| DeployError::NoPreviousRelease {
                current: current.clone(),
            })?;

        let mut rec = DeployRecord::new(self.config.name.clone(), DeployKind::Rollback, Utc::now());
        rec.release = Some(target);
        rec.previous = Some(current);
        self.records.save(&rec)?;
        tracing::info!(app = %self.config.name, deploy = %rec.id, "rollback started");

        if let Err(err) = self.run_switch(&mut rec) {
            self.recover(&mut rec, err)?;
        }
        self.finish(&rec);
        Ok(rec)
    }

    /// Stop the app's process.
    pub fn stop(&self) -> Result<StopOutcome, DeployError> {
        self.supervisor.stop(self.transport.as_ref())
    }

    /// Run the health gate against the live app. Returns attempts used.
    pub fn health_check(&self) -> Result<u32, DeployError> {
        self.health.wait_healthy(self.transport.as_ref())
    }

    pub fn status(&self) -> Result<AppStatus, DeployError> {
        let store = self.store();
        Ok(AppStatus {
            current: store.current()?,
            releases: store.list()?,
            process: self.supervisor.status(self.transport.as_ref())?,
            last: self.records.latest(&self.config.name)?,
        })
    }

    pub fn drift(&self) -> Result<DriftSignal, DeployError> {
        Ok(drift::check(&self.store(), &self.config.source, &self.config.ignore)?)
    }

    pub fn diff(&self) -> Result<AppDiff, DeployError> {
        Ok(diff_app(&self.store(), &self.config.source, &self.config.ignore)?)
    }

    /// Release and environment retention. Returns removed release ids.
    pub fn prune(&self, keep: usize) -> Result<Vec<ReleaseId>, DeployError> {
        let _lock = AppLock::acquire_at(&self.home, &self.config.name)?;
        self.prune_unlocked(keep)
    }

    pub fn history(&self, limit: Option<usize>) -> Result<Vec<DeployRecord>, DeployError> {
        self.records.history(&self.config.name, limit)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn enter(&self, rec: &mut DeployRecord, phase: Phase, note: Option<String>) -> Result<(), DeployError> {
        rec.transition(phase, note)?;
        self.records.save(rec)?;
        tracing::debug!(app = %rec.app, deploy = %rec.id, phase = %phase, "phase");
        Ok(())
    }

    fn run_deploy(&self, rec: &mut DeployRecord) -> Result<(), DeployError> {
        self.enter(rec, Phase::Staging, None)?;
        let manifest = self.scan()?;
        let store = self.store();
        let plan = store.plan(&manifest, Utc::now())?;
        rec.release = Some(plan.release.clone());
        rec.previous = plan.previous.clone();
        self.records.save(rec)?;
        let staged = store.stage(&self.config.source, &manifest, &plan, self.config.verify)?;
        rec.uploaded = staged.uploaded;
        rec.reused = staged.reused;

        self.enter(rec, Phase::Resolving, None)?;
        let spec = EnvSpec::from_runtime(&self.config.runtime);
        if let Some(env) = self.resolver().ensure(&spec, &staged.id, &manifest)? {
            let note = if env.reused { "reused" } else { "built" };
            rec.environment = Some(env.fingerprint);
            self.note_environment(rec, note)?;
        }

        self.run_switch(rec)?;

        if let Err(e) = self.prune_unlocked(self.config.keep_releases) {
            tracing::warn!(app = %rec.app, error = %e, "pruning failed");
        }
        Ok(())
    }

    /// Record how the environment was obtained on the `Resolving` transition.
    fn note_environment(&self, rec: &mut DeployRecord, note: &str) -> Result<(), DeployError> {
        if let Some(last) = rec.transitions.last_mut() {
            last.note = Some(format!("environment {note}"));
        }
        self.records.save(rec)
    }

    /// activate → stop → start → verify for `rec.release`.
    fn run_switch(&self, rec: &mut DeployRecord) -> Result<(), DeployError> {
        let release = rec.release.clone().ok_or_else(|| {
            DeployError::Supervisor("no release selected for activation".to_string())
        })?;
        let transport = self.transport.as_ref();

        self.enter(rec, Phase::Activating, Some(release.to_string()))?;
        self.store().activate(&release)?;

        self.enter(rec, Phase::Restarting, None)?;
        self.supervisor.stop(transport)?;
        self.supervisor.start(transport, &release)?;

        self.enter(rec, Phase::Verifying, Some(self.config.health.url.clone()))?;
        let attempts = self.health.wait_healthy(transport)?;
        rec.health_attempts = Some(attempts);

        self.enter(rec, Phase::Succeeded, None)
    }

    /// Move `rec` to a terminal phase after `err`.
    fn recover(&self, rec: &mut DeployRecord, err: DeployError) -> Result<(), DeployError> {
        if let DeployError::InvalidTransition { .. } = err {
            return Err(err);
        }
        tracing::error!(app = %rec.app, deploy = %rec.id, phase = %rec.phase, error = %err, "deploy step failed");
        rec.push_error(err.to_string());

        if rec.phase.touched_live() {
            if let Some(previous) = rec.previous.clone() {
                self.enter(rec, Phase::RollingBack, Some(previous.to_string()))?;
                return match self.restore(&previous) {
                    Ok(()) => self.enter(rec, Phase::RolledBack, None),
                    Err(e) => {
                        tracing::error!(app = %rec.app, release = %previous, error = %e, "rollback failed");
                        rec.push_error(format!("rollback failed: {e}"));
                        self.enter(rec, Phase::Failed, None)
                    }
                };
            }
        } else if let Some(release) = rec.release.clone() {
            if rec.kind == DeployKind::Deploy {
                if let Err(e) = self.store().discard(&release) {
                    tracing::warn!(app = %rec.app, release = %release, error = %e, "could not discard release");
                }
            }
        }
        self.enter(rec, Phase::Failed, None)
    }

    /// Re-activate and restart `previous`, then verify it.
    fn restore(&self, previous: &ReleaseId) -> Result<(), DeployError> {
        let transport = self.transport.as_ref();
        self.store().activate(previous)?;
        self.supervisor.stop(transport)?;
        self.supervisor.start(transport, previous)?;
        self.health.wait_healthy(transport)?;
        Ok(())
    }

    fn prune_unlocked(&self, keep: usize) -> Result<Vec<ReleaseId>, DeployError> {
        let removed = self.store().prune(keep)?;
        self.resolver().prune()?;
        Ok(removed)
    }

    fn finish(&self, rec: &DeployRecord) {
        match rec.phase {
            Phase::Succeeded => tracing::info!(
                app = %rec.app,
                deploy = %rec.id,
                release = ?rec.release,
                uploaded = rec.uploaded,
                reused = rec.reused,
                "deploy succeeded"
            ),
            phase => tracing::warn!(
                app = %rec.app,
                deploy = %rec.id,
                phase = %phase,
                error = ?rec.error,
                "deploy did not succeed"
            ),
        }
    }
}
