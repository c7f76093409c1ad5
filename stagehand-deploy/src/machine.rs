//! Deployment state machine.
//!
//! ```text
//! Pending → Staging → Resolving → Activating → Restarting → Verifying → Succeeded
//!              │          │            │            │            │
//!              └──────────┴→ Failed    └────────────┴────────────┴→ RollingBack → RolledBack
//!                                                                              └→ Failed
//! ```
//!
//! Phases are checked at runtime rather than encoded as types: a record is
//! persisted after every transition and reloaded by other processes, so the
//! phase has to survive as data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stagehand_core::types::{AppName, DeployId, ReleaseId};

use crate::error::DeployError;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Staging,
    Resolving,
    Activating,
    Restarting,
    Verifying,
    Succeeded,
    RollingBack,
    RolledBack,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::RolledBack | Phase::Failed)
    }

    /// Whether the live release may already have changed in this phase.
    pub fn touched_live(self) -> bool {
        matches!(
            self,
            Phase::Activating | Phase::Restarting | Phase::Verifying
        )
    }

    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Pending, Staging)
                | (Pending, Activating)
                | (Pending, Failed)
                | (Staging, Resolving)
                | (Staging, Failed)
                | (Resolving, Activating)
                | (Resolving, Failed)
                | (Activating, Restarting)
                | (Restarting, Verifying)
                | (Verifying, Succeeded)
                | (Activating, RollingBack)
                | (Restarting, RollingBack)
                | (Verifying, RollingBack)
                | (Activating, Failed)
                | (Restarting, Failed)
                | (Verifying, Failed)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Staging => "staging",
            Phase::Resolving => "resolving",
            Phase::Activating => "activating",
            Phase::Restarting => "restarting",
            Phase::Verifying => "verifying",
            Phase::Succeeded => "succeeded",
            Phase::RollingBack => "rolling_back",
            Phase::RolledBack => "rolled_back",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// What started the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployKind {
    Deploy,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Persisted history of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub id: DeployId,
    pub app: AppName,
    pub kind: DeployKind,
    pub phase: Phase,
    /// Release being made live.
    #[serde(default)]
    pub release: Option<ReleaseId>,
    /// Release that was live when the deployment started.
    #[serde(default)]
    pub previous: Option<ReleaseId>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub uploaded: usize,
    #[serde(default)]
    pub reused: usize,
    #[serde(default)]
    pub health_attempts: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeployRecord {
    pub fn new(app: AppName, kind: DeployKind, at: DateTime<Utc>) -> Self {
        Self {
            id: DeployId::generate(at, &app),
            app,
            kind,
            phase: Phase::Pending,
            release: None,
            previous: None,
            environment: None,
            uploaded: 0,
            reused: 0,
            health_attempts: None,
            error: None,
            transitions: vec![],
            started_at: at,
            finished_at: None,
        }
    }

    /// Move to `to`, recording the edge. Rejects edges the machine does not allow.
    pub fn transition(&mut self, to: Phase, note: Option<String>) -> Result<(), DeployError> {
        if !self.phase.can_transition_to(to) {
            return Err(DeployError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        let at = Utc::now();
        self.transitions.push(Transition {
            from: self.phase,
            to,
            at,
            note,
        });
        self.phase = to;
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Succeeded
    }

    /// Append to `error`, keeping earlier messages.
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(prev) => format!("{prev}; {message}"),
            None => message,
        });
    }
}
