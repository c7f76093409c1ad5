//! Health gate: poll the app's URL until it answers with the expected status.
//!
//! Delays grow as `interval × 2^n`, capped at `max_interval`. A probe that
//! cannot connect counts as a failed attempt, not an error.

use std::time::Duration;

use stagehand_core::types::{HealthConfig, HealthProbe};
use stagehand_transport::{RemoteCommand, Transport};

use crate::error::DeployError;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Backoff {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            first: Duration::from_millis(config.interval_ms),
            max: Duration::from_millis(config.max_interval_ms),
            factor: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.first.as_secs_f64() * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Status(u16),
    Unreachable(String),
}

impl ProbeResult {
    fn describe(&self) -> String {
        match self {
            ProbeResult::Status(code) => format!("HTTP {code}"),
            ProbeResult::Unreachable(reason) => reason.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthGate {
    config: HealthConfig,
}

impl HealthGate {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// One request, from this machine or from the target depending on `probe`.
    pub fn probe_once(&self, transport: &dyn Transport) -> Result<ProbeResult, DeployError> {
        match self.config.probe {
            HealthProbe::Direct => Ok(self.probe_direct()),
            HealthProbe::Transport => self.probe_via(transport),
        }
    }

    fn probe_direct(&self) -> ProbeResult {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build();
        match agent.get(&self.config.url).call() {
            Ok(resp) => ProbeResult::Status(resp.status()),
            Err(ureq::Error::Status(code, _)) => ProbeResult::Status(code),
            Err(ureq::Error::Transport(e)) => ProbeResult::Unreachable(e.to_string()),
        }
    }

    fn probe_via(&self, transport: &dyn Transport) -> Result<ProbeResult, DeployError> {
        let cmd = RemoteCommand::new("curl").args([
            "-s".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "-w".to_string(),
            "%{http_code}".to_string(),
            "--max-time".to_string(),
            self.config.timeout_secs.to_string(),
            self.config.url.clone(),
        ]);
        let out = transport.exec(&cmd)?;
        // curl prints 000 when it never got a response.
        match out.stdout.trim().parse::<u16>() {
            Ok(code) if code > 0 => Ok(ProbeResult::Status(code)),
            _ => {
                let reason = out.stderr.trim();
                Ok(ProbeResult::Unreachable(if reason.is_empty() {
                    format!("curl exited with {:?}", out.status)
                } else {
                    reason.to_string()
                }))
            }
        }
    }

    /// Wait `initial_delay_ms`, then probe up to `attempts` times.
    ///
    /// Returns the number of attempts used.
    pub fn wait_healthy(&self, transport: &dyn Transport) -> Result<u32, DeployError> {
        let backoff = Backoff::from_config(&self.config);
        let attempts = self.config.attempts.max(1);
        std::thread::sleep(Duration::from_millis(self.config.initial_delay_ms));

        let mut last = String::from("no probe made");
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(backoff.delay(attempt - 1));
            }
            let result = self.probe_once(transport)?;
            if result == ProbeResult::Status(self.config.expect_status) {
                tracing::info!(url = %self.config.url, attempt = attempt + 1, "health check passed");
                return Ok(attempt + 1);
            }
            last = result.describe();
            tracing::debug!(url = %self.config.url, attempt = attempt + 1, result = %last, "health probe failed");
        }

        Err(DeployError::HealthCheckFailed {
            url: self.config.url.clone(),
            attempts,
            last,
        })
    }
}
