// ABOUTME: Tracks consecutive backend-unavailable outcomes across analysis jobs
// ABOUTME: Escalates to a user-facing error once the configured threshold is reached

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Backend health as seen from job outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Last job reached the backend
    Healthy,
    /// Backend unavailable, below the escalation threshold
    Degraded,
    /// Backend unavailable on repeated attempts; reported to the user once
    Escalated,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "Healthy"),
            HealthState::Degraded => write!(f, "Degraded"),
            HealthState::Escalated => write!(f, "Escalated"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub consecutive_unavailable: u32,
    pub last_error: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct HealthInner {
    state: HealthState,
    consecutive_unavailable: u32,
    threshold: u32,
    last_error: Option<String>,
    escalated_at: Option<DateTime<Utc>>,
}

/// Backend health monitor. Jobs never retry; this only decides when an
/// unreachable backend is worth telling the user about.
#[derive(Debug)]
pub struct BackendHealth {
    inner: Mutex<HealthInner>,
}

impl BackendHealth {
    pub fn new(escalation_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(HealthInner {
                state: HealthState::Healthy,
                consecutive_unavailable: 0,
                threshold: escalation_threshold.max(1),
                last_error: None,
                escalated_at: None,
            }),
        }
    }

    pub fn state(&self) -> HealthState {
        self.inner.lock().state
    }

    pub fn set_threshold(&self, escalation_threshold: u32) {
        self.inner.lock().threshold = escalation_threshold.max(1);
    }

    /// Record a job that reached the backend
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != HealthState::Healthy {
            info!(
                "Analysis backend recovered after {} failed attempts",
                inner.consecutive_unavailable
            );
        }
        inner.state = HealthState::Healthy;
        inner.consecutive_unavailable = 0;
        inner.last_error = None;
        inner.escalated_at = None;
    }

    /// Record a job that could not reach the backend
    pub fn record_unavailable(&self, reason: &str) {
        let mut inner = self.inner.lock();
        inner.consecutive_unavailable += 1;
        inner.last_error = Some(reason.to_string());

        match inner.state {
            HealthState::Escalated => {
                debug!("Analysis backend still unavailable: {}", reason);
            }
            _ if inner.consecutive_unavailable >= inner.threshold => {
                error!(
                    "Analysis backend unavailable on {} consecutive attempts: {}",
                    inner.consecutive_unavailable, reason
                );
                inner.state = HealthState::Escalated;
                inner.escalated_at = Some(Utc::now());
            }
            _ => {
                warn!(
                    "Analysis backend unavailable ({}/{}): {}",
                    inner.consecutive_unavailable, inner.threshold, reason
                );
                inner.state = HealthState::Degraded;
            }
        }
    }

    pub fn status(&self) -> HealthStatus {
        let inner = self.inner.lock();
        HealthStatus {
            state: inner.state,
            consecutive_unavailable: inner.consecutive_unavailable,
            last_error: inner.last_error.clone(),
            escalated_at: inner.escalated_at,
        }
    }
}
