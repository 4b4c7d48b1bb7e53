//! Component and evaluation health.
//!
//! Health is the merge of *evaluation* health (set by the controller on each
//! Apply/Evaluate) and *runtime* health (set by the component itself).
//! `Unhealthy` from either source wins; `Exited` is terminal and overrides
//! all, matching the merge rule in the data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A component's health state.
///
/// Ordered `Unknown < Healthy < Unhealthy < Exited` so two `HealthState`
/// values can be merged with a single `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
    Exited,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Exited => "exited",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A health state plus the timestamp it was set and a human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub state: HealthState,
    pub since: DateTime<Utc>,
    pub message: String,
}

impl Health {
    pub fn new(state: HealthState, message: impl Into<String>) -> Self {
        Self {
            state,
            since: Utc::now(),
            message: message.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(HealthState::Unknown, "")
    }

    pub fn healthy() -> Self {
        Self::new(HealthState::Healthy, "")
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    pub fn exited(message: impl Into<String>) -> Self {
        Self::new(HealthState::Exited, message)
    }

    /// Merge evaluation health with runtime health: the higher-ranked state
    /// wins; `Exited` always overrides, `Unhealthy` beats `Healthy`/`Unknown`.
    pub fn merge(evaluation: &Health, runtime: &Health) -> Health {
        if runtime.state >= evaluation.state {
            runtime.clone()
        } else {
            evaluation.clone()
        }
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::unknown()
    }
}
