//! Serverless binding data model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a binding recovers from idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerlessMode {
    /// CPU standby + checkpoint: state saved via CRIU, recovery target <1s.
    Fast,
    /// Provider-native pause/resume, recovery target ~7s.
    Economic,
    /// Spot/interruptible capacity; no pause step, only create/destroy.
    Spot,
}

impl ServerlessMode {
    /// Parse a mode string, falling back to [`ServerlessMode::Economic`]
    /// for anything unrecognized, matching the original's lenient enable().
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw {
            "fast" => Self::Fast,
            "spot" => Self::Spot,
            _ => Self::Economic,
        }
    }
}

impl std::fmt::Display for ServerlessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Economic => write!(f, "economic"),
            Self::Spot => write!(f, "spot"),
        }
    }
}

/// Lifecycle state of a serverless binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Running,
    Paused,
    /// Resume in progress; guards against a second wake racing the first.
    Waking,
    Destroyed,
    /// Resume failed and every fallback strategy was exhausted.
    Failed,
}

/// Per-instance serverless configuration and accumulated counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerlessBinding {
    pub fleet_instance_id: i64,
    pub gpu_instance_id: String,

    pub mode: ServerlessMode,
    pub state: BindingState,

    pub idle_timeout: Duration,
    pub gpu_threshold: f64,
    pub keep_warm: bool,
    pub checkpoint_enabled: bool,

    /// Minimum wall-clock time a binding must stay running before it is
    /// eligible for scale-down, even if idle the whole time.
    pub min_runtime: Duration,
    /// Timeout for the checkpoint+pause operation itself.
    pub scale_down_timeout: Duration,
    /// How long to wait for a shell after resume before declaring failure.
    pub ssh_verify_timeout: Duration,
    pub destroy_after_hours_paused: Option<f64>,

    pub gpu_rate_per_hour: f64,
    pub idle_rate_per_hour: f64,

    pub last_gpu_util: f64,
    pub idle_since: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    pub running_since: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,

    pub last_checkpoint_id: Option<String>,
    pub disk_id: Option<String>,

    pub scale_down_count: u32,
    pub scale_up_count: u32,
    pub fallback_count: u32,
    pub total_paused_seconds: f64,
    pub total_runtime_seconds: f64,
    pub total_savings: f64,
}

impl ServerlessBinding {
    #[must_use]
    pub fn new(
        fleet_instance_id: i64,
        gpu_instance_id: impl Into<String>,
        mode: ServerlessMode,
        gpu_rate_per_hour: f64,
        idle_rate_per_hour: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            fleet_instance_id,
            gpu_instance_id: gpu_instance_id.into(),
            mode,
            state: BindingState::Running,
            idle_timeout: Duration::from_secs(30),
            gpu_threshold: 5.0,
            keep_warm: false,
            checkpoint_enabled: mode == ServerlessMode::Fast,
            min_runtime: Duration::from_secs(60),
            scale_down_timeout: Duration::from_secs(60),
            ssh_verify_timeout: Duration::from_secs(60),
            destroy_after_hours_paused: Some(24.0),
            gpu_rate_per_hour,
            idle_rate_per_hour,
            last_gpu_util: 0.0,
            idle_since: None,
            last_request: Some(now),
            running_since: now,
            paused_at: None,
            last_checkpoint_id: None,
            disk_id: None,
            scale_down_count: 0,
            scale_up_count: 0,
            fallback_count: 0,
            total_paused_seconds: 0.0,
            total_runtime_seconds: 0.0,
            total_savings: 0.0,
        }
    }

    /// Whether this binding has been running, uninterrupted, for at least
    /// `min_runtime` — the floor below which scale-down never triggers,
    /// regardless of idle state.
    #[must_use]
    pub fn runtime_since_start(&self, now: DateTime<Utc>) -> Duration {
        (now - self.running_since).to_std().unwrap_or(Duration::ZERO)
    }

    /// Idle predicate: time since the last request exceeds `idle_timeout`,
    /// or utilization has been under `gpu_threshold` continuously since
    /// `idle_since` for at least `idle_timeout`.
    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        if self.keep_warm || self.state != BindingState::Running {
            return false;
        }
        if self.runtime_since_start(now) < self.min_runtime {
            return false;
        }
        let by_request = self
            .last_request
            .is_some_and(|t| (now - t).to_std().unwrap_or(Duration::ZERO) > self.idle_timeout);
        let by_util = self.last_gpu_util < self.gpu_threshold
            && self
                .idle_since
                .is_some_and(|t| (now - t).to_std().unwrap_or(Duration::ZERO) > self.idle_timeout);
        by_request || by_util
    }
}

/// Status snapshot returned by [`crate::Scheduler::get_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub binding_count: u32,
    pub paused_count: u32,
    pub running_count: u32,
}
