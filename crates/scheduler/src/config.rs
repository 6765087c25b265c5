//! Scheduler-wide defaults applied when a binding doesn't override them.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub idle_timeout: Duration,
    pub gpu_threshold: f64,
    pub min_runtime: Duration,
    pub scale_down_timeout: Duration,
    pub ssh_verify_timeout: Duration,
    pub destroy_after_hours_paused: Option<f64>,
    /// How often the scale-down loop evaluates every running binding.
    pub scale_down_tick: Duration,
    /// How often the auto-destroy loop sweeps paused bindings.
    pub auto_destroy_tick: Duration,
    /// Ceiling on the hourly price a fallback strategy will accept.
    pub fallback_max_price_per_hour: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            gpu_threshold: 5.0,
            min_runtime: Duration::from_secs(60),
            scale_down_timeout: Duration::from_secs(60),
            ssh_verify_timeout: Duration::from_secs(60),
            destroy_after_hours_paused: Some(24.0),
            scale_down_tick: Duration::from_secs(1),
            auto_destroy_tick: Duration::from_secs(300),
            fallback_max_price_per_hour: 1.0,
        }
    }
}
