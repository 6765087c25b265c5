//! Standby manager configuration.

use std::time::Duration;

/// Filters applied when the recovery loop searches for a replacement GPU offer.
#[derive(Debug, Clone)]
pub struct RecoveryFilters {
    pub min_gpu_ram_gb: u32,
    pub max_price_per_hour: f64,
    /// Ranked region preferences; earlier entries score higher when two
    /// offers are otherwise comparable.
    pub preferred_regions: Vec<String>,
}

impl Default for RecoveryFilters {
    fn default() -> Self {
        Self {
            min_gpu_ram_gb: 8,
            max_price_per_hour: 0.50,
            preferred_regions: vec![
                "TH".to_string(),
                "VN".to_string(),
                "JP".to_string(),
                "EU".to_string(),
                "US".to_string(),
            ],
        }
    }
}

/// Standby manager behavior, normally built from [`config::FleetConfig`](../config/struct.FleetConfig.html).
#[derive(Debug, Clone)]
pub struct StandbyConfig {
    /// Whether `on_gpu_created` provisions a standby pairing automatically.
    pub auto_standby_enabled: bool,
    /// Explicit CPU zone override; `None` resolves via the region resolver.
    pub zone: Option<String>,
    pub machine_type: String,
    pub disk_gb: u32,
    pub ssh_public_key: Option<String>,

    pub sync_interval: Duration,
    pub sync_source_path: String,
    pub sync_exclude: Vec<String>,

    pub health_check_interval: Duration,
    pub failover_threshold: u32,
    pub auto_failover: bool,

    pub ssh_ready_timeout: Duration,

    pub auto_recovery: bool,
    pub recovery_max_attempts: u32,
    pub recovery_retry_delay: Duration,
    pub recovery_attempt_timeout: Duration,
    pub recovery: RecoveryFilters,
}

impl StandbyConfig {
    /// Clamp `sync_interval` into `[2s, 3600s]`, matching the original
    /// operator-facing bounds: tighter and the relay thrashes the CPU
    /// standby's disk, looser and a failover loses more than a few
    /// minutes of state.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.clamp(Duration::from_secs(2), Duration::from_secs(3600));
        self
    }
}

impl Default for StandbyConfig {
    fn default() -> Self {
        Self {
            auto_standby_enabled: false,
            zone: None,
            machine_type: "e2-medium".to_string(),
            disk_gb: 100,
            ssh_public_key: None,

            sync_interval: Duration::from_secs(30),
            sync_source_path: "/workspace/".to_string(),
            sync_exclude: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                "*.pyc".to_string(),
                ".cache".to_string(),
                "node_modules".to_string(),
                ".venv".to_string(),
                "venv".to_string(),
                "*.log".to_string(),
                "*.tmp".to_string(),
            ],

            health_check_interval: Duration::from_secs(10),
            failover_threshold: 3,
            auto_failover: true,

            ssh_ready_timeout: Duration::from_secs(300),

            auto_recovery: true,
            recovery_max_attempts: 10,
            recovery_retry_delay: Duration::from_secs(30),
            recovery_attempt_timeout: Duration::from_secs(600),
            recovery: RecoveryFilters::default(),
        }
    }
}
