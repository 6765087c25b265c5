//! Standby association data model.
//!
//! An association pairs one GPU instance with one warm CPU standby VM.
//! Keyed by `gpu_instance_id` for the lifetime of the pairing; recovery
//! rekeys an association onto the replacement GPU's id once one is found.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a GPU/CPU standby pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    /// The CPU VM has been requested but is not yet confirmed reachable.
    Provisioning,
    /// Sync and health-check loops are both running normally.
    Syncing,
    /// The CPU VM is up and reachable but no sync round has completed yet.
    Ready,
    /// The GPU is presumed dead; the CPU standby is serving as the active endpoint.
    FailoverActive,
    /// The recovery loop is searching for and provisioning a replacement GPU.
    Recovering,
    /// Provisioning or recovery failed unrecoverably; the association is inert.
    Error,
}

/// Why a GPU was marked failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The health-check loop crossed the consecutive-failure threshold.
    HealthCheckTimeout,
    /// The provider reported the instance as reclaimed (spot interruption).
    SpotInterruption,
    /// An external caller (e.g. the instance service) reported the GPU as down.
    External(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HealthCheckTimeout => write!(f, "health check timeout"),
            Self::SpotInterruption => write!(f, "spot interruption"),
            Self::External(reason) => write!(f, "{reason}"),
        }
    }
}

/// A GPU/CPU standby pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandbyAssociation {
    /// Internal fleet-wide numeric id of the GPU instance, used only for
    /// event correlation; provider calls always go by `gpu_instance_id`.
    pub fleet_instance_id: i64,
    /// Provider-assigned id of the GPU instance. The association's key.
    pub gpu_instance_id: String,
    pub gpu_ssh_host: Option<String>,
    pub gpu_ssh_port: Option<u16>,
    pub cpu_instance_name: String,
    pub cpu_zone: String,
    pub cpu_ssh_host: Option<String>,
    pub cpu_ssh_port: Option<u16>,
    pub state: PairState,
    /// Manual on/off switch for the sync loop; independent of `state`.
    /// Toggled by [`crate::StandbyManager::start_sync`]/`stop_sync`.
    pub sync_enabled: bool,
    pub sync_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_bytes: u64,
    pub consecutive_sync_failures: u32,
    pub failed_health_checks: u32,
    pub gpu_failed: bool,
    pub failure_reason: Option<FailureReason>,
    pub recovery_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl StandbyAssociation {
    #[must_use]
    pub fn new(
        fleet_instance_id: i64,
        gpu_instance_id: String,
        cpu_instance_name: String,
        cpu_zone: String,
    ) -> Self {
        Self {
            fleet_instance_id,
            gpu_instance_id,
            gpu_ssh_host: None,
            gpu_ssh_port: None,
            cpu_instance_name,
            cpu_zone,
            cpu_ssh_host: None,
            cpu_ssh_port: None,
            state: PairState::Provisioning,
            sync_enabled: true,
            sync_count: 0,
            last_sync_at: None,
            last_sync_bytes: 0,
            consecutive_sync_failures: 0,
            failed_health_checks: 0,
            gpu_failed: false,
            failure_reason: None,
            recovery_attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Which side of an association is currently serving traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Gpu,
    Cpu,
}

/// The host/port a caller should currently address for an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEndpoint {
    pub source: EndpointSource,
    pub host: String,
    pub port: u16,
}

/// Point-in-time summary of the manager's overall state, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandbyManagerStatus {
    pub configured: bool,
    pub auto_standby_enabled: bool,
    pub association_count: usize,
    pub failover_active_count: usize,
    pub recovering_count: usize,
}
