//! Request/response types for the Instance Service (C9).

use gpu::Offer;
use history::ReliabilityStatus;
use serde::{Deserialize, Serialize};

/// An offer tagged with its machine-history annotation, as returned by
/// [`crate::InstanceService::search_offers`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedOffer {
    #[serde(flatten)]
    pub offer: Offer,
    pub is_blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub success_rate: Option<f64>,
    pub total_attempts: u32,
    pub reliability_status: ReliabilityStatus,
}

/// Result of [`crate::InstanceService::validate_before_create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Everything needed to create an instance from an offer already returned
/// by `search_offers`, carried by the caller so the attempt record can be
/// written with a machine identifier even if the provider call itself
/// never returns one (create is not idempotent; see §9's retries note).
#[derive(Debug, Clone)]
pub struct CreateInstanceParams {
    pub offer_id: String,
    pub machine_id: String,
    pub gpu_model: String,
    pub price_per_hour: f64,
    pub image: String,
    pub disk_gb: u32,
    pub label: Option<String>,
    pub ports: Vec<u16>,
    pub onstart: Option<String>,
}

/// Why an instance is being destroyed; governs what happens to its
/// standby association, per §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    /// The user asked for it directly.
    UserRequest,
    /// The GPU was lost (health-check escalation or explicit report).
    GpuFailure,
    /// The provider reclaimed the spot/interruptible capacity.
    SpotInterruption,
}

/// Parameters for [`crate::InstanceService::migrate_instance`]: relocate a
/// running instance onto a new offer via snapshot + create + restore.
#[derive(Debug, Clone)]
pub struct MigrateParams {
    pub source_instance_id: String,
    pub source_shell_host: String,
    pub source_shell_port: u16,
    pub source_path: String,
    pub target_offer_id: String,
    pub target_image: String,
    pub target_disk_gb: u32,
    pub target_path: String,
    pub ready_timeout_secs: u64,
    pub destroy_source: bool,
}

/// Outcome of a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateOutcome {
    pub new_instance_id: String,
    pub snapshot_id: String,
    pub source_destroyed: bool,
}
