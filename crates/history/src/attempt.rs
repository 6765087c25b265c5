//! Append-only record of every `create_instance` call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a failed creation attempt gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailingStage {
    /// No matching offer was found.
    Search,
    /// The offer was consumed by someone else before this attempt landed.
    OfferTaken,
    /// The provider API returned an error.
    ApiError,
    /// The instance never reached `running` within the provisioning timeout.
    ProvisionTimeout,
    /// The instance reached `running` but shell never became reachable.
    SshTimeout,
    /// Shell was reachable but the post-start hook/onstart command failed.
    PostStartFail,
}

impl std::fmt::Display for FailingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Search => "search",
            Self::OfferTaken => "offer_taken",
            Self::ApiError => "api_error",
            Self::ProvisionTimeout => "provision_timeout",
            Self::SshTimeout => "ssh_timeout",
            Self::PostStartFail => "post_start_fail",
        };
        write!(f, "{s}")
    }
}

/// One `create_instance` attempt, successful or not.
///
/// Recorded before the provider call completes where possible, per the
/// non-idempotence note in the design notes: losing the response must not
/// lose the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationAttempt {
    /// Marketplace this attempt targeted.
    pub provider: String,
    /// Opaque machine identifier the offer would have run on.
    pub machine_id: String,
    /// Offer id consumed by this attempt, if one was chosen.
    pub offer_id: Option<String>,
    /// GPU model advertised by the offer.
    pub gpu_model: Option<String>,
    /// Advertised hourly price at the time of the attempt.
    pub advertised_price: Option<f64>,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
    /// Whether the attempt ultimately produced a running instance.
    pub success: bool,
    /// Where the attempt failed. `None` when `success` is true.
    pub failing_stage: Option<FailingStage>,
    /// Free-form failure detail, when available.
    pub failure_reason: Option<String>,
    /// Seconds from attempt to `running` with shell available, on success.
    pub time_to_ready_secs: Option<f64>,
    /// The resulting instance id, on success.
    pub instance_id: Option<String>,
}

impl CreationAttempt {
    /// Start building a successful attempt record.
    #[must_use]
    pub fn success(provider: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            machine_id: machine_id.into(),
            offer_id: None,
            gpu_model: None,
            advertised_price: None,
            attempted_at: Utc::now(),
            success: true,
            failing_stage: None,
            failure_reason: None,
            time_to_ready_secs: None,
            instance_id: None,
        }
    }

    /// Start building a failed attempt record.
    #[must_use]
    pub fn failure(
        provider: impl Into<String>,
        machine_id: impl Into<String>,
        stage: FailingStage,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            machine_id: machine_id.into(),
            offer_id: None,
            gpu_model: None,
            advertised_price: None,
            attempted_at: Utc::now(),
            success: false,
            failing_stage: Some(stage),
            failure_reason: Some(reason.into()),
            time_to_ready_secs: None,
            instance_id: None,
        }
    }
}
