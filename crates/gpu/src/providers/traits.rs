//! GPU provider trait and common types.
//!
//! `GpuProvider` is the uniform interface over spot/interruptible GPU
//! marketplaces. Concrete adapters (see [`crate::providers::vast`])
//! translate this interface into a specific marketplace's HTTP API and
//! classify every failure into [`GpuProviderError`] so callers in the
//! standby manager, scheduler, and instance service never need to know
//! which marketplace they are talking to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for GPU provider operations.
///
/// Retry discipline lives at the adapter (see [`crate::retry`]): only
/// [`GpuProviderError::Transient`] and [`GpuProviderError::RateLimited`]
/// are ever retried, at most three attempts with 1s/2s/4s delays. Every
/// other variant fails up immediately.
#[derive(Error, Debug)]
pub enum GpuProviderError {
    /// Connection reset, 5xx, or request timeout. Retried by the adapter.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// HTTP 429. Retried by the adapter with exponential backoff capped at 60s.
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 400/422. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP 401/403. Fails up as a configuration error.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 404. Idempotent success for `Destroy`, an error everywhere else.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 409, or the specific case of an offer already taken.
    #[error("offer unavailable: {0}")]
    OfferUnavailable(String),

    /// Local configuration problem (missing credentials, bad base URL).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Response body did not parse as the expected shape.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying HTTP client failed before a status code was available
    /// (DNS failure, connection refused, etc). Treated as transient.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GpuProviderError {
    /// Whether the adapter's retry loop should retry this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Classify an HTTP status code and response body into the taxonomy above.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        use reqwest::StatusCode;
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after_secs: None,
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::InvalidRequest(body)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(body),
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::CONFLICT => Self::OfferUnavailable(body),
            s if s.is_server_error() => Self::Transient(body),
            _ => Self::Transient(body),
        }
    }
}

/// Instance/offer lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The marketplace has accepted the request and is provisioning.
    Creating,
    /// The instance is running and reachable.
    Running,
    /// The instance is paused (billed at idle rate, not destroyed).
    Paused,
    /// The instance is stopped (provider-specific meaning, not destroyed).
    Stopped,
    /// The instance exited on its own (process completion, spot reclaim).
    Exited,
    /// The instance has been destroyed. Terminal; no further transitions.
    Destroyed,
    /// Status reported by the provider that this crate does not recognize.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Hardware descriptor shared by offers and instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSpecs {
    /// GPU model (e.g. "RTX 4090", "H100 SXM").
    pub gpu_model: String,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// GPU memory in GB, per device.
    pub gpu_memory_gb: Option<u32>,
    /// Number of virtual CPUs.
    pub vcpus: u32,
    /// RAM in GB.
    pub ram_gb: u32,
    /// Storage in GB.
    pub storage_gb: u32,
}

/// An advertised unit of purchasable capacity. Ephemeral; consumable at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Offer identifier, consumed by `CreateInstance`.
    pub id: String,
    /// Hardware descriptor.
    pub specs: GpuSpecs,
    /// Advertised hourly price in USD.
    pub price_per_hour: f64,
    /// Marketplace region/geolocation string (opaque, provider-specific).
    pub geolocation: String,
    /// Provider-reported reliability score in [0, 1].
    pub reliability: f64,
    /// Opaque machine identifier this offer would run on.
    pub machine_id: String,
    /// Whether the offer requires a verified host.
    pub verified: bool,
}

/// A rented GPU machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Stable numeric id, as a string (providers vary in id type).
    pub id: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Hardware descriptor.
    pub specs: GpuSpecs,
    /// Hourly cost in USD.
    pub dph_total: f64,
    /// Public IP address, once assigned.
    pub public_ip: Option<String>,
    /// Secure-shell host, once assigned.
    pub ssh_host: Option<String>,
    /// Secure-shell port, once assigned.
    pub ssh_port: Option<u16>,
    /// Opaque machine identifier used by the provider.
    pub machine_id: String,
    /// Marketplace geolocation string.
    pub geolocation: Option<String>,
    /// Provider-reported reliability score.
    pub reliability: Option<f64>,
    /// When the instance was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a new instance from a consumed offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Offer id to consume.
    pub offer_id: String,
    /// Container image to launch.
    pub image: String,
    /// Disk size in GB.
    pub disk_gb: u32,
    /// Optional human-readable label.
    pub label: Option<String>,
    /// Container-port to host-port mappings requested at create time.
    pub ports: Vec<u16>,
    /// Startup command run once the container is up.
    pub onstart: Option<String>,
}

/// Account balance, as reported by `GetBalance`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    /// Promotional/credit balance in USD.
    pub credit: f64,
    /// Cash balance in USD.
    pub balance: f64,
}

/// Uniform interface over spot/interruptible GPU marketplaces.
#[async_trait]
pub trait GpuProvider: Send + Sync {
    /// Search for purchasable offers matching a filter.
    async fn search_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, GpuProviderError>;

    /// Consume an offer and create a running instance.
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, GpuProviderError>;

    /// Fetch current instance state.
    async fn get_instance(&self, id: &str) -> Result<Instance, GpuProviderError>;

    /// List every instance owned by this account.
    async fn list_instances(&self) -> Result<Vec<Instance>, GpuProviderError>;

    /// Destroy an instance. Idempotent: a 404 is treated as success.
    async fn destroy(&self, id: &str) -> Result<bool, GpuProviderError>;

    /// Pause a running instance (billed at idle rate, process suspended).
    async fn pause(&self, id: &str) -> Result<bool, GpuProviderError>;

    /// Resume a paused instance.
    async fn resume(&self, id: &str) -> Result<bool, GpuProviderError>;

    /// Query account balance.
    async fn get_balance(&self) -> Result<Balance, GpuProviderError>;

    /// Poll until the instance reaches `Running` with shell coordinates set,
    /// or the timeout elapses.
    async fn wait_ready(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<Instance, GpuProviderError>;
}

/// Filter applied to `search_offers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferFilter {
    /// Exact GPU model match, if set.
    pub gpu_model: Option<String>,
    /// Minimum GPU count.
    pub num_gpus: Option<u32>,
    /// Minimum GPU memory in GB.
    pub min_gpu_ram_gb: Option<u32>,
    /// Minimum disk size in GB.
    pub min_disk_gb: Option<u32>,
    /// Maximum hourly price in USD.
    pub max_price_per_hour: Option<f64>,
    /// Minimum reliability score in [0, 1].
    pub min_reliability: Option<f64>,
    /// Substring match against offer geolocation.
    pub region: Option<String>,
    /// Only return offers on verified hosts.
    pub verified_only: bool,
    /// Maximum number of offers to return.
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification_matches_taxonomy() {
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            GpuProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::BAD_REQUEST, String::new()),
            GpuProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            GpuProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::NOT_FOUND, String::new()),
            GpuProviderError::NotFound(_)
        ));
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::CONFLICT, String::new()),
            GpuProviderError::OfferUnavailable(_)
        ));
        assert!(matches!(
            GpuProviderError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            GpuProviderError::Transient(_)
        ));
    }

    #[test]
    fn only_transient_and_rate_limited_are_retryable() {
        assert!(GpuProviderError::Transient("x".into()).is_retryable());
        assert!(GpuProviderError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!GpuProviderError::InvalidRequest("x".into()).is_retryable());
        assert!(!GpuProviderError::Unauthorized("x".into()).is_retryable());
        assert!(!GpuProviderError::NotFound("x".into()).is_retryable());
        assert!(!GpuProviderError::OfferUnavailable("x".into()).is_retryable());
    }

    #[test]
    fn instance_status_display() {
        assert_eq!(InstanceStatus::Running.to_string(), "running");
        assert_eq!(InstanceStatus::Destroyed.to_string(), "destroyed");
    }
}
