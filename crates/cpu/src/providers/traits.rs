//! CPU provider trait and common types.
//!
//! `CpuProvider` is the uniform interface over stable-cloud CPU VMs used
//! as standby/failover targets while a GPU machine is down. Unlike the
//! spot GPU marketplace, these VMs are expected to stay up for the
//! lifetime of a sync session; `Start`/`Stop` exist because the standby
//! manager suspends a CPU VM rather than destroying it between uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for CPU provider operations. Mirrors the GPU
/// taxonomy so the standby manager can treat both uniformly.
#[derive(Error, Debug)]
pub enum CpuProviderError {
    /// Connection reset, 5xx, or request timeout. Retried by the adapter.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// HTTP 429 or GCP quota exceeded. Retried with exponential backoff.
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 400. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP 401/403, or a malformed/expired service account credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 404. Idempotent success for `Destroy`, an error everywhere else.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local configuration problem (missing credentials, bad zone/project).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Response body did not parse as the expected shape.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Service-account JWT could not be signed or exchanged for a token.
    #[error("credential error: {0}")]
    Credential(String),

    /// The underlying HTTP client failed before a status code was available.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CpuProviderError {
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
            StatusCode::BAD_REQUEST => Self::InvalidRequest(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(body),
            StatusCode::NOT_FOUND => Self::NotFound(body),
            s if s.is_server_error() => Self::Transient(body),
            _ => Self::Transient(body),
        }
    }
}

/// Instance lifecycle status, as reported by the stable-cloud provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Hardware descriptor for a CPU standby VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSpecs {
    /// Machine type (e.g. "e2-medium").
    pub machine_type: String,
    /// Number of virtual CPUs.
    pub vcpus: u32,
    /// RAM in GB.
    pub ram_gb: u32,
    /// Boot disk size in GB.
    pub disk_gb: u32,
}

/// A stable-cloud CPU VM used as a standby/failover target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned numeric id, as a string.
    pub id: String,
    /// Instance name (also the provider's natural key within a zone).
    pub name: String,
    /// Zone the instance runs in.
    pub zone: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Hardware descriptor.
    pub specs: CpuSpecs,
    /// Public/external IP address, once assigned.
    pub external_ip: Option<String>,
    /// Internal/VPC IP address.
    pub internal_ip: Option<String>,
    /// Whether this is a spot/preemptible VM.
    pub spot: bool,
    /// When the instance was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a new standby CPU VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Instance name, must be unique within the zone.
    pub name: String,
    /// Zone to create the VM in.
    pub zone: String,
    /// Machine type (default: "e2-medium").
    pub machine_type: String,
    /// Boot disk size in GB (default: 100).
    pub disk_size_gb: u32,
    /// Whether to request a spot/preemptible VM (default: true).
    pub spot: bool,
    /// Labels applied to the instance for later listing/filtering.
    pub labels: Vec<(String, String)>,
    /// SSH public key installed for the `root` user.
    pub ssh_public_key: Option<String>,
    /// Startup script run once on first boot.
    pub startup_script: Option<String>,
}

/// Uniform interface over stable-cloud CPU VM providers.
#[async_trait]
pub trait CpuProvider: Send + Sync {
    /// Create a new standby VM.
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, CpuProviderError>;

    /// Fetch current instance state.
    async fn get_instance(&self, name: &str, zone: &str) -> Result<Instance, CpuProviderError>;

    /// List every instance this provider manages, across all zones when
    /// `zone` is `None`.
    async fn list_instances(
        &self,
        zone: Option<&str>,
    ) -> Result<Vec<Instance>, CpuProviderError>;

    /// Start a stopped instance.
    async fn start(&self, name: &str, zone: &str) -> Result<(), CpuProviderError>;

    /// Stop a running instance without destroying it.
    async fn stop(&self, name: &str, zone: &str) -> Result<(), CpuProviderError>;

    /// Destroy an instance. Idempotent: a 404 is treated as success.
    async fn destroy(&self, name: &str, zone: &str) -> Result<bool, CpuProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification_matches_taxonomy() {
        assert!(matches!(
            CpuProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            CpuProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            CpuProviderError::from_status(StatusCode::BAD_REQUEST, String::new()),
            CpuProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            CpuProviderError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            CpuProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            CpuProviderError::from_status(StatusCode::NOT_FOUND, String::new()),
            CpuProviderError::NotFound(_)
        ));
        assert!(matches!(
            CpuProviderError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            CpuProviderError::Transient(_)
        ));
    }

    #[test]
    fn only_transient_and_rate_limited_are_retryable() {
        assert!(CpuProviderError::Transient("x".into()).is_retryable());
        assert!(CpuProviderError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!CpuProviderError::InvalidRequest("x".into()).is_retryable());
        assert!(!CpuProviderError::Unauthorized("x".into()).is_retryable());
    }

    #[test]
    fn instance_status_display() {
        assert_eq!(InstanceStatus::Running.to_string(), "running");
        assert_eq!(InstanceStatus::Terminated.to_string(), "terminated");
    }
}
