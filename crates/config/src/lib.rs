//! Environment-driven configuration for the fleet control plane.
//!
//! [`FleetConfig`] is assembled once at process start and passed down
//! explicitly to every component — per the design note that live
//! reconfiguration is out of scope and singletons must be constructed
//! with an immutable configuration, not reach for globals.
//!
//! # Usage
//!
//! ```no_run
//! use config::FleetConfig;
//!
//! let cfg = FleetConfig::from_env().expect("configuration");
//! println!("default zone: {}", cfg.cpu_default_zone);
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;

pub use error::ConfigError;

use std::path::PathBuf;

/// Default GPU marketplace API base URL.
pub const DEFAULT_GPU_PROVIDER_BASE_URL: &str = "https://console.vast.ai/api/v0";

/// Default stable-cloud compute zone when no region can be resolved.
pub const DEFAULT_CPU_ZONE: &str = "us-central1-a";

/// Default minimum machine reliability (success rate) required to keep
/// offering a machine without annotation.
pub const DEFAULT_MIN_MACHINE_RELIABILITY: f64 = 0.5;

/// Default in-guest agent heartbeat interval.
pub const DEFAULT_AGENT_SYNC_INTERVAL_SECS: u64 = 30;

/// Environment-driven configuration shared by every binary entry point.
///
/// All fields have defaults sufficient for a development run except the
/// two provider credentials, which fail loudly at startup rather than
/// quietly disabling the adapters that need them.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Bearer token for the GPU marketplace API.
    pub gpu_provider_api_key: String,
    /// Base URL for the GPU marketplace API.
    pub gpu_provider_base_url: String,
    /// Path to the stable-cloud service-account JSON credentials.
    pub cpu_service_account_path: PathBuf,
    /// Default compute zone used when region resolution has nothing better.
    pub cpu_default_zone: String,
    /// S3-compatible object store endpoint for snapshots and checkpoints.
    pub object_store_endpoint: String,
    /// Object store bucket name.
    pub object_store_bucket: String,
    /// Object store access key.
    pub object_store_access_key: String,
    /// Object store secret key.
    pub object_store_secret_key: String,
    /// Minimum success rate a machine must maintain before it is flagged.
    pub min_machine_reliability: f64,
    /// Interval at which in-guest agents are expected to heartbeat.
    pub agent_sync_interval_secs: u64,
    /// Secret used to sign user sessions (owned by the façade, passed through).
    pub session_secret: String,
    /// When true, provider adapters may be replaced with in-memory demo doubles.
    pub demo_mode: bool,
    /// Allowed CORS origins for the façade (comma-separated in the environment).
    pub cors_allowed_origins: Vec<String>,
    /// Path to the optional user-facing config file (TOML or YAML).
    pub user_config_path: Option<PathBuf>,
}

impl FleetConfig {
    /// Assemble configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `GPU_PROVIDER_API_KEY`: bearer token for the GPU marketplace
    /// - `CPU_SERVICE_ACCOUNT_PATH`: path to the stable-cloud credentials
    ///
    /// # Optional Environment Variables
    /// - `GPU_PROVIDER_BASE_URL` (default: vast.ai's public API)
    /// - `CPU_DEFAULT_ZONE` (default: `us-central1-a`)
    /// - `OBJECT_STORE_ENDPOINT` / `_BUCKET` / `_ACCESS_KEY` / `_SECRET_KEY`
    /// - `MIN_MACHINE_RELIABILITY` (default: 0.5)
    /// - `AGENT_SYNC_INTERVAL_SECS` (default: 30)
    /// - `SESSION_SECRET` (default: a fixed development value; never use in production)
    /// - `DEMO_MODE` (default: false)
    /// - `CORS_ALLOWED_ORIGINS` (comma-separated, default: empty)
    /// - `USER_CONFIG_PATH` (default: unset)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] if a required variable is
    /// absent, or [`ConfigError::InvalidVar`] if a numeric variable is
    /// set but fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let gpu_provider_api_key = require_var("GPU_PROVIDER_API_KEY")?;
        let cpu_service_account_path =
            PathBuf::from(require_var("CPU_SERVICE_ACCOUNT_PATH")?);

        let gpu_provider_base_url = std::env::var("GPU_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GPU_PROVIDER_BASE_URL.to_string());
        let cpu_default_zone =
            std::env::var("CPU_DEFAULT_ZONE").unwrap_or_else(|_| DEFAULT_CPU_ZONE.to_string());

        let object_store_endpoint = std::env::var("OBJECT_STORE_ENDPOINT").unwrap_or_default();
        let object_store_bucket = std::env::var("OBJECT_STORE_BUCKET").unwrap_or_default();
        let object_store_access_key =
            std::env::var("OBJECT_STORE_ACCESS_KEY").unwrap_or_default();
        let object_store_secret_key =
            std::env::var("OBJECT_STORE_SECRET_KEY").unwrap_or_default();

        let min_machine_reliability = parse_var_or(
            "MIN_MACHINE_RELIABILITY",
            DEFAULT_MIN_MACHINE_RELIABILITY,
        );

        let agent_sync_interval_secs = std::env::var("AGENT_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_AGENT_SYNC_INTERVAL_SECS);

        let session_secret = std::env::var("SESSION_SECRET")
            .unwrap_or_else(|_| "dev-only-insecure-secret".to_string());

        let demo_mode = std::env::var("DEMO_MODE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let user_config_path = std::env::var("USER_CONFIG_PATH").ok().map(PathBuf::from);

        Ok(Self {
            gpu_provider_api_key,
            gpu_provider_base_url,
            cpu_service_account_path,
            cpu_default_zone,
            object_store_endpoint,
            object_store_bucket,
            object_store_access_key,
            object_store_secret_key,
            min_machine_reliability,
            agent_sync_interval_secs,
            session_secret,
            demo_mode,
            cors_allowed_origins,
            user_config_path,
        })
    }

    /// Whether object-store credentials are present (snapshot/checkpoint
    /// durable mirroring requires them; their absence is not itself an
    /// error, since demo and CPU-only deployments can run without it).
    #[must_use]
    pub fn has_object_store(&self) -> bool {
        !self.object_store_endpoint.is_empty() && !self.object_store_bucket.is_empty()
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn parse_var_or(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "GPU_PROVIDER_API_KEY",
            "CPU_SERVICE_ACCOUNT_PATH",
            "GPU_PROVIDER_BASE_URL",
            "CPU_DEFAULT_ZONE",
            "OBJECT_STORE_ENDPOINT",
            "OBJECT_STORE_BUCKET",
            "MIN_MACHINE_RELIABILITY",
            "AGENT_SYNC_INTERVAL_SECS",
            "CORS_ALLOWED_ORIGINS",
            "DEMO_MODE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_required_var_is_reported_by_name() {
        clear_env();
        let err = FleetConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("GPU_PROVIDER_API_KEY")));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_absent() {
        clear_env();
        std::env::set_var("GPU_PROVIDER_API_KEY", "key-123");
        std::env::set_var("CPU_SERVICE_ACCOUNT_PATH", "/tmp/sa.json");

        let cfg = FleetConfig::from_env().unwrap();
        assert_eq!(cfg.gpu_provider_base_url, DEFAULT_GPU_PROVIDER_BASE_URL);
        assert_eq!(cfg.cpu_default_zone, DEFAULT_CPU_ZONE);
        assert!((cfg.min_machine_reliability - DEFAULT_MIN_MACHINE_RELIABILITY).abs() < f64::EPSILON);
        assert!(!cfg.demo_mode);
        assert!(cfg.cors_allowed_origins.is_empty());
        assert!(!cfg.has_object_store());

        clear_env();
    }

    #[test]
    #[serial]
    fn cors_origins_are_split_and_trimmed() {
        clear_env();
        std::env::set_var("GPU_PROVIDER_API_KEY", "key-123");
        std::env::set_var("CPU_SERVICE_ACCOUNT_PATH", "/tmp/sa.json");
        std::env::set_var("CORS_ALLOWED_ORIGINS", "https://a.test, https://b.test ,");

        let cfg = FleetConfig::from_env().unwrap();
        assert_eq!(
            cfg.cors_allowed_origins,
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );

        clear_env();
    }
}
