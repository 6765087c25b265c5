//! Stable-cloud CPU standby VM provisioning.
//!
//! This crate provides a uniform [`CpuProvider`] abstraction over
//! stable-cloud CPU instances used as standby/failover targets for the
//! fleet's GPU workloads. Unlike the spot GPU marketplace, these VMs are
//! meant to persist: the standby manager starts and stops them in place
//! rather than destroying and recreating them between uses, and keeps
//! one warm per active GPU machine so a snapshot restore has somewhere
//! to land immediately.
//!
//! ## Supported providers
//!
//! - [`providers::gcp`] - Google Compute Engine, authenticated with a
//!   service-account key via the JWT-bearer OAuth2 grant.
//!
//! ## Example
//!
//! ```ignore
//! use cpu::providers::gcp::GcpProvider;
//! use cpu::{CpuProvider, CreateInstanceRequest};
//!
//! let provider = GcpProvider::from_key_path(&credentials_path)?;
//!
//! let instance = provider
//!     .create_instance(CreateInstanceRequest {
//!         name: "standby-eu-1".to_string(),
//!         zone: "europe-west1-b".to_string(),
//!         machine_type: "e2-medium".to_string(),
//!         disk_size_gb: 100,
//!         spot: true,
//!         labels: vec![],
//!         ssh_public_key: None,
//!         startup_script: None,
//!     })
//!     .await?;
//!
//! provider.stop(&instance.name, &instance.zone).await?;
//! ```

pub mod auth;
pub mod providers;
mod retry;

pub use providers::gcp;
pub use providers::traits::{
    CpuProvider, CpuProviderError, CpuSpecs, CreateInstanceRequest, Instance, InstanceStatus,
};
pub use retry::with_retry;
