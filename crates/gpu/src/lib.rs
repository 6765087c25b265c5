//! GPU spot/interruptible instance provisioning.
//!
//! This crate provides a uniform [`GpuProvider`] abstraction over
//! spot-priced GPU marketplaces, where instances are cheap but can be
//! reclaimed or go unavailable at any time. The fleet's standby manager
//! and serverless scheduler treat every GPU instance as disposable:
//! workloads checkpoint, instances get destroyed and recreated, and a
//! separate machine-history engine tracks which physical machines are
//! reliable enough to keep renting from.
//!
//! ## Supported providers
//!
//! - [`providers::vast`] - a Vast.ai-style bidding marketplace, searched
//!   by offer and consumed into a running instance.
//!
//! ## Example
//!
//! ```ignore
//! use gpu::providers::vast::VastProvider;
//! use gpu::{CreateInstanceRequest, GpuProvider, OfferFilter};
//!
//! let provider = VastProvider::new(api_key)?;
//!
//! let offers = provider.search_offers(&OfferFilter::default()).await?;
//! let offer = &offers[0];
//!
//! let instance = provider
//!     .create_instance(CreateInstanceRequest {
//!         offer_id: offer.id.clone(),
//!         image: "pytorch/pytorch:latest".to_string(),
//!         disk_gb: 50,
//!         label: Some("training-run-1".to_string()),
//!         ports: vec![],
//!         onstart: None,
//!     })
//!     .await?;
//!
//! provider.destroy(&instance.id).await?;
//! ```

pub mod providers;
mod retry;

pub use providers::vast;
pub use providers::traits::{
    Balance, CreateInstanceRequest, GpuProvider, GpuProviderError, GpuSpecs, Instance,
    InstanceStatus, Offer, OfferFilter,
};
pub use retry::with_retry;
