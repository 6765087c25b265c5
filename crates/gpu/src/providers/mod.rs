//! GPU provider implementations.
//!
//! This module contains the [`GpuProvider`] trait and concrete marketplace
//! adapters.

pub mod traits;
pub mod vast;

pub use traits::{
    Balance, CreateInstanceRequest, GpuProvider, GpuProviderError, GpuSpecs, Instance,
    InstanceStatus, Offer, OfferFilter,
};
