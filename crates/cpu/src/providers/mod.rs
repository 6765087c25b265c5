//! CPU provider implementations.
//!
//! This module contains the [`CpuProvider`] trait and the concrete
//! stable-cloud adapter.

pub mod gcp;
pub mod traits;

pub use traits::{
    CpuProvider, CpuProviderError, CpuSpecs, CreateInstanceRequest, Instance, InstanceStatus,
};
