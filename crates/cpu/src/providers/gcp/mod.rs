//! Google Compute Engine adapter for stable-cloud CPU standby VMs.

mod client;
mod models;

pub use client::GcpProvider;
