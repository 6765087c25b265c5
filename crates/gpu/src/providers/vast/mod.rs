//! Vast.ai-style spot GPU marketplace adapter.

mod client;
mod models;

pub use client::{VastProvider, DEFAULT_BASE_URL};
