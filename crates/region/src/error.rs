//! Error type for the region resolver.

use thiserror::Error;

/// Failures surfaced by the geolocation tier.
///
/// Per §4.8 the resolver itself never fails — these are only surfaced from
/// [`crate::GeoLocator`] so callers can log why tier 2 fell through to
/// tier 3, not as a [`crate::Resolver::resolve`] error.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("geolocation provider returned no location for this IP")]
    NoLocation,
}
