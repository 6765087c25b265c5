//! Region Resolver (C8): maps opaque marketplace region strings to a
//! concrete CPU-cloud zone.
//!
//! Three tiers, in order: a static phrase table, IP geolocation with a
//! Haversine nearest-zone search, then a generic regional fallback that
//! never fails. Every tier is pure except the geolocation lookup, which is
//! cached per IP for the process lifetime.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod geo;
mod map;

pub use error::GeoError;
pub use geo::{haversine_distance_km, nearest_zone, GeoLocator, MAX_ACCEPT_DISTANCE_KM, ZONE_COORDINATES};
pub use map::{lookup, GENERIC_FALLBACK_ZONE, REGION_MAP};

/// Which tier produced a [`Resolver::resolve`] result, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// Matched the static phrase table.
    Static,
    /// Matched via IP geolocation and nearest-zone search.
    Geolocation,
    /// No match; fell through to the generic regional fallback.
    Fallback,
}

/// A resolved zone plus which tier produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub zone: String,
    pub tier: ResolutionTier,
    /// Distance in km to the matched zone, when resolved via geolocation.
    pub distance_km: Option<f64>,
}

/// Resolves marketplace region strings to CPU-cloud zones.
///
/// Total: [`Resolver::resolve`] always returns a zone, per §4.8's "never
/// fail" invariant.
pub struct Resolver {
    locator: GeoLocator,
}

impl Resolver {
    /// Build a resolver using the default `ipinfo.io` geolocation backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locator: GeoLocator::new(),
        }
    }

    /// Build a resolver pointed at a custom geolocation backend, for tests.
    #[must_use]
    pub fn with_locator(locator: GeoLocator) -> Self {
        Self { locator }
    }

    /// Resolve `marketplace_region` to a CPU zone.
    ///
    /// `ip` enables tier 2 when the static table misses. Never returns an
    /// error: a failed or absent geolocation lookup falls through to the
    /// generic regional fallback rather than propagating.
    pub async fn resolve(&self, marketplace_region: &str, ip: Option<&str>) -> Resolution {
        if let Some(zone) = map::lookup(marketplace_region) {
            return Resolution {
                zone: zone.to_string(),
                tier: ResolutionTier::Static,
                distance_km: None,
            };
        }

        if let Some(ip) = ip {
            match self.locator.locate(ip).await {
                Ok((lat, lng)) => {
                    if let Some((zone, distance)) = geo::nearest_zone(lat, lng) {
                        return Resolution {
                            zone: zone.to_string(),
                            tier: ResolutionTier::Geolocation,
                            distance_km: Some(distance),
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(marketplace_region, ip, %err, "geolocation tier failed, falling back");
                }
            }
        }

        Resolution {
            zone: GENERIC_FALLBACK_ZONE.to_string(),
            tier: ResolutionTier::Fallback,
            distance_km: None,
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_table_short_circuits_geolocation() {
        let resolver = Resolver::new();
        let res = resolver.resolve("Quebec", None).await;
        assert_eq!(res.tier, ResolutionTier::Static);
        assert_eq!(res.zone, "northamerica-northeast1-a");
    }

    #[tokio::test]
    async fn unknown_region_without_ip_falls_all_the_way_through() {
        let resolver = Resolver::new();
        let res = resolver.resolve("Nowhereland", None).await;
        assert_eq!(res.tier, ResolutionTier::Fallback);
        assert_eq!(res.zone, GENERIC_FALLBACK_ZONE);
    }

    #[tokio::test]
    async fn geolocation_failure_falls_back_instead_of_erroring() {
        let resolver = Resolver::with_locator(GeoLocator::with_base_url(
            "http://127.0.0.1:1".to_string(),
        ));
        let res = resolver.resolve("Nowhereland", Some("1.2.3.4")).await;
        assert_eq!(res.tier, ResolutionTier::Fallback);
    }
}
