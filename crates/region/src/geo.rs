//! Tier 2: IP geolocation and Haversine nearest-zone search.

use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::GeoError;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// `(zone, (latitude, longitude))` table used for nearest-neighbor search.
pub const ZONE_COORDINATES: &[(&str, (f64, f64))] = &[
    ("us-central1-a", (41.2619, -95.8608)),
    ("us-east1-b", (33.1960, -80.0131)),
    ("europe-west1-b", (50.4491, 3.8192)),
    ("asia-east1-a", (24.0717, 120.5624)),
    ("northamerica-northeast1-a", (45.5019, -73.5674)),
    ("southamerica-east1-a", (-23.5505, -46.6333)),
    ("australia-southeast1-a", (-33.8688, 151.2093)),
];

/// Maximum distance, in km, for a tier-2 geolocation match to be accepted.
///
/// Diverges from the Python original's 10000km default — this crate
/// enforces the tighter bound the fleet spec calls for, so a geolocated
/// offer never lands on a zone a continent away.
pub const MAX_ACCEPT_DISTANCE_KM: f64 = 500.0;

/// Great-circle distance between two points, in kilometers.
#[must_use]
pub fn haversine_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lng1, lat2, lng2) = (
        lat1.to_radians(),
        lng1.to_radians(),
        lat2.to_radians(),
        lng2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Nearest zone to `(lat, lng)` and its distance, or `None` if the nearest
/// entry in [`ZONE_COORDINATES`] is farther than [`MAX_ACCEPT_DISTANCE_KM`].
#[must_use]
pub fn nearest_zone(lat: f64, lng: f64) -> Option<(&'static str, f64)> {
    let (zone, distance) = ZONE_COORDINATES
        .iter()
        .map(|(zone, (zlat, zlng))| (*zone, haversine_distance_km(lat, lng, *zlat, *zlng)))
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;

    if distance > MAX_ACCEPT_DISTANCE_KM {
        None
    } else {
        Some((zone, distance))
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

/// Resolves an IP address to `(latitude, longitude)` via an external
/// geolocation service, caching results per IP for the process lifetime.
pub struct GeoLocator {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, (f64, f64)>,
}

impl GeoLocator {
    /// Point at the default `ipinfo.io` service.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url("https://ipinfo.io".to_string())
    }

    /// Point at an arbitrary base URL, for tests against a local mock server.
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url,
            cache: DashMap::new(),
        }
    }

    /// Resolve `ip` to coordinates, consulting and populating the cache.
    ///
    /// # Errors
    /// Returns [`GeoError`] if the request fails or the provider has no
    /// location on file for this IP.
    pub async fn locate(&self, ip: &str) -> Result<(f64, f64), GeoError> {
        if let Some(coords) = self.cache.get(ip) {
            return Ok(*coords);
        }

        let url = format!("{}/{ip}/json", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let body: IpInfoResponse = resp.json().await?;

        let Some(loc) = body.loc else {
            warn!(ip, "geolocation provider returned no loc field");
            return Err(GeoError::NoLocation);
        };
        let mut parts = loc.splitn(2, ',');
        let parsed = match (parts.next(), parts.next()) {
            (Some(lat), Some(lng)) => lat.trim().parse::<f64>().ok().zip(lng.trim().parse::<f64>().ok()),
            _ => None,
        };
        let Some((lat, lng)) = parsed else {
            warn!(ip, loc, "geolocation provider returned an unparseable loc field");
            return Err(GeoError::NoLocation);
        };

        info!(
            ip,
            city = body.city.as_deref().unwrap_or("unknown"),
            region = body.region.as_deref().unwrap_or("unknown"),
            country = body.country.as_deref().unwrap_or("unknown"),
            lat,
            lng,
            "resolved IP to coordinates"
        );

        self.cache.insert(ip.to_string(), (lat, lng));
        Ok((lat, lng))
    }
}

impl Default for GeoLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        let d = haversine_distance_km(45.5019, -73.5674, 45.5019, -73.5674);
        assert!(d < 0.001);
    }

    #[test]
    fn nearest_zone_finds_montreal() {
        let (zone, distance) = nearest_zone(45.50, -73.57).expect("should be within range");
        assert_eq!(zone, "northamerica-northeast1-a");
        assert!(distance < 10.0);
    }

    #[test]
    fn nearest_zone_rejects_points_beyond_threshold() {
        // Mid-Atlantic, far from every listed zone.
        assert!(nearest_zone(10.0, -30.0).is_none());
    }
}
