//! Tier 1: the static marketplace-region-string to CPU-zone table.

/// `(marketplace region phrase, target zone)` pairs.
///
/// Order matters only for the substring scan in
/// [`crate::Resolver::resolve`]: exact match is tried first regardless of
/// order, but the substring fallback returns the first key whose text
/// appears in the input, so more specific phrases are listed before the
/// generic `US`/`EU`/`ASIA` fallback rows.
pub const REGION_MAP: &[(&str, &str)] = &[
    // Americas: US West
    ("California, US", "us-west2-a"),
    ("Los Angeles", "us-west2-a"),
    ("LA", "us-west2-a"),
    ("Oregon, US", "us-west1-a"),
    ("Washington, US", "us-west1-a"),
    ("Seattle", "us-west1-a"),
    ("Nevada, US", "us-west4-a"),
    ("Las Vegas", "us-west4-a"),
    // Americas: US Central
    ("Utah, US", "us-central1-a"),
    ("Iowa, US", "us-central1-a"),
    ("Illinois, US", "us-central1-a"),
    ("Chicago", "us-central1-a"),
    ("Texas, US", "us-south1-a"),
    ("Dallas", "us-south1-a"),
    ("Kansas, US", "us-central1-a"),
    ("Oklahoma, US", "us-central1-a"),
    ("Missouri, US", "us-central1-a"),
    // Americas: US East
    ("Virginia, US", "us-east4-a"),
    ("New York, US", "us-east4-a"),
    ("NYC", "us-east4-a"),
    ("North Carolina, US", "us-east1-a"),
    ("South Carolina, US", "us-east1-a"),
    ("Georgia, US", "us-east1-a"),
    ("Atlanta", "us-east1-a"),
    ("Florida, US", "us-east1-a"),
    ("Miami", "us-east1-a"),
    // Canada
    ("Quebec", "northamerica-northeast1-a"),
    ("Montreal", "northamerica-northeast1-a"),
    ("Montréal", "northamerica-northeast1-a"),
    ("QC", "northamerica-northeast1-a"),
    ("Ontario", "northamerica-northeast1-a"),
    ("Toronto", "northamerica-northeast1-a"),
    ("Canada", "northamerica-northeast1-a"),
    ("CA", "northamerica-northeast1-a"),
    // LATAM
    ("Brazil", "southamerica-east1-a"),
    ("São Paulo", "southamerica-east1-a"),
    ("Sao Paulo", "southamerica-east1-a"),
    ("BR", "southamerica-east1-a"),
    ("Chile", "southamerica-west1-a"),
    ("Santiago", "southamerica-west1-a"),
    ("Argentina", "southamerica-east1-a"),
    // Europe: West
    ("Belgium, BE", "europe-west1-a"),
    ("Belgium", "europe-west1-a"),
    ("Brussels", "europe-west1-a"),
    ("Netherlands, NL", "europe-west4-a"),
    ("Netherlands", "europe-west4-a"),
    ("Amsterdam", "europe-west4-a"),
    ("United Kingdom", "europe-west2-a"),
    ("UK", "europe-west2-a"),
    ("London", "europe-west2-a"),
    ("GB", "europe-west2-a"),
    ("Ireland", "europe-west1-b"),
    ("Dublin", "europe-west1-b"),
    ("France", "europe-west9-a"),
    ("Paris", "europe-west9-a"),
    ("FR", "europe-west9-a"),
    // Europe: Central
    ("Germany, DE", "europe-west3-a"),
    ("Germany", "europe-west3-a"),
    ("Frankfurt", "europe-west3-a"),
    ("Berlin", "europe-west3-a"),
    ("DE", "europe-west3-a"),
    ("Switzerland", "europe-west6-a"),
    ("Zurich", "europe-west6-a"),
    ("CH", "europe-west6-a"),
    ("Austria", "europe-west3-a"),
    ("Vienna", "europe-west3-a"),
    // Europe: North
    ("Finland, FI", "europe-north1-a"),
    ("Finland", "europe-north1-a"),
    ("Helsinki", "europe-north1-a"),
    ("Sweden", "europe-north1-a"),
    ("Stockholm", "europe-north1-a"),
    ("Norway", "europe-north1-a"),
    ("Oslo", "europe-north1-a"),
    ("Denmark", "europe-north1-a"),
    ("Copenhagen", "europe-north1-a"),
    // Europe: East
    ("Poland, PL", "europe-central2-a"),
    ("Poland", "europe-central2-a"),
    ("Warsaw", "europe-central2-a"),
    ("PL", "europe-central2-a"),
    // Europe: South
    ("Spain", "europe-southwest1-a"),
    ("Madrid", "europe-southwest1-a"),
    ("Italy", "europe-west8-a"),
    ("Milan", "europe-west8-a"),
    // Asia: East
    ("Taiwan, TW", "asia-east1-a"),
    ("Taiwan", "asia-east1-a"),
    ("TW", "asia-east1-a"),
    ("Hong Kong", "asia-east2-a"),
    ("HK", "asia-east2-a"),
    ("Japan, JP", "asia-northeast1-a"),
    ("Japan", "asia-northeast1-a"),
    ("Tokyo", "asia-northeast1-a"),
    ("JP", "asia-northeast1-a"),
    ("South Korea", "asia-northeast3-a"),
    ("Seoul", "asia-northeast3-a"),
    ("Korea", "asia-northeast3-a"),
    ("KR", "asia-northeast3-a"),
    // Asia: Southeast
    ("Singapore, SG", "asia-southeast1-a"),
    ("Singapore", "asia-southeast1-a"),
    ("SG", "asia-southeast1-a"),
    ("Indonesia", "asia-southeast2-a"),
    ("Jakarta", "asia-southeast2-a"),
    ("Thailand", "asia-southeast1-a"),
    ("Bangkok", "asia-southeast1-a"),
    ("Vietnam", "asia-southeast1-a"),
    ("Malaysia", "asia-southeast1-a"),
    // Asia: South
    ("India", "asia-south1-a"),
    ("Mumbai", "asia-south1-a"),
    ("IN", "asia-south1-a"),
    ("Bangalore", "asia-south1-a"),
    ("Delhi", "asia-south1-a"),
    // Oceania
    ("Australia, AU", "australia-southeast1-a"),
    ("Australia", "australia-southeast1-a"),
    ("Sydney", "australia-southeast1-a"),
    ("Melbourne", "australia-southeast1-a"),
    ("AU", "australia-southeast1-a"),
    ("New Zealand", "australia-southeast1-a"),
    ("NZ", "australia-southeast1-a"),
    // Middle East
    ("Israel", "me-west1-a"),
    ("Tel Aviv", "me-west1-a"),
    ("UAE", "me-central1-a"),
    ("Dubai", "me-central1-a"),
    // Generic continental fallbacks, checked last in the substring scan.
    ("US", "us-central1-a"),
    ("EU", "europe-west1-a"),
    ("ASIA", "asia-east1-a"),
];

/// Zone returned when neither tier 1 nor tier 2 produce a match.
///
/// Distinct from the `US`/`EU`/`ASIA` rows above: this is the tier-3
/// catch-all, never a tier-1 hit.
pub const GENERIC_FALLBACK_ZONE: &str = "us-central1-a";

/// Look up `region` in [`REGION_MAP`], exact match first, then a
/// case-insensitive substring scan over the table keys.
///
/// Mirrors the original's `if vast_region in REGION_MAP` followed by a
/// `for key, zone in REGION_MAP.items()` substring loop.
#[must_use]
pub fn lookup(region: &str) -> Option<&'static str> {
    if let Some((_, zone)) = REGION_MAP.iter().find(|(key, _)| *key == region) {
        return Some(zone);
    }
    let lower = region.to_lowercase();
    REGION_MAP
        .iter()
        .find(|(key, _)| lower.contains(&key.to_lowercase()))
        .map(|(_, zone)| *zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        assert_eq!(lookup("Quebec"), Some("northamerica-northeast1-a"));
    }

    #[test]
    fn substring_scan_is_case_insensitive() {
        assert_eq!(lookup("somewhere in quebec, canada"), Some("northamerica-northeast1-a"));
    }

    #[test]
    fn unknown_region_misses_tier_1() {
        assert_eq!(lookup("Nowhereland"), None);
    }

    #[test]
    fn continental_fallback_rows_still_match() {
        assert_eq!(lookup("US"), Some("us-central1-a"));
        assert_eq!(lookup("EU"), Some("europe-west1-a"));
        assert_eq!(lookup("ASIA"), Some("asia-east1-a"));
    }
}
