//! Blacklist entries and reliability classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a blacklist entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistType {
    /// Inserted automatically when a machine's failure rate crossed threshold.
    Auto,
    /// Inserted by an operator.
    Manual,
    /// A short-lived manual entry (e.g. during an incident).
    Temporary,
}

/// A machine barred from reuse, derived from aggregate failure stats or
/// added manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineBlacklistEntry {
    pub provider: String,
    pub machine_id: String,
    pub entry_type: BlacklistType,
    pub total_attempts: u32,
    pub failed_attempts: u32,
    pub failure_rate: f64,
    pub last_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires on its own.
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub reason: String,
    pub gpu_name: Option<String>,
}

impl MachineBlacklistEntry {
    /// Whether this entry currently blocks the machine from reuse.
    ///
    /// Per §3: `active` and `expires_at > now` (or no expiry) ⇒ blocked.
    #[must_use]
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Qualitative reliability band for a machine, derived from its success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    /// No attempts recorded yet for this machine.
    Unknown,
}

impl ReliabilityStatus {
    /// Classify a success rate into a band.
    ///
    /// Bands per §4.2: ≥0.95 excellent, ≥0.80 good, ≥0.50 fair, else poor;
    /// `total_attempts == 0` is `Unknown` regardless of rate.
    #[must_use]
    pub fn from_success_rate(success_rate: f64, total_attempts: u32) -> Self {
        if total_attempts == 0 {
            return Self::Unknown;
        }
        if success_rate >= 0.95 {
            Self::Excellent
        } else if success_rate >= 0.80 {
            Self::Good
        } else if success_rate >= 0.50 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

impl std::fmt::Display for ReliabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Per-offer annotation produced by [`crate::MachineHistoryStore::annotate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferAnnotation {
    pub machine_id: String,
    pub is_blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub success_rate: Option<f64>,
    pub total_attempts: u32,
    pub reliability_status: ReliabilityStatus,
}

/// Filter applied to [`crate::MachineHistoryStore::list`].
#[derive(Debug, Clone, Default)]
pub struct BlacklistFilter {
    pub provider: Option<String>,
    pub active_only: bool,
    pub entry_type: Option<BlacklistType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_bands_match_thresholds() {
        assert_eq!(
            ReliabilityStatus::from_success_rate(1.0, 10),
            ReliabilityStatus::Excellent
        );
        assert_eq!(
            ReliabilityStatus::from_success_rate(0.80, 10),
            ReliabilityStatus::Good
        );
        assert_eq!(
            ReliabilityStatus::from_success_rate(0.50, 10),
            ReliabilityStatus::Fair
        );
        assert_eq!(
            ReliabilityStatus::from_success_rate(0.49, 10),
            ReliabilityStatus::Poor
        );
        assert_eq!(
            ReliabilityStatus::from_success_rate(1.0, 0),
            ReliabilityStatus::Unknown
        );
    }

    #[test]
    fn entry_in_effect_respects_expiry() {
        let now = Utc::now();
        let mut entry = MachineBlacklistEntry {
            provider: "vast".into(),
            machine_id: "1".into(),
            entry_type: BlacklistType::Auto,
            total_attempts: 5,
            failed_attempts: 5,
            failure_rate: 1.0,
            last_failure_reason: None,
            created_at: now,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            active: true,
            reason: "auto".into(),
            gpu_name: None,
        };
        assert!(!entry.is_in_effect(now));

        entry.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(entry.is_in_effect(now));

        entry.expires_at = None;
        assert!(entry.is_in_effect(now));

        entry.active = false;
        assert!(!entry.is_in_effect(now));
    }
}
