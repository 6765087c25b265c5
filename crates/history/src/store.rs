//! The machine history store: append-only attempt log plus a derived
//! blacklist, keyed by `(provider, machine_id)`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::attempt::CreationAttempt;
use crate::blacklist::{
    BlacklistFilter, BlacklistType, MachineBlacklistEntry, OfferAnnotation, ReliabilityStatus,
};
use crate::error::HistoryError;

type MachineKey = (String, String);

/// Policy governing when a machine is auto-blacklisted and for how long.
#[derive(Debug, Clone)]
pub struct BlacklistPolicy {
    /// Minimum number of attempts before failure rate is trusted at all.
    pub min_attempts: u32,
    /// Failure rate at or above which a machine is auto-blacklisted.
    pub failure_rate_threshold: f64,
    /// How long an auto entry stays active before it needs to be refreshed.
    pub ttl: Duration,
}

impl Default for BlacklistPolicy {
    fn default() -> Self {
        Self {
            min_attempts: 3,
            failure_rate_threshold: 0.5,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Default)]
struct MachineStats {
    total_attempts: u32,
    failed_attempts: u32,
    last_failure_reason: Option<String>,
    last_gpu_name: Option<String>,
}

impl MachineStats {
    fn failure_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            f64::from(self.failed_attempts) / f64::from(self.total_attempts)
        }
    }

    fn success_rate(&self) -> f64 {
        1.0 - self.failure_rate()
    }
}

/// Machine History Store / Blacklist Engine (C2).
///
/// Writes are serialized per `(provider, machine_id)` via
/// [`DashMap`]'s shard locking; reads may observe eventual values across
/// different keys, which is acceptable per §4.2.
pub struct MachineHistoryStore {
    attempts: DashMap<MachineKey, Vec<CreationAttempt>>,
    stats: DashMap<MachineKey, MachineStats>,
    blacklist: DashMap<MachineKey, MachineBlacklistEntry>,
    policy: BlacklistPolicy,
}

impl MachineHistoryStore {
    /// Create a store with the default blacklist policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(BlacklistPolicy::default())
    }

    /// Create a store with a custom blacklist policy.
    #[must_use]
    pub fn with_policy(policy: BlacklistPolicy) -> Self {
        Self {
            attempts: DashMap::new(),
            stats: DashMap::new(),
            blacklist: DashMap::new(),
            policy,
        }
    }

    /// Append one creation attempt and refresh the derived blacklist entry
    /// if the failure rate now crosses the configured threshold.
    pub fn record_attempt(&self, attempt: CreationAttempt) {
        let key = (attempt.provider.clone(), attempt.machine_id.clone());

        let mut stats = self.stats.entry(key.clone()).or_default();
        stats.total_attempts += 1;
        if !attempt.success {
            stats.failed_attempts += 1;
            stats.last_failure_reason = attempt.failure_reason.clone();
        }
        if attempt.gpu_model.is_some() {
            stats.last_gpu_name = attempt.gpu_model.clone();
        }
        let (total, failed, rate, last_reason, gpu_name) = (
            stats.total_attempts,
            stats.failed_attempts,
            stats.failure_rate(),
            stats.last_failure_reason.clone(),
            stats.last_gpu_name.clone(),
        );
        drop(stats);

        self.attempts.entry(key.clone()).or_default().push(attempt);

        if total >= self.policy.min_attempts && rate >= self.policy.failure_rate_threshold {
            self.refresh_auto_entry(&key, total, failed, rate, last_reason, gpu_name);
        }
    }

    fn refresh_auto_entry(
        &self,
        key: &MachineKey,
        total_attempts: u32,
        failed_attempts: u32,
        failure_rate: f64,
        last_failure_reason: Option<String>,
        gpu_name: Option<String>,
    ) {
        let now = Utc::now();
        let expires_at = Some(now + chrono::Duration::from_std(self.policy.ttl).unwrap_or_default());

        warn!(
            provider = %key.0,
            machine_id = %key.1,
            failure_rate,
            total_attempts,
            "machine crossed failure threshold, blacklisting"
        );

        self.blacklist.insert(
            key.clone(),
            MachineBlacklistEntry {
                provider: key.0.clone(),
                machine_id: key.1.clone(),
                entry_type: BlacklistType::Auto,
                total_attempts,
                failed_attempts,
                failure_rate,
                last_failure_reason,
                created_at: now,
                expires_at,
                active: true,
                reason: format!(
                    "failure rate {failure_rate:.2} over {total_attempts} attempts exceeds threshold"
                ),
                gpu_name,
            },
        );
    }

    /// Whether `(provider, machine_id)` is currently blocked from reuse.
    #[must_use]
    pub fn is_blacklisted(&self, provider: &str, machine_id: &str) -> bool {
        let key = (provider.to_string(), machine_id.to_string());
        self.blacklist
            .get(&key)
            .is_some_and(|entry| entry.is_in_effect(Utc::now()))
    }

    /// Annotate a batch of `(provider, machine_id)` pairs in one pass.
    ///
    /// Read-only; does not mutate stats or the blacklist.
    #[must_use]
    pub fn annotate(&self, provider: &str, machine_ids: &[String]) -> Vec<OfferAnnotation> {
        let now = Utc::now();
        machine_ids
            .iter()
            .map(|machine_id| {
                let key = (provider.to_string(), machine_id.clone());
                let stats = self.stats.get(&key);
                let (success_rate, total_attempts) = match &stats {
                    Some(s) => (Some(s.success_rate()), s.total_attempts),
                    None => (None, 0),
                };
                let blacklist_entry = self.blacklist.get(&key);
                let is_blacklisted = blacklist_entry
                    .as_ref()
                    .is_some_and(|e| e.is_in_effect(now));
                let blacklist_reason = blacklist_entry
                    .as_ref()
                    .filter(|e| is_blacklisted)
                    .map(|e| e.reason.clone());

                OfferAnnotation {
                    machine_id: machine_id.clone(),
                    is_blacklisted,
                    blacklist_reason,
                    success_rate,
                    total_attempts,
                    reliability_status: ReliabilityStatus::from_success_rate(
                        success_rate.unwrap_or(0.0),
                        total_attempts,
                    ),
                }
            })
            .collect()
    }

    /// Add a manual (operator) blacklist entry.
    ///
    /// # Errors
    /// Returns [`HistoryError::MissingReason`] if `reason` is empty.
    pub fn add_manual(
        &self,
        provider: &str,
        machine_id: &str,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
        gpu_name: Option<String>,
    ) -> Result<(), HistoryError> {
        if reason.trim().is_empty() {
            return Err(HistoryError::MissingReason);
        }
        let key = (provider.to_string(), machine_id.to_string());
        let stats = self.stats.get(&key);
        let (total_attempts, failed_attempts, failure_rate) = stats
            .as_ref()
            .map(|s| (s.total_attempts, s.failed_attempts, s.failure_rate()))
            .unwrap_or((0, 0, 0.0));

        info!(provider, machine_id, "manual blacklist entry added");

        self.blacklist.insert(
            key,
            MachineBlacklistEntry {
                provider: provider.to_string(),
                machine_id: machine_id.to_string(),
                entry_type: BlacklistType::Manual,
                total_attempts,
                failed_attempts,
                failure_rate,
                last_failure_reason: None,
                created_at: Utc::now(),
                expires_at,
                active: true,
                reason,
                gpu_name,
            },
        );
        Ok(())
    }

    /// Remove a blacklist entry.
    ///
    /// Intentionally does not prevent the auto rule from re-adding the same
    /// machine on a subsequent failed attempt — see §4.2's edge-case policy.
    ///
    /// # Errors
    /// Returns [`HistoryError::NotFound`] if no entry exists for the key.
    pub fn remove(&self, provider: &str, machine_id: &str) -> Result<(), HistoryError> {
        let key = (provider.to_string(), machine_id.to_string());
        self.blacklist
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| HistoryError::NotFound {
                provider: provider.to_string(),
                machine_id: machine_id.to_string(),
            })
    }

    /// List blacklist entries matching a filter.
    ///
    /// Expired entries are retained for history but excluded when
    /// `active_only` is set.
    #[must_use]
    pub fn list(&self, filter: &BlacklistFilter) -> Vec<MachineBlacklistEntry> {
        let now = Utc::now();
        self.blacklist
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| {
                filter
                    .provider
                    .as_ref()
                    .is_none_or(|p| p == &e.provider)
            })
            .filter(|e| {
                filter
                    .entry_type
                    .is_none_or(|t| t == e.entry_type)
            })
            .filter(|e| !filter.active_only || e.is_in_effect(now))
            .collect()
    }

    /// Every recorded attempt for a `(provider, machine_id)` pair, oldest first.
    #[must_use]
    pub fn attempts_for(&self, provider: &str, machine_id: &str) -> Vec<CreationAttempt> {
        let key = (provider.to_string(), machine_id.to_string());
        self.attempts.get(&key).map(|v| v.clone()).unwrap_or_default()
    }

    /// Aggregate per-machine stats snapshot, for diagnostics/CLI use.
    #[must_use]
    pub fn stats_snapshot(&self) -> HashMap<(String, String), (u32, u32)> {
        self.stats
            .iter()
            .map(|e| (e.key().clone(), (e.value().total_attempts, e.value().failed_attempts)))
            .collect()
    }
}

impl Default for MachineHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::FailingStage;

    fn failed(provider: &str, machine: &str) -> CreationAttempt {
        CreationAttempt::failure(provider, machine, FailingStage::SshTimeout, "timed out")
    }

    #[test]
    fn five_failures_blacklist_the_machine() {
        let store = MachineHistoryStore::new();
        for _ in 0..5 {
            store.record_attempt(failed("vast", "12345"));
        }
        assert!(store.is_blacklisted("vast", "12345"));
        assert!(!store.is_blacklisted("vast", "67890"));
    }

    #[test]
    fn annotate_marks_blacklisted_and_unblacklisted_machines() {
        let store = MachineHistoryStore::new();
        for _ in 0..5 {
            store.record_attempt(failed("vast", "12345"));
        }
        let ids = vec!["12345".to_string(), "67890".to_string()];
        let annotations = store.annotate("vast", &ids);
        assert_eq!(annotations.len(), 2);
        assert!(annotations[0].is_blacklisted);
        assert!(!annotations[1].is_blacklisted);
        assert_eq!(annotations[1].total_attempts, 0);
        assert_eq!(
            annotations[1].reliability_status,
            ReliabilityStatus::Unknown
        );
    }

    #[test]
    fn annotate_is_idempotent() {
        let store = MachineHistoryStore::new();
        store.record_attempt(CreationAttempt::success("vast", "1"));
        let ids = vec!["1".to_string()];
        let first = store.annotate("vast", &ids);
        let second = store.annotate("vast", &ids);
        assert_eq!(first[0].success_rate, second[0].success_rate);
        assert_eq!(first[0].is_blacklisted, second[0].is_blacklisted);
    }

    #[test]
    fn manual_remove_then_auto_readd_is_intentional() {
        let store = MachineHistoryStore::new();
        for _ in 0..5 {
            store.record_attempt(failed("vast", "1"));
        }
        assert!(store.is_blacklisted("vast", "1"));
        store.remove("vast", "1").unwrap();
        assert!(!store.is_blacklisted("vast", "1"));

        store.record_attempt(failed("vast", "1"));
        assert!(store.is_blacklisted("vast", "1"));
    }

    #[test]
    fn manual_entry_requires_a_reason() {
        let store = MachineHistoryStore::new();
        let err = store
            .add_manual("vast", "1", String::new(), None, None)
            .unwrap_err();
        assert!(matches!(err, HistoryError::MissingReason));
    }

    #[test]
    fn list_filters_by_active_only() {
        let store = MachineHistoryStore::new();
        store
            .add_manual(
                "vast",
                "1",
                "bad host".into(),
                Some(Utc::now() - chrono::Duration::hours(1)),
                None,
            )
            .unwrap();
        let all = store.list(&BlacklistFilter::default());
        assert_eq!(all.len(), 1);

        let active = store.list(&BlacklistFilter {
            active_only: true,
            ..Default::default()
        });
        assert!(active.is_empty());
    }
}
