//! Structured event types emitted by the fleet control plane.
//!
//! Every state transition and external call in the standby manager, the
//! serverless scheduler, and the machine history engine emits one of these
//! through an [`crate::EventSink`]. Tests replace the sink with
//! [`crate::InMemorySink`] and assert on the recorded sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity levels for events, used to pick a tracing level at the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations.
    Info,
    /// Warning - degraded but self-healing.
    Warning,
    /// Critical - requires operator attention.
    Critical,
}

impl Severity {
    /// Display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A fleet control-plane event.
///
/// Variant names mirror the `type` tag carried on the wire (`sync_ok`,
/// `sync_fail`, `scale_down`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A sync round between a GPU and its standby completed successfully.
    SyncOk {
        instance_id: i64,
        bytes_transferred: u64,
        duration_secs: f64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A sync round failed.
    SyncFail {
        instance_id: i64,
        reason: String,
        consecutive_failures: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The health-check loop gave up on the GPU and escalated to failover.
    Failover {
        instance_id: i64,
        standby_instance_id: i64,
        reason: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Recovery provisioned a replacement GPU and the association resumed.
    RecoveryOk {
        old_instance_id: i64,
        new_instance_id: i64,
        attempts: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// All recovery attempts were exhausted without success.
    RecoveryExhausted {
        instance_id: i64,
        attempts: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The scale-down loop paused an idle instance.
    ScaleDown {
        instance_id: i64,
        user_id: Option<String>,
        checkpointed: bool,
        estimated_hourly_savings: f64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// An instance resumed in response to an incoming request.
    ScaleUp {
        instance_id: i64,
        user_id: Option<String>,
        checkpoint_restored: bool,
        paused_secs: u64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A resume attempt failed; the fallback orchestrator took over.
    ResumeFailed {
        instance_id: i64,
        reason: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The snapshot fallback strategy produced a replacement instance.
    FallbackSnapshot {
        old_instance_id: i64,
        new_instance_id: i64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The disk-migration fallback strategy produced a replacement instance.
    FallbackDisk {
        old_instance_id: i64,
        new_instance_id: i64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Every configured fallback strategy failed; the user must be notified.
    FallbackAllFailed {
        instance_id: i64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The auto-destroy loop tore down an instance paused past its grace period.
    AutoDestroy {
        instance_id: i64,
        paused_hours: f64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A machine crossed the failure-rate threshold and was blacklisted.
    Blacklisted {
        provider: String,
        machine_id: String,
        failure_rate: f64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A GPU checkpoint was created.
    CheckpointCreated {
        instance_id: i64,
        checkpoint_id: String,
        size_bytes: u64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A GPU checkpoint was restored onto a (possibly new) instance.
    CheckpointRestored {
        instance_id: i64,
        checkpoint_id: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A user-initiated instance lifecycle action crossed the service boundary.
    InstanceLifecycle {
        instance_id: i64,
        action: String,
        #[serde(default)]
        detail: HashMap<String, String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Short tag identifying the event kind, matching the `type` field on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncOk { .. } => "sync_ok",
            Self::SyncFail { .. } => "sync_fail",
            Self::Failover { .. } => "failover",
            Self::RecoveryOk { .. } => "recovery_ok",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::ScaleDown { .. } => "scale_down",
            Self::ScaleUp { .. } => "scale_up",
            Self::ResumeFailed { .. } => "resume_failed",
            Self::FallbackSnapshot { .. } => "fallback_snapshot",
            Self::FallbackDisk { .. } => "fallback_disk",
            Self::FallbackAllFailed { .. } => "fallback_all_failed",
            Self::AutoDestroy { .. } => "auto_destroy",
            Self::Blacklisted { .. } => "blacklisted",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::CheckpointRestored { .. } => "checkpoint_restored",
            Self::InstanceLifecycle { .. } => "instance_lifecycle",
        }
    }

    /// Severity used to pick a tracing level at the sink.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::SyncOk { .. }
            | Self::RecoveryOk { .. }
            | Self::ScaleDown { .. }
            | Self::ScaleUp { .. }
            | Self::FallbackSnapshot { .. }
            | Self::FallbackDisk { .. }
            | Self::AutoDestroy { .. }
            | Self::CheckpointCreated { .. }
            | Self::CheckpointRestored { .. }
            | Self::InstanceLifecycle { .. } => Severity::Info,

            Self::SyncFail { .. } | Self::ResumeFailed { .. } | Self::Blacklisted { .. } => {
                Severity::Warning
            }

            Self::Failover { .. }
            | Self::RecoveryExhausted { .. }
            | Self::FallbackAllFailed { .. } => Severity::Critical,
        }
    }

    /// The primary instance this event concerns, when applicable.
    #[must_use]
    pub fn instance_id(&self) -> Option<i64> {
        match self {
            Self::SyncOk { instance_id, .. }
            | Self::SyncFail { instance_id, .. }
            | Self::Failover { instance_id, .. }
            | Self::ScaleDown { instance_id, .. }
            | Self::ScaleUp { instance_id, .. }
            | Self::ResumeFailed { instance_id, .. }
            | Self::AutoDestroy { instance_id, .. }
            | Self::CheckpointCreated { instance_id, .. }
            | Self::CheckpointRestored { instance_id, .. }
            | Self::RecoveryExhausted { instance_id, .. }
            | Self::FallbackAllFailed { instance_id, .. }
            | Self::InstanceLifecycle { instance_id, .. } => Some(*instance_id),

            Self::RecoveryOk {
                old_instance_id, ..
            }
            | Self::FallbackSnapshot {
                old_instance_id, ..
            }
            | Self::FallbackDisk {
                old_instance_id, ..
            } => Some(*old_instance_id),

            Self::Blacklisted { .. } => None,
        }
    }

    /// The timestamp this event was recorded at.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SyncOk { timestamp, .. }
            | Self::SyncFail { timestamp, .. }
            | Self::Failover { timestamp, .. }
            | Self::RecoveryOk { timestamp, .. }
            | Self::RecoveryExhausted { timestamp, .. }
            | Self::ScaleDown { timestamp, .. }
            | Self::ScaleUp { timestamp, .. }
            | Self::ResumeFailed { timestamp, .. }
            | Self::FallbackSnapshot { timestamp, .. }
            | Self::FallbackDisk { timestamp, .. }
            | Self::FallbackAllFailed { timestamp, .. }
            | Self::AutoDestroy { timestamp, .. }
            | Self::Blacklisted { timestamp, .. }
            | Self::CheckpointCreated { timestamp, .. }
            | Self::CheckpointRestored { timestamp, .. }
            | Self::InstanceLifecycle { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_wire_tag() {
        let event = FleetEvent::ScaleDown {
            instance_id: 7,
            user_id: None,
            checkpointed: false,
            estimated_hourly_savings: 0.0,
            timestamp: Utc::now(),
        };
        assert_eq!(event.kind(), "scale_down");
        assert_eq!(event.instance_id(), Some(7));
        assert_eq!(event.severity(), Severity::Info);
    }

    #[test]
    fn recovery_ok_reports_old_instance_id() {
        let event = FleetEvent::RecoveryOk {
            old_instance_id: 1,
            new_instance_id: 2,
            attempts: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(event.instance_id(), Some(1));
    }

    #[test]
    fn failover_is_critical() {
        let event = FleetEvent::Failover {
            instance_id: 1,
            standby_instance_id: 2,
            reason: "three consecutive health check failures".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Critical);
    }

    #[test]
    fn serde_round_trip_preserves_tag() {
        let event = FleetEvent::CheckpointCreated {
            instance_id: 9,
            checkpoint_id: "ckpt-abc".into(),
            size_bytes: 1024,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"checkpoint_created\""));
        let back: FleetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), event.kind());
    }
}
