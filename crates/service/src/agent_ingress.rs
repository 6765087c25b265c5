//! Agent Ingress (C10): accepts periodic heartbeats from in-guest agents.
//!
//! Grounded on `examples/original_source/src/api/v1/endpoints/agent.py`:
//! the field extraction (`vast_`-prefixed instance ids, `gpu_metrics`
//! falling back to the legacy flat `gpu_utilization` field) and the
//! two-manager fan-out (a hibernation decision tree, independent of and
//! best-effort relative to the serverless scheduler's own utilization
//! tracking) follow that handler's `receive_agent_status` directly. The
//! original keeps the hibernation decision in a manager distinct from both
//! the standby and serverless managers (`AutoHibernationManager`); this
//! crate keeps that separation as [`HibernationTracker`] rather than
//! folding idle-time bookkeeping into [`standby::StandbyManager`], which
//! owns failover state, not idle timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-GPU metrics carried on a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub utilization: f64,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    #[serde(default)]
    pub gpu_names: Vec<String>,
    #[serde(default)]
    pub gpu_utilizations: Vec<f64>,
    #[serde(default)]
    pub gpu_memory_used: Vec<u64>,
    #[serde(default)]
    pub gpu_memory_total: Vec<u64>,
    #[serde(default)]
    pub gpu_temperatures: Vec<f64>,
}

const fn default_gpu_count() -> u32 {
    1
}

/// Inbound heartbeat from an in-guest agent, per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    #[serde(default = "default_agent_name")]
    pub agent: String,
    pub version: String,
    pub instance_id: String,
    pub status: String,
    pub message: Option<String>,
    pub last_backup: Option<String>,
    pub timestamp: String,
    pub uptime: Option<String>,
    pub gpu_metrics: Option<GpuMetrics>,
    /// Legacy field from the shell-only agent, used when `gpu_metrics` is absent.
    pub gpu_utilization: Option<f64>,
}

fn default_agent_name() -> String {
    "fleet-agent".to_string()
}

/// Action requested of the agent in response to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatAction {
    None,
    PrepareHibernate,
    Shutdown,
}

/// Response to an agent heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub received: bool,
    pub instance_id: String,
    pub action: HeartbeatAction,
    pub message: String,
}

struct IdleState {
    idle_since: Option<DateTime<Utc>>,
}

/// Tracks per-instance idle time to decide when an instance should
/// hibernate, independent of the serverless scheduler's own idle clock
/// (which drives pause/resume for opted-in bindings, not agent-reported
/// hibernation readiness).
struct HibernationTracker {
    state: DashMap<String, IdleState>,
    gpu_threshold: f64,
    hibernate_after: Duration,
}

impl HibernationTracker {
    fn new(gpu_threshold: f64, hibernate_after: Duration) -> Self {
        Self {
            state: DashMap::new(),
            gpu_threshold,
            hibernate_after,
        }
    }

    /// Strict less-than on the threshold keeps the idle clock running at
    /// exactly the boundary, matching the convention recorded for the
    /// scheduler's own idle predicate (see DESIGN.md).
    fn update(&self, instance_id: &str, gpu_utilization: f64, now: DateTime<Utc>) -> (bool, u64) {
        if gpu_utilization < self.gpu_threshold {
            let mut entry = self
                .state
                .entry(instance_id.to_string())
                .or_insert_with(|| IdleState { idle_since: None });
            let idle_since = *entry.idle_since.get_or_insert(now);
            let elapsed = (now - idle_since).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.hibernate_after {
                (true, 0)
            } else {
                (false, (self.hibernate_after - elapsed).as_secs())
            }
        } else {
            self.state.remove(instance_id);
            (false, 0)
        }
    }
}

/// Accepts agent heartbeats and feeds the hibernation decision and the
/// serverless scheduler's utilization tracking.
pub struct AgentIngress {
    scheduler: Option<Arc<Scheduler>>,
    tracker: HibernationTracker,
}

impl AgentIngress {
    #[must_use]
    pub fn new(scheduler: Option<Arc<Scheduler>>, gpu_threshold: f64, hibernate_after: Duration) -> Self {
        Self {
            scheduler,
            tracker: HibernationTracker::new(gpu_threshold, hibernate_after),
        }
    }

    /// Process one heartbeat. Stateless aside from the hibernation tracker
    /// and whatever the scheduler itself records; never fails the agent's
    /// request (§4.10: "the ingress path is stateless ... best-effort").
    pub async fn receive_status(&self, heartbeat: AgentHeartbeat) -> HeartbeatResponse {
        let instance_id = heartbeat
            .instance_id
            .strip_prefix("vast_")
            .map(str::to_string)
            .unwrap_or(heartbeat.instance_id.clone());

        let gpu_utilization = heartbeat
            .gpu_metrics
            .as_ref()
            .map(|m| m.utilization)
            .or(heartbeat.gpu_utilization)
            .unwrap_or(0.0);

        debug!(
            instance_id = %instance_id,
            status = %heartbeat.status,
            gpu_utilization,
            "agent heartbeat"
        );

        let (should_hibernate, seconds_until_hibernate) =
            self.tracker.update(&instance_id, gpu_utilization, Utc::now());

        if let Some(scheduler) = &self.scheduler {
            if let Ok(fleet_instance_id) = instance_id.parse::<i64>() {
                if let Err(e) = scheduler
                    .update_gpu_utilization(fleet_instance_id, gpu_utilization)
                    .await
                {
                    debug!(error = %e, instance_id = %instance_id, "could not update scheduler utilization");
                }
            } else {
                warn!(instance_id = %instance_id, "heartbeat instance id is not numeric, scheduler not updated");
            }
        }

        if should_hibernate {
            return HeartbeatResponse {
                received: true,
                instance_id,
                action: HeartbeatAction::PrepareHibernate,
                message: format!("instance will hibernate in {seconds_until_hibernate}s"),
            };
        }

        HeartbeatResponse {
            received: true,
            instance_id,
            action: HeartbeatAction::None,
            message: "status received".to_string(),
        }
    }
}
