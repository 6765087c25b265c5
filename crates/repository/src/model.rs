//! Persisted aggregates for the repository layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lifecycle state of a serverless-managed instance. Mirrors
/// `scheduler::BindingState` but is defined independently here since the
/// repository layer has no dependency on the scheduler crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    Paused,
    Destroyed,
    Failed,
}

/// Fields required to create a [`UserRecord`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub provider_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub provider_api_key: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create an [`InstanceRecord`].
#[derive(Debug, Clone)]
pub struct NewInstanceRecord {
    pub fleet_instance_id: i64,
    pub user_id: String,
    pub gpu_instance_id: String,
    pub mode: String,
    pub gpu_name: String,
    pub hourly_cost: f64,
    pub scale_down_timeout_secs: u64,
    pub destroy_after_hours_paused: Option<f64>,
}

/// A persisted serverless-managed instance record, as `ServerlessRepo`
/// would store it in a relational schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub fleet_instance_id: i64,
    pub user_id: String,
    pub gpu_instance_id: String,
    pub mode: String,
    pub state: InstanceState,
    pub gpu_name: String,
    pub hourly_cost: f64,
    pub scale_down_timeout_secs: u64,
    pub destroy_after_hours_paused: Option<f64>,
    pub disk_id: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub total_runtime_seconds: f64,
    pub total_paused_seconds: f64,
    pub total_savings: f64,
    pub fallback_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single recorded GPU-creation attempt against `(provider, machine_id)`,
/// as `MachineHistoryRepo` would persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineAttemptRecord {
    pub provider: String,
    pub machine_id: String,
    pub success: bool,
    pub failing_stage: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
