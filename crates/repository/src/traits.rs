//! Per-aggregate repository interfaces (C11).
//!
//! Each trait covers CRUD plus the specific aggregate queries its owning
//! component requires. A future `sqlx`-backed implementation satisfies the
//! same traits as [`crate::memory::InMemoryRepository`]; no caller holds a
//! session across a component boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::model::{InstanceRecord, InstanceState, MachineAttemptRecord, NewInstanceRecord, NewUser, UserRecord};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepositoryError>;
    async fn get(&self, id: &str) -> Result<UserRecord, RepositoryError>;
    async fn get_by_email(&self, email: &str) -> Result<UserRecord, RepositoryError>;
    async fn update(&self, user: UserRecord) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ServerlessRepo: Send + Sync {
    async fn create_instance(&self, record: NewInstanceRecord) -> Result<InstanceRecord, RepositoryError>;
    async fn get_instance(&self, fleet_instance_id: i64) -> Result<InstanceRecord, RepositoryError>;
    async fn update_instance(&self, record: InstanceRecord) -> Result<(), RepositoryError>;
    async fn update_instance_state(
        &self,
        fleet_instance_id: i64,
        state: InstanceState,
    ) -> Result<(), RepositoryError>;
    async fn delete_instance(&self, fleet_instance_id: i64) -> Result<(), RepositoryError>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<InstanceRecord>, RepositoryError>;

    /// Instances paused long enough to be eligible for auto-destroy.
    async fn instances_to_destroy(&self, now: DateTime<Utc>) -> Result<Vec<InstanceRecord>, RepositoryError>;

    /// Running instances whose idle window has elapsed, candidates for scale-down.
    async fn instances_to_scale_down(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Vec<InstanceRecord>, RepositoryError>;
}

#[async_trait]
pub trait MachineHistoryRepo: Send + Sync {
    async fn record_attempt(&self, attempt: MachineAttemptRecord) -> Result<(), RepositoryError>;
    async fn list_attempts(
        &self,
        provider: &str,
        machine_id: &str,
    ) -> Result<Vec<MachineAttemptRecord>, RepositoryError>;

    /// Failure rate over attempts recorded since `since`, in `[0, 1]`.
    /// Returns `0.0` if no attempts were recorded in the window.
    async fn failure_rate(
        &self,
        provider: &str,
        machine_id: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, RepositoryError>;
}
