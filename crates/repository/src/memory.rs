//! In-memory implementation of the repository traits, suitable for a
//! single control-plane process and for tests. Guarded by `dashmap`,
//! since every aggregate here is keyed and independent keys are mutated
//! concurrently; a future `sqlx`-backed implementation would instead open
//! one transaction per operation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::model::{
    InstanceRecord, InstanceState, MachineAttemptRecord, NewInstanceRecord, NewUser, UserRecord,
};
use crate::traits::{MachineHistoryRepo, ServerlessRepo, UserRepo};

/// In-memory backing store for every repository trait in this crate.
#[derive(Default)]
pub struct InMemoryRepository {
    users_by_id: DashMap<String, UserRecord>,
    users_by_email: DashMap<String, String>,
    instances: DashMap<i64, InstanceRecord>,
    attempts: DashMap<(String, String), RwLock<Vec<MachineAttemptRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for InMemoryRepository {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepositoryError> {
        if self.users_by_email.contains_key(&user.email) {
            return Err(RepositoryError::Conflict {
                kind: "user",
                id: user.email,
            });
        }
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: user.email.clone(),
            password_hash: user.password_hash,
            provider_api_key: user.provider_api_key,
            settings: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        };
        self.users_by_email.insert(user.email, record.id.clone());
        self.users_by_id.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<UserRecord, RepositoryError> {
        self.users_by_id
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "user",
                id: id.to_string(),
            })
    }

    async fn get_by_email(&self, email: &str) -> Result<UserRecord, RepositoryError> {
        let id = self
            .users_by_email
            .get(email)
            .map(|e| e.clone())
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "user",
                id: email.to_string(),
            })?;
        self.get(&id).await
    }

    async fn update(&self, user: UserRecord) -> Result<(), RepositoryError> {
        if !self.users_by_id.contains_key(&user.id) {
            return Err(RepositoryError::NotFound {
                kind: "user",
                id: user.id,
            });
        }
        self.users_by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let Some((_, record)) = self.users_by_id.remove(id) else {
            return Err(RepositoryError::NotFound {
                kind: "user",
                id: id.to_string(),
            });
        };
        self.users_by_email.remove(&record.email);
        Ok(())
    }
}

#[async_trait]
impl ServerlessRepo for InMemoryRepository {
    async fn create_instance(&self, record: NewInstanceRecord) -> Result<InstanceRecord, RepositoryError> {
        if self.instances.contains_key(&record.fleet_instance_id) {
            return Err(RepositoryError::Conflict {
                kind: "instance",
                id: record.fleet_instance_id.to_string(),
            });
        }
        let now = Utc::now();
        let stored = InstanceRecord {
            fleet_instance_id: record.fleet_instance_id,
            user_id: record.user_id,
            gpu_instance_id: record.gpu_instance_id,
            mode: record.mode,
            state: InstanceState::Running,
            gpu_name: record.gpu_name,
            hourly_cost: record.hourly_cost,
            scale_down_timeout_secs: record.scale_down_timeout_secs,
            destroy_after_hours_paused: record.destroy_after_hours_paused,
            disk_id: None,
            paused_at: None,
            total_runtime_seconds: 0.0,
            total_paused_seconds: 0.0,
            total_savings: 0.0,
            fallback_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.instances.insert(stored.fleet_instance_id, stored.clone());
        Ok(stored)
    }

    async fn get_instance(&self, fleet_instance_id: i64) -> Result<InstanceRecord, RepositoryError> {
        self.instances
            .get(&fleet_instance_id)
            .map(|e| e.clone())
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "instance",
                id: fleet_instance_id.to_string(),
            })
    }

    async fn update_instance(&self, mut record: InstanceRecord) -> Result<(), RepositoryError> {
        if !self.instances.contains_key(&record.fleet_instance_id) {
            return Err(RepositoryError::NotFound {
                kind: "instance",
                id: record.fleet_instance_id.to_string(),
            });
        }
        record.updated_at = Utc::now();
        self.instances.insert(record.fleet_instance_id, record);
        Ok(())
    }

    async fn update_instance_state(
        &self,
        fleet_instance_id: i64,
        state: InstanceState,
    ) -> Result<(), RepositoryError> {
        let mut entry = self
            .instances
            .get_mut(&fleet_instance_id)
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "instance",
                id: fleet_instance_id.to_string(),
            })?;
        entry.state = state;
        if state == InstanceState::Paused {
            entry.paused_at = Some(Utc::now());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_instance(&self, fleet_instance_id: i64) -> Result<(), RepositoryError> {
        self.instances
            .remove(&fleet_instance_id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "instance",
                id: fleet_instance_id.to_string(),
            })
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<InstanceRecord>, RepositoryError> {
        Ok(self
            .instances
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn instances_to_destroy(&self, now: DateTime<Utc>) -> Result<Vec<InstanceRecord>, RepositoryError> {
        Ok(self
            .instances
            .iter()
            .filter(|e| {
                let record = e.value();
                match (record.state, record.destroy_after_hours_paused, record.paused_at) {
                    (InstanceState::Paused, Some(hours), Some(paused_at)) => {
                        (now - paused_at).num_seconds() as f64 / 3600.0 >= hours
                    }
                    _ => false,
                }
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn instances_to_scale_down(
        &self,
        _now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Vec<InstanceRecord>, RepositoryError> {
        Ok(self
            .instances
            .iter()
            .filter(|e| e.value().state == InstanceState::Running && e.value().updated_at < idle_cutoff)
            .map(|e| e.value().clone())
            .collect())
    }
}

#[async_trait]
impl MachineHistoryRepo for InMemoryRepository {
    async fn record_attempt(&self, attempt: MachineAttemptRecord) -> Result<(), RepositoryError> {
        let key = (attempt.provider.clone(), attempt.machine_id.clone());
        let entry = self.attempts.entry(key).or_insert_with(|| RwLock::new(Vec::new()));
        entry.write().await.push(attempt);
        Ok(())
    }

    async fn list_attempts(
        &self,
        provider: &str,
        machine_id: &str,
    ) -> Result<Vec<MachineAttemptRecord>, RepositoryError> {
        let key = (provider.to_string(), machine_id.to_string());
        match self.attempts.get(&key) {
            Some(lock) => Ok(lock.read().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn failure_rate(
        &self,
        provider: &str,
        machine_id: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, RepositoryError> {
        let attempts = self.list_attempts(provider, machine_id).await?;
        let recent: Vec<_> = attempts.iter().filter(|a| a.recorded_at >= since).collect();
        if recent.is_empty() {
            return Ok(0.0);
        }
        let failures = recent.iter().filter(|a| !a.success).count();
        Ok(failures as f64 / recent.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewUser;

    #[tokio::test]
    async fn create_user_rejects_duplicate_email() {
        let repo = InMemoryRepository::new();
        repo.create(NewUser {
            email: "a@example.com".to_string(),
            password_hash: "hash".to_string(),
            provider_api_key: None,
        })
        .await
        .unwrap();

        let err = repo
            .create(NewUser {
                email: "a@example.com".to_string(),
                password_hash: "hash2".to_string(),
                provider_api_key: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn get_by_email_resolves_through_index() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create(NewUser {
                email: "b@example.com".to_string(),
                password_hash: "hash".to_string(),
                provider_api_key: None,
            })
            .await
            .unwrap();

        let fetched = repo.get_by_email("b@example.com").await.unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[tokio::test]
    async fn instances_to_destroy_filters_by_grace_period() {
        let repo = InMemoryRepository::new();
        let record = repo
            .create_instance(NewInstanceRecord {
                fleet_instance_id: 1,
                user_id: "u1".to_string(),
                gpu_instance_id: "gpu-1".to_string(),
                mode: "economic".to_string(),
                gpu_name: "RTX 4090".to_string(),
                hourly_cost: 0.4,
                scale_down_timeout_secs: 60,
                destroy_after_hours_paused: Some(1.0),
            })
            .await
            .unwrap();

        // Not paused yet: not a candidate.
        assert!(repo.instances_to_destroy(Utc::now()).await.unwrap().is_empty());

        let mut paused = record;
        paused.state = InstanceState::Paused;
        paused.paused_at = Some(Utc::now() - chrono::Duration::hours(2));
        repo.update_instance(paused).await.unwrap();

        let due = repo.instances_to_destroy(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].fleet_instance_id, 1);
    }

    #[tokio::test]
    async fn failure_rate_ignores_attempts_outside_window() {
        let repo = InMemoryRepository::new();
        let old = Utc::now() - chrono::Duration::days(2);
        repo.record_attempt(MachineAttemptRecord {
            provider: "vast".to_string(),
            machine_id: "m1".to_string(),
            success: false,
            failing_stage: Some("ssh".to_string()),
            recorded_at: old,
        })
        .await
        .unwrap();
        repo.record_attempt(MachineAttemptRecord {
            provider: "vast".to_string(),
            machine_id: "m1".to_string(),
            success: true,
            failing_stage: None,
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();

        let rate = repo
            .failure_rate("vast", "m1", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rate, 0.0);
    }
}
