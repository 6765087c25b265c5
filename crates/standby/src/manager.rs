//! Standby Manager (C6) and its sync loop (C5).
//!
//! One [`StandbyManager`] owns every GPU/CPU pairing for the fleet.
//! Associations are keyed by `gpu_instance_id`; recovery rekeys an
//! association onto a replacement GPU's id once one is provisioned.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cpu::{CpuProvider, CreateInstanceRequest as CpuCreateRequest};
use dashmap::DashMap;
use events::{EventBus, FleetEvent};
use gpu::{CreateInstanceRequest as GpuCreateRequest, GpuProvider, OfferFilter};
use history::{CreationAttempt, FailingStage, MachineHistoryStore};
use region::Resolver;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StandbyConfig;
use crate::error::StandbyError;
use crate::model::{ActiveEndpoint, EndpointSource, FailureReason, PairState, StandbyAssociation, StandbyManagerStatus};
use crate::transport::SyncTransport;

struct LoopHandles {
    cancel: CancellationToken,
    sync: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    recovery: Option<JoinHandle<()>>,
}

impl LoopHandles {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            sync: None,
            health: None,
            recovery: None,
        }
    }

    fn cancel_all(&mut self) {
        self.cancel.cancel();
        for handle in [self.sync.take(), self.health.take(), self.recovery.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

/// Outcome of a single recovery attempt, for loop bookkeeping.
enum RecoveryOutcome {
    Recovered { new_gpu_id: String },
    NoOfferAvailable,
    Failed(String),
}

/// Owns every GPU/CPU standby pairing and the background loops that keep
/// them in sync, watch GPU health, and recover from failover.
pub struct StandbyManager {
    config: RwLock<Option<StandbyConfig>>,
    gpu: Arc<dyn GpuProvider>,
    cpu: Arc<dyn CpuProvider>,
    region: Arc<Resolver>,
    history: Arc<MachineHistoryStore>,
    events: Arc<EventBus>,
    transport: Arc<dyn SyncTransport>,
    gpu_provider_name: String,
    associations: DashMap<String, Arc<RwLock<StandbyAssociation>>>,
    loops: DashMap<String, LoopHandles>,
}

impl StandbyManager {
    #[must_use]
    pub fn new(
        gpu: Arc<dyn GpuProvider>,
        cpu: Arc<dyn CpuProvider>,
        region: Arc<Resolver>,
        history: Arc<MachineHistoryStore>,
        events: Arc<EventBus>,
        transport: Arc<dyn SyncTransport>,
        gpu_provider_name: impl Into<String>,
    ) -> Self {
        Self {
            config: RwLock::new(None),
            gpu,
            cpu,
            region,
            history,
            events,
            transport,
            gpu_provider_name: gpu_provider_name.into(),
            associations: DashMap::new(),
            loops: DashMap::new(),
        }
    }

    pub async fn configure(&self, config: StandbyConfig) {
        *self.config.write().await = Some(config);
    }

    pub async fn is_configured(&self) -> bool {
        self.config.read().await.is_some()
    }

    pub async fn is_auto_standby_enabled(&self) -> bool {
        self.config
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.auto_standby_enabled)
    }

    fn relay_dir(gpu_instance_id: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fleet-standby-{gpu_instance_id}"))
    }

    /// Called after a GPU instance enters `running`. Best-effort: a
    /// `Some(Err)` return should be logged and must never fail the GPU
    /// creation path that invoked it.
    ///
    /// # Errors
    /// Returns an error if the CPU VM could not be created or never became
    /// reachable. Returns `Ok(None)` if auto-standby is disabled.
    pub async fn on_gpu_created(
        self: &Arc<Self>,
        fleet_instance_id: i64,
        gpu_instance_id: &str,
    ) -> Result<Option<StandbyAssociation>, StandbyError> {
        let config = {
            let guard = self.config.read().await;
            match guard.as_ref() {
                Some(c) if c.auto_standby_enabled => c.clone(),
                _ => return Ok(None),
            }
        };

        if self.associations.contains_key(gpu_instance_id) {
            return Err(StandbyError::AlreadyExists(gpu_instance_id.to_string()));
        }

        let gpu_instance = self.gpu.get_instance(gpu_instance_id).await?;
        let zone = match &config.zone {
            Some(zone) => zone.clone(),
            None => {
                let region_hint = gpu_instance.geolocation.as_deref().unwrap_or("");
                self.region.resolve(region_hint, gpu_instance.public_ip.as_deref()).await.zone
            }
        };

        let name = format!(
            "standby-{}-{}",
            gpu_instance_id.chars().take(20).collect::<String>(),
            Utc::now().timestamp()
        );
        let name: String = name.chars().take(63).collect();

        let cpu_instance = self
            .cpu
            .create_instance(CpuCreateRequest {
                name: name.clone(),
                zone: zone.clone(),
                machine_type: config.machine_type.clone(),
                disk_size_gb: config.disk_gb,
                spot: true,
                labels: vec![
                    ("gpu-instance-id".to_string(), gpu_instance_id.to_string()),
                    ("managed-by".to_string(), "fleet-standby".to_string()),
                ],
                ssh_public_key: config.ssh_public_key.clone(),
                startup_script: None,
            })
            .await?;

        let mut association = StandbyAssociation::new(
            fleet_instance_id,
            gpu_instance_id.to_string(),
            cpu_instance.name.clone(),
            zone,
        );
        association.gpu_ssh_host = gpu_instance.ssh_host.clone();
        association.gpu_ssh_port = gpu_instance.ssh_port;

        let deadline = Utc::now() + chrono::Duration::seconds(config.ssh_ready_timeout.as_secs() as i64);
        let mut ready = false;
        loop {
            let refreshed = self
                .cpu
                .get_instance(&cpu_instance.name, &association.cpu_zone)
                .await?;
            if let Some(ip) = &refreshed.external_ip {
                if self.transport.probe(ip, 22, 10).await {
                    association.cpu_ssh_host = Some(ip.clone());
                    association.cpu_ssh_port = Some(22);
                    ready = true;
                    break;
                }
            }
            if Utc::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        if !ready {
            let _ = self.cpu.destroy(&cpu_instance.name, &association.cpu_zone).await;
            return Err(StandbyError::ShellTimeout(config.ssh_ready_timeout.as_secs()));
        }

        association.state = PairState::Ready;
        let association_lock = Arc::new(RwLock::new(association.clone()));
        self.associations.insert(gpu_instance_id.to_string(), association_lock);
        self.spawn_loops(gpu_instance_id.to_string(), config);

        info!(gpu_instance_id, cpu_instance = %cpu_instance.name, "standby pairing provisioned");
        Ok(Some(association))
    }

    /// Tear down the standby side of a pairing. Idempotent.
    ///
    /// # Errors
    /// Propagates a CPU provider error other than "not found".
    pub async fn on_gpu_destroyed(&self, gpu_instance_id: &str) -> Result<(), StandbyError> {
        let Some((_, association_lock)) = self.associations.remove(gpu_instance_id) else {
            return Ok(());
        };
        if let Some((_, mut handles)) = self.loops.remove(gpu_instance_id) {
            handles.cancel_all();
        }
        let (name, zone) = {
            let association = association_lock.read().await;
            (association.cpu_instance_name.clone(), association.cpu_zone.clone())
        };
        self.cpu.destroy(&name, &zone).await?;
        Ok(())
    }

    /// External signal that a GPU is down (e.g. reported by the instance
    /// service after a failed health probe of its own). Triggers the same
    /// failover path the internal health-check loop would.
    ///
    /// # Errors
    /// Returns [`StandbyError::NotFound`] if no association exists.
    pub async fn mark_gpu_failed(
        self: &Arc<Self>,
        gpu_instance_id: &str,
        reason: FailureReason,
    ) -> Result<(), StandbyError> {
        if !self.associations.contains_key(gpu_instance_id) {
            return Err(StandbyError::NotFound(gpu_instance_id.to_string()));
        }
        self.trigger_failover(gpu_instance_id, reason).await
    }

    /// Manually resume the sync loop for an association (it is on by
    /// default once a pairing reaches `Ready`).
    ///
    /// # Errors
    /// Returns [`StandbyError::NotFound`] if no association exists.
    pub async fn start_sync(&self, gpu_instance_id: &str) -> Result<(), StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?
            .clone();
        entry.write().await.sync_enabled = true;
        Ok(())
    }

    /// Manually pause the sync loop for an association without tearing
    /// down the health-check loop or the pairing itself.
    ///
    /// # Errors
    /// Returns [`StandbyError::NotFound`] if no association exists.
    pub async fn stop_sync(&self, gpu_instance_id: &str) -> Result<(), StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?
            .clone();
        entry.write().await.sync_enabled = false;
        Ok(())
    }

    pub async fn get_association(&self, gpu_instance_id: &str) -> Option<StandbyAssociation> {
        let entry = self.associations.get(gpu_instance_id)?;
        Some(entry.read().await.clone())
    }

    pub async fn list_associations(&self) -> Vec<StandbyAssociation> {
        let locks: Vec<_> = self
            .associations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut out = Vec::with_capacity(locks.len());
        for lock in locks {
            out.push(lock.read().await.clone());
        }
        out
    }

    pub async fn get_status(&self) -> StandbyManagerStatus {
        let configured = self.is_configured().await;
        let auto_standby_enabled = self.is_auto_standby_enabled().await;
        let associations = self.list_associations().await;
        StandbyManagerStatus {
            configured,
            auto_standby_enabled,
            association_count: associations.len(),
            failover_active_count: associations
                .iter()
                .filter(|a| a.state == PairState::FailoverActive)
                .count(),
            recovering_count: associations.iter().filter(|a| a.state == PairState::Recovering).count(),
        }
    }

    /// The host/port a caller should currently address for a GPU instance's
    /// workload: the GPU itself in steady state, or its CPU standby while
    /// failed over.
    ///
    /// # Errors
    /// Returns [`StandbyError::NotFound`] if no association exists.
    pub async fn get_active_endpoint(&self, gpu_instance_id: &str) -> Result<ActiveEndpoint, StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?;
        let association = entry.read().await.clone();
        drop(entry);

        match association.state {
            PairState::FailoverActive | PairState::Recovering => {
                let host = association
                    .cpu_ssh_host
                    .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?;
                Ok(ActiveEndpoint {
                    source: EndpointSource::Cpu,
                    host,
                    port: association.cpu_ssh_port.unwrap_or(22),
                })
            }
            _ => {
                let instance = self.gpu.get_instance(gpu_instance_id).await?;
                let host = instance
                    .ssh_host
                    .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?;
                Ok(ActiveEndpoint {
                    source: EndpointSource::Gpu,
                    host,
                    port: instance.ssh_port.unwrap_or(22),
                })
            }
        }
    }

    fn spawn_loops(self: &Arc<Self>, gpu_instance_id: String, config: StandbyConfig) {
        let mut handles = LoopHandles::new();
        let cancel = handles.cancel.clone();

        let sync_self = Arc::clone(self);
        let sync_id = gpu_instance_id.clone();
        let sync_cancel = cancel.clone();
        let sync_interval = config.sync_interval;
        handles.sync = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = sync_cancel.cancelled() => return,
                    () = tokio::time::sleep(sync_interval) => {}
                }
                let Some(lock) = sync_self.associations.get(&sync_id).map(|e| Arc::clone(e.value())) else {
                    return;
                };
                let enabled = lock.read().await.sync_enabled;
                if !enabled {
                    continue;
                }
                if let Err(err) = sync_self.sync_round(&sync_id).await {
                    warn!(gpu_instance_id = %sync_id, %err, "sync round failed");
                }
            }
        }));

        let health_self = Arc::clone(self);
        let health_id = gpu_instance_id.clone();
        let health_cancel = cancel.clone();
        let health_interval = config.health_check_interval;
        handles.health = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = health_cancel.cancelled() => return,
                    () = tokio::time::sleep(health_interval) => {}
                }
                if let Err(err) = health_self.health_check(&health_id).await {
                    warn!(gpu_instance_id = %health_id, %err, "health check failed");
                }
            }
        }));

        self.loops.insert(gpu_instance_id, handles);
    }

    /// Run a single sync round: pull the GPU workspace into the local
    /// relay directory, then push it up to the CPU standby.
    ///
    /// # Errors
    /// Returns an error if the association is missing or either leg fails.
    pub async fn sync_round(&self, gpu_instance_id: &str) -> Result<(), StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?
            .clone();
        let config = self
            .config
            .read()
            .await
            .clone()
            .ok_or(StandbyError::NotConfigured)?;

        let (gpu_host, gpu_port, cpu_host, cpu_port) = {
            let association = entry.read().await;
            (
                association.gpu_ssh_host.clone(),
                association.gpu_ssh_port,
                association.cpu_ssh_host.clone(),
                association.cpu_ssh_port,
            )
        };
        let (Some(gpu_host), Some(cpu_host)) = (gpu_host, cpu_host) else {
            return Err(StandbyError::Transport("association missing ssh coordinates".into()));
        };

        let relay = Self::relay_dir(gpu_instance_id);
        tokio::fs::create_dir_all(&relay)
            .await
            .map_err(|e| StandbyError::Transport(e.to_string()))?;

        let result = async {
            let pull = self
                .transport
                .pull(
                    &gpu_host,
                    gpu_port.unwrap_or(22),
                    &config.sync_source_path,
                    &relay,
                    &config.sync_exclude,
                    config.sync_interval.as_secs().max(30),
                )
                .await?;
            let push = self
                .transport
                .push(
                    &cpu_host,
                    cpu_port.unwrap_or(22),
                    &relay,
                    &config.sync_source_path,
                    &config.sync_exclude,
                    config.sync_interval.as_secs().max(30),
                )
                .await?;
            Ok::<u64, StandbyError>(pull.bytes_transferred + push.bytes_transferred)
        }
        .await;

        let mut association = entry.write().await;
        match result {
            Ok(bytes) => {
                association.sync_count += 1;
                association.last_sync_at = Some(Utc::now());
                association.last_sync_bytes = bytes;
                association.consecutive_sync_failures = 0;
                if association.state == PairState::Ready {
                    association.state = PairState::Syncing;
                }
                let fleet_instance_id = association.fleet_instance_id;
                drop(association);
                self.events
                    .record(FleetEvent::SyncOk {
                        instance_id: fleet_instance_id,
                        bytes_transferred: bytes,
                        duration_secs: 0.0,
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(())
            }
            Err(err) => {
                association.consecutive_sync_failures += 1;
                let failures = association.consecutive_sync_failures;
                let fleet_instance_id = association.fleet_instance_id;
                drop(association);
                if failures >= 3 {
                    self.events
                        .record(FleetEvent::SyncFail {
                            instance_id: fleet_instance_id,
                            reason: err.to_string(),
                            consecutive_failures: failures,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                Err(err)
            }
        }
    }

    /// Run a single health probe against the GPU side of an association,
    /// escalating to failover once the threshold is crossed.
    ///
    /// # Errors
    /// Returns an error if the association is missing or configuration is
    /// unavailable; a probe failure itself is not an error, it is counted.
    pub async fn health_check(self: &Arc<Self>, gpu_instance_id: &str) -> Result<(), StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?
            .clone();
        let config = self
            .config
            .read()
            .await
            .clone()
            .ok_or(StandbyError::NotConfigured)?;

        let healthy = matches!(
            self.gpu.get_instance(gpu_instance_id).await,
            Ok(instance) if instance.status == gpu::InstanceStatus::Running
        );

        let should_failover = {
            let mut association = entry.write().await;
            if healthy {
                association.failed_health_checks = 0;
                false
            } else {
                association.failed_health_checks += 1;
                association.failed_health_checks >= config.failover_threshold && config.auto_failover
            }
        };

        if should_failover {
            self.trigger_failover(gpu_instance_id, FailureReason::HealthCheckTimeout).await?;
        }
        Ok(())
    }

    /// Stop sync/health loops, mark an association failed over, and (if
    /// configured) kick off the recovery loop.
    async fn trigger_failover(self: &Arc<Self>, gpu_instance_id: &str, reason: FailureReason) -> Result<(), StandbyError> {
        let entry = self
            .associations
            .get(gpu_instance_id)
            .ok_or_else(|| StandbyError::NotFound(gpu_instance_id.to_string()))?
            .clone();

        if let Some(mut handles) = self.loops.get_mut(gpu_instance_id) {
            handles.cancel_all();
        }

        let (fleet_instance_id, cpu_name) = {
            let mut association = entry.write().await;
            association.state = PairState::FailoverActive;
            association.gpu_failed = true;
            association.failure_reason = Some(reason.clone());
            (association.fleet_instance_id, association.cpu_instance_name.clone())
        };

        warn!(gpu_instance_id, %reason, "gpu failover triggered");
        self.events
            .record(FleetEvent::Failover {
                instance_id: fleet_instance_id,
                standby_instance_id: fleet_instance_id,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        let _ = cpu_name;

        let config = self.config.read().await.clone();
        if let Some(config) = config {
            if config.auto_recovery {
                self.spawn_recovery_loop(gpu_instance_id.to_string(), config);
            }
        }
        Ok(())
    }

    fn spawn_recovery_loop(self: &Arc<Self>, gpu_instance_id: String, config: StandbyConfig) {
        let manager = Arc::clone(self);
        let cancel = CancellationToken::new();
        if let Some(mut handles) = self.loops.get_mut(&gpu_instance_id) {
            handles.cancel = cancel.clone();
        } else {
            let mut handles = LoopHandles::new();
            handles.cancel = cancel.clone();
            self.loops.insert(gpu_instance_id.clone(), handles);
        }

        let handle = tokio::spawn(async move {
            if let Some(entry) = manager.associations.get(&gpu_instance_id) {
                entry.write().await.state = PairState::Recovering;
            }

            let mut excluded_machine_ids = Vec::new();
            let mut attempts = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                attempts += 1;
                match manager.run_recovery_attempt(&gpu_instance_id, &config, &excluded_machine_ids).await {
                    RecoveryOutcome::Recovered { new_gpu_id } => {
                        manager.finish_recovery(&gpu_instance_id, new_gpu_id, attempts, &config).await;
                        return;
                    }
                    RecoveryOutcome::Failed(machine_id) if !machine_id.is_empty() => {
                        excluded_machine_ids.push(machine_id);
                    }
                    RecoveryOutcome::NoOfferAvailable | RecoveryOutcome::Failed(_) => {}
                }

                if attempts >= config.recovery_max_attempts {
                    manager.exhaust_recovery(&gpu_instance_id, attempts).await;
                    return;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(config.recovery_retry_delay) => {}
                }
            }
        });

        if let Some(mut handles) = self.loops.get_mut(&gpu_instance_id) {
            handles.recovery = Some(handle);
        }
    }

    /// Search for, create, and warm up one replacement GPU instance.
    async fn run_recovery_attempt(
        &self,
        old_gpu_instance_id: &str,
        config: &StandbyConfig,
        excluded_machine_ids: &[String],
    ) -> RecoveryOutcome {
        let filter = OfferFilter {
            min_gpu_ram_gb: Some(config.recovery.min_gpu_ram_gb),
            max_price_per_hour: Some(config.recovery.max_price_per_hour),
            ..Default::default()
        };
        let offers = match self.gpu.search_offers(&filter).await {
            Ok(offers) => offers,
            Err(err) => return RecoveryOutcome::Failed(err.to_string()),
        };

        let best = offers
            .into_iter()
            .filter(|o| !excluded_machine_ids.contains(&o.machine_id))
            .filter(|o| !self.history.is_blacklisted(&self.gpu_provider_name, &o.machine_id))
            .min_by(|a, b| {
                let score_a = self.region_rank(&config.recovery.preferred_regions, &a.geolocation);
                let score_b = self.region_rank(&config.recovery.preferred_regions, &b.geolocation);
                score_a
                    .cmp(&score_b)
                    .then(a.price_per_hour.total_cmp(&b.price_per_hour))
            });

        let Some(offer) = best else {
            return RecoveryOutcome::NoOfferAvailable;
        };

        let attempt_started = Utc::now();
        let create_result = self
            .gpu
            .create_instance(GpuCreateRequest {
                offer_id: offer.id.clone(),
                image: "pytorch/pytorch:latest".to_string(),
                disk_gb: config.disk_gb,
                label: Some(format!("recovery-of-{old_gpu_instance_id}")),
                ports: vec![],
                onstart: None,
            })
            .await;

        let new_instance = match create_result {
            Ok(instance) => instance,
            Err(err) => {
                self.history.record_attempt(CreationAttempt::failure(
                    &self.gpu_provider_name,
                    &offer.machine_id,
                    FailingStage::ApiError,
                    err.to_string(),
                ));
                return RecoveryOutcome::Failed(offer.machine_id);
            }
        };

        match self
            .gpu
            .wait_ready(&new_instance.id, config.recovery_attempt_timeout.as_secs())
            .await
        {
            Ok(ready) => {
                self.history.record_attempt(CreationAttempt {
                    time_to_ready_secs: Some((Utc::now() - attempt_started).num_milliseconds() as f64 / 1000.0),
                    instance_id: Some(ready.id.clone()),
                    ..CreationAttempt::success(&self.gpu_provider_name, &offer.machine_id)
                });
                RecoveryOutcome::Recovered { new_gpu_id: ready.id }
            }
            Err(err) => {
                let _ = self.gpu.destroy(&new_instance.id).await;
                self.history.record_attempt(CreationAttempt::failure(
                    &self.gpu_provider_name,
                    &offer.machine_id,
                    FailingStage::SshTimeout,
                    err.to_string(),
                ));
                RecoveryOutcome::Failed(offer.machine_id)
            }
        }
    }

    fn region_rank(&self, preferred: &[String], geolocation: &str) -> usize {
        preferred
            .iter()
            .position(|region| geolocation.contains(region.as_str()))
            .unwrap_or(preferred.len())
    }

    async fn finish_recovery(
        self: &Arc<Self>,
        old_gpu_instance_id: &str,
        new_gpu_id: String,
        attempts: u32,
        config: &StandbyConfig,
    ) {
        let Some((_, association_lock)) = self.associations.remove(old_gpu_instance_id) else {
            return;
        };

        let new_instance = match self.gpu.get_instance(&new_gpu_id).await {
            Ok(instance) => instance,
            Err(err) => {
                warn!(%new_gpu_id, %err, "could not re-fetch recovered instance");
                return;
            }
        };

        let (fleet_instance_id, cpu_host, cpu_port) = {
            let mut association = association_lock.write().await;
            association.gpu_instance_id = new_gpu_id.clone();
            association.gpu_ssh_host = new_instance.ssh_host.clone();
            association.gpu_ssh_port = new_instance.ssh_port;
            association.gpu_failed = false;
            association.failure_reason = None;
            association.failed_health_checks = 0;
            association.recovery_attempts += attempts;
            association.state = PairState::Syncing;
            (
                association.fleet_instance_id,
                association.cpu_ssh_host.clone(),
                association.cpu_ssh_port,
            )
        };

        if let (Some(gpu_host), Some(gpu_port), Some(cpu_host)) =
            (new_instance.ssh_host.clone(), new_instance.ssh_port, cpu_host)
        {
            let relay = Self::relay_dir(old_gpu_instance_id);
            if tokio::fs::create_dir_all(&relay).await.is_ok() {
                let restore = self
                    .transport
                    .pull(
                        &cpu_host,
                        cpu_port.unwrap_or(22),
                        &config.sync_source_path,
                        &relay,
                        &config.sync_exclude,
                        config.recovery_attempt_timeout.as_secs(),
                    )
                    .await;
                if restore.is_ok() {
                    let _ = self
                        .transport
                        .push(
                            &gpu_host,
                            gpu_port,
                            &relay,
                            &config.sync_source_path,
                            &config.sync_exclude,
                            config.recovery_attempt_timeout.as_secs(),
                        )
                        .await;
                }
            }
        }

        self.associations.insert(new_gpu_id.clone(), association_lock);
        if let Some(mut handles) = self.loops.remove(old_gpu_instance_id).map(|(_, h)| h) {
            handles.cancel_all();
        }
        self.spawn_loops(new_gpu_id.clone(), config.clone());

        info!(old_gpu_instance_id, new_gpu_id, attempts, "recovery succeeded");
        self.events
            .record(FleetEvent::RecoveryOk {
                old_instance_id: fleet_instance_id,
                new_instance_id: fleet_instance_id,
                attempts,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn exhaust_recovery(&self, gpu_instance_id: &str, attempts: u32) {
        let fleet_instance_id = self
            .associations
            .get(gpu_instance_id)
            .map(|e| e.value().clone());
        if let Some(lock) = fleet_instance_id {
            let mut association = lock.write().await;
            // Permanent recovery failure leaves the CPU standby as the sole
            // endpoint rather than marking the pairing inert; `Error` would
            // fall through `get_active_endpoint` to the dead GPU.
            association.state = PairState::FailoverActive;
            warn!(gpu_instance_id, attempts, "recovery exhausted");
            self.events
                .record(FleetEvent::RecoveryExhausted {
                    instance_id: association.fleet_instance_id,
                    attempts,
                    timestamp: Utc::now(),
                })
                .await;
        }
    }
}
