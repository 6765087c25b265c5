//! Serverless Scheduler (C7): idle-based auto-pause/resume with
//! checkpoint-accelerated wake and fallback migration on resume failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use events::{EventBus, FleetEvent};
use gpu::GpuProvider;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use checkpoint::CheckpointEngine;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::fallback::{run_fallback, FallbackStrategy};
use crate::model::{BindingState, SchedulerStatus, ServerlessBinding, ServerlessMode};

struct LoopHandles {
    cancel: CancellationToken,
    scale_down: JoinHandle<()>,
    auto_destroy: JoinHandle<()>,
}

impl LoopHandles {
    fn cancel_all(self) {
        self.cancel.cancel();
        self.scale_down.abort();
        self.auto_destroy.abort();
    }
}

/// Owns every serverless binding and the two background loops that drive
/// scale-down and auto-destroy. Scale-up happens synchronously, in
/// response to [`Scheduler::on_request_start`]/[`Scheduler::wake`].
pub struct Scheduler {
    gpu: Arc<dyn GpuProvider>,
    checkpoint: Option<Arc<CheckpointEngine>>,
    events: Arc<EventBus>,
    fallback_strategies: Vec<Arc<dyn FallbackStrategy>>,
    config: SchedulerConfig,
    bindings: DashMap<i64, Arc<RwLock<ServerlessBinding>>>,
    loops: Mutex<Option<LoopHandles>>,
    running: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        gpu: Arc<dyn GpuProvider>,
        checkpoint: Option<Arc<CheckpointEngine>>,
        events: Arc<EventBus>,
        fallback_strategies: Vec<Arc<dyn FallbackStrategy>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gpu,
            checkpoint,
            events,
            fallback_strategies,
            config,
            bindings: DashMap::new(),
            loops: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Start the background scale-down and auto-destroy loops. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();

        let scale_down = {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let tick = this.config.scale_down_tick;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            this.scale_down_tick().await;
                        }
                    }
                }
            })
        };

        let auto_destroy = {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let tick = this.config.auto_destroy_tick;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            this.auto_destroy_tick().await;
                        }
                    }
                }
            })
        };

        *loops = Some(LoopHandles {
            cancel,
            scale_down,
            auto_destroy,
        });
    }

    /// Stop the background loops. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handles) = self.loops.lock().await.take() {
            handles.cancel_all();
        }
    }

    /// Whether the background loops are currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enable serverless management for a fleet instance already running
    /// on the provider.
    pub async fn enable(
        &self,
        fleet_instance_id: i64,
        gpu_instance_id: impl Into<String>,
        mode: ServerlessMode,
        gpu_rate_per_hour: f64,
        idle_rate_per_hour: f64,
    ) -> Result<ServerlessBinding, SchedulerError> {
        if self.bindings.contains_key(&fleet_instance_id) {
            return Err(SchedulerError::AlreadyEnabled(fleet_instance_id));
        }
        let mut binding = ServerlessBinding::new(
            fleet_instance_id,
            gpu_instance_id,
            mode,
            gpu_rate_per_hour,
            idle_rate_per_hour,
        );
        binding.idle_timeout = self.config.idle_timeout;
        binding.gpu_threshold = self.config.gpu_threshold;
        binding.min_runtime = self.config.min_runtime;
        binding.scale_down_timeout = self.config.scale_down_timeout;
        binding.ssh_verify_timeout = self.config.ssh_verify_timeout;
        binding.destroy_after_hours_paused = self.config.destroy_after_hours_paused;

        self.bindings
            .insert(fleet_instance_id, Arc::new(RwLock::new(binding.clone())));
        info!(fleet_instance_id, mode = %binding.mode, "serverless enabled");
        Ok(binding)
    }

    /// Disable serverless management. Resumes first if currently paused.
    pub async fn disable(&self, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let is_paused = {
            let lock = self.binding_lock(fleet_instance_id)?;
            let guard = lock.read().await;
            guard.state == BindingState::Paused
        };
        if is_paused {
            self.wake(fleet_instance_id).await?;
        }
        self.bindings.remove(&fleet_instance_id);
        info!(fleet_instance_id, "serverless disabled");
        Ok(())
    }

    pub async fn update_gpu_utilization(
        &self,
        fleet_instance_id: i64,
        gpu_util: f64,
    ) -> Result<(), SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;
        let mut binding = lock.write().await;
        binding.last_gpu_util = gpu_util;
        if gpu_util >= binding.gpu_threshold {
            binding.idle_since = None;
            binding.last_request = Some(Utc::now());
        } else if binding.idle_since.is_none() {
            binding.idle_since = Some(Utc::now());
        }
        Ok(())
    }

    /// Called when a request arrives for this instance: resets the idle
    /// timer, waking it first if it is currently paused.
    pub async fn on_request_start(self: &Arc<Self>, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let needs_wake = {
            let lock = self.binding_lock(fleet_instance_id)?;
            let mut binding = lock.write().await;
            binding.last_request = Some(Utc::now());
            binding.idle_since = None;
            binding.state == BindingState::Paused
        };
        if needs_wake {
            self.wake(fleet_instance_id).await?;
        }
        Ok(())
    }

    /// Called when a request finishes: starts the idle clock if not already running.
    pub async fn on_request_end(&self, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;
        let mut binding = lock.write().await;
        if binding.idle_since.is_none() {
            binding.idle_since = Some(Utc::now());
        }
        Ok(())
    }

    pub async fn get_binding(&self, fleet_instance_id: i64) -> Result<ServerlessBinding, SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;
        Ok(lock.read().await.clone())
    }

    pub async fn list_all(&self) -> Vec<ServerlessBinding> {
        let locks: Vec<_> = self.bindings.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::with_capacity(locks.len());
        for lock in locks {
            out.push(lock.read().await.clone());
        }
        out
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        let bindings = self.list_all().await;
        let running_count = bindings.iter().filter(|b| b.state == BindingState::Running).count() as u32;
        let paused_count = bindings.iter().filter(|b| b.state == BindingState::Paused).count() as u32;
        SchedulerStatus {
            binding_count: bindings.len() as u32,
            running_count,
            paused_count,
        }
    }

    fn binding_lock(&self, fleet_instance_id: i64) -> Result<Arc<RwLock<ServerlessBinding>>, SchedulerError> {
        self.bindings
            .get(&fleet_instance_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SchedulerError::NotFound(fleet_instance_id))
    }

    /// Evaluate every running binding and scale down the idle ones. Exposed
    /// standalone so tests can drive one round without waiting on the
    /// background loop's real-time tick.
    pub async fn scale_down_tick(&self) {
        let now = Utc::now();
        let candidates: Vec<i64> = self.bindings.iter().map(|e| *e.key()).collect();

        for fleet_instance_id in candidates {
            let Ok(lock) = self.binding_lock(fleet_instance_id) else {
                continue;
            };
            let idle = {
                let guard = lock.read().await;
                guard.is_idle(now)
            };
            if idle {
                if let Err(err) = self.scale_down_one(fleet_instance_id).await {
                    warn!(fleet_instance_id, error = %err, "scale-down attempt failed");
                }
            }
        }
    }

    /// Scale down a single binding immediately, regardless of idle state.
    /// Standalone testable unit; the scale-down loop calls this once it has
    /// decided a binding is idle.
    pub async fn scale_down_one(&self, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;
        let mut binding = lock.write().await;
        if binding.state != BindingState::Running {
            return Ok(());
        }

        let mut checkpointed = false;
        if binding.mode == ServerlessMode::Fast && binding.checkpoint_enabled {
            if let Some(engine) = &self.checkpoint {
                match self.gpu.get_instance(&binding.gpu_instance_id).await {
                    Ok(instance) => {
                        if let (Some(host), Some(port)) = (instance.ssh_host, instance.ssh_port) {
                            match engine.create_checkpoint(&binding.gpu_instance_id, &host, port, None).await {
                                Ok(cp) => {
                                    self.events
                                        .record(FleetEvent::CheckpointCreated {
                                            instance_id: fleet_instance_id,
                                            checkpoint_id: cp.checkpoint_id.clone(),
                                            size_bytes: cp.size_bytes,
                                            timestamp: Utc::now(),
                                        })
                                        .await;
                                    binding.last_checkpoint_id = Some(cp.checkpoint_id);
                                    checkpointed = true;
                                }
                                Err(err) => {
                                    warn!(fleet_instance_id, error = %err, "pre-pause checkpoint failed, pausing anyway");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(fleet_instance_id, error = %err, "could not fetch instance for pre-pause checkpoint");
                    }
                }
            }
        }

        self.gpu.pause(&binding.gpu_instance_id).await?;

        let now = Utc::now();
        binding.total_runtime_seconds += binding.runtime_since_start(now).as_secs_f64();
        binding.state = BindingState::Paused;
        binding.paused_at = Some(now);
        binding.scale_down_count += 1;

        let savings_rate = (binding.gpu_rate_per_hour - binding.idle_rate_per_hour).max(0.0);
        self.events
            .record(FleetEvent::ScaleDown {
                instance_id: fleet_instance_id,
                user_id: None,
                checkpointed,
                estimated_hourly_savings: savings_rate,
                timestamp: now,
            })
            .await;
        info!(fleet_instance_id, checkpointed, "instance scaled down");
        Ok(())
    }

    /// Resume a paused binding, retrying via the fallback orchestrator if
    /// the provider-native resume fails or the shell never comes up. A
    /// second call while a wake is already in flight is a no-op: the
    /// `Waking` state itself is the per-instance guard.
    pub async fn wake(self: &Arc<Self>, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;

        {
            let mut binding = lock.write().await;
            match binding.state {
                BindingState::Running => return Ok(()),
                BindingState::Waking => return Ok(()),
                BindingState::Paused => binding.state = BindingState::Waking,
                BindingState::Destroyed | BindingState::Failed => {
                    return Err(SchedulerError::NotPaused(fleet_instance_id))
                }
            }
        }

        let snapshot = { lock.read().await.clone() };
        let resumed = self.try_resume(&snapshot).await;

        match resumed {
            Ok(instance) => {
                let paused_secs = snapshot
                    .paused_at
                    .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
                    .unwrap_or(0);

                let mut checkpoint_restored = false;
                if snapshot.mode == ServerlessMode::Fast {
                    if let (Some(engine), Some(checkpoint_id)) = (&self.checkpoint, &snapshot.last_checkpoint_id) {
                        if let (Some(host), Some(port)) = (instance.ssh_host.clone(), instance.ssh_port) {
                            let cp = checkpoint::Checkpoint {
                                checkpoint_id: checkpoint_id.clone(),
                                instance_id: snapshot.gpu_instance_id.clone(),
                                created_at: Utc::now(),
                                size_bytes: 0,
                                process_name: String::new(),
                                vram_used_gb: 0.0,
                                driver_major: None,
                            };
                            match engine.restore_checkpoint(&cp, &host, port).await {
                                Ok(_) => {
                                    checkpoint_restored = true;
                                    self.events
                                        .record(FleetEvent::CheckpointRestored {
                                            instance_id: fleet_instance_id,
                                            checkpoint_id: checkpoint_id.clone(),
                                            timestamp: Utc::now(),
                                        })
                                        .await;
                                }
                                Err(err) => {
                                    warn!(fleet_instance_id, error = %err, "checkpoint restore failed, resuming cold");
                                }
                            }
                        }
                    }
                }

                let mut binding = lock.write().await;
                let savings_rate = (binding.gpu_rate_per_hour - binding.idle_rate_per_hour).max(0.0);
                binding.total_paused_seconds += paused_secs as f64;
                binding.total_savings += savings_rate * (paused_secs as f64 / 3600.0);
                binding.state = BindingState::Running;
                binding.running_since = Utc::now();
                binding.idle_since = None;
                binding.last_request = Some(Utc::now());
                binding.paused_at = None;
                binding.scale_up_count += 1;

                self.events
                    .record(FleetEvent::ScaleUp {
                        instance_id: fleet_instance_id,
                        user_id: None,
                        checkpoint_restored,
                        paused_secs,
                        timestamp: Utc::now(),
                    })
                    .await;
                info!(fleet_instance_id, paused_secs, "instance woke up");
                Ok(())
            }
            Err(resume_err) => {
                warn!(fleet_instance_id, error = %resume_err, "resume failed, trying fallback");
                self.events
                    .record(FleetEvent::ResumeFailed {
                        instance_id: fleet_instance_id,
                        reason: resume_err.to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;

                match run_fallback(&self.fallback_strategies, &snapshot, self.config.fallback_max_price_per_hour).await
                {
                    Ok(outcome) => {
                        let old_gpu_instance_id = { lock.read().await.gpu_instance_id.clone() };
                        if let Err(err) = self.gpu.destroy(&old_gpu_instance_id).await {
                            warn!(fleet_instance_id, error = %err, "failed to destroy old instance after fallback");
                        }

                        let mut binding = lock.write().await;
                        binding.gpu_instance_id = outcome.new_gpu_instance_id;
                        binding.state = BindingState::Running;
                        binding.running_since = Utc::now();
                        binding.idle_since = None;
                        binding.paused_at = None;
                        binding.fallback_count += 1;

                        let event = if outcome.strategy == "snapshot" {
                            FleetEvent::FallbackSnapshot {
                                old_instance_id: fleet_instance_id,
                                new_instance_id: fleet_instance_id,
                                timestamp: Utc::now(),
                            }
                        } else {
                            FleetEvent::FallbackDisk {
                                old_instance_id: fleet_instance_id,
                                new_instance_id: fleet_instance_id,
                                timestamp: Utc::now(),
                            }
                        };
                        self.events.record(event).await;
                        info!(fleet_instance_id, strategy = outcome.strategy, "fallback recreated instance");
                        Ok(())
                    }
                    Err(fallback_err) => {
                        let mut binding = lock.write().await;
                        binding.state = BindingState::Failed;
                        self.events
                            .record(FleetEvent::FallbackAllFailed {
                                instance_id: fleet_instance_id,
                                timestamp: Utc::now(),
                            })
                            .await;
                        warn!(fleet_instance_id, "every fallback strategy failed");
                        Err(fallback_err)
                    }
                }
            }
        }
    }

    async fn try_resume(&self, binding: &ServerlessBinding) -> Result<gpu::Instance, SchedulerError> {
        self.gpu.resume(&binding.gpu_instance_id).await?;
        let instance = self
            .gpu
            .wait_ready(&binding.gpu_instance_id, binding.ssh_verify_timeout.as_secs())
            .await
            .map_err(|_| SchedulerError::ShellTimeout(binding.ssh_verify_timeout.as_secs()))?;
        Ok(instance)
    }

    /// Destroy every paused binding whose grace period has elapsed.
    /// Standalone testable unit; the auto-destroy loop calls this on a timer.
    pub async fn auto_destroy_tick(&self) {
        let now = Utc::now();
        let candidates: Vec<i64> = self.bindings.iter().map(|e| *e.key()).collect();
        for fleet_instance_id in candidates {
            let Ok(lock) = self.binding_lock(fleet_instance_id) else {
                continue;
            };
            let should_destroy = {
                let guard = lock.read().await;
                match (guard.state, guard.destroy_after_hours_paused, guard.paused_at) {
                    (BindingState::Paused, Some(hours), Some(paused_at)) => {
                        let elapsed_hours = (now - paused_at).num_seconds() as f64 / 3600.0;
                        elapsed_hours >= hours
                    }
                    _ => false,
                }
            };
            if should_destroy {
                if let Err(err) = self.auto_destroy_one(fleet_instance_id).await {
                    warn!(fleet_instance_id, error = %err, "auto-destroy failed");
                }
            }
        }
    }

    /// Destroy a single paused binding immediately, regardless of grace period.
    pub async fn auto_destroy_one(&self, fleet_instance_id: i64) -> Result<(), SchedulerError> {
        let lock = self.binding_lock(fleet_instance_id)?;
        let paused_hours = {
            let guard = lock.read().await;
            guard
                .paused_at
                .map(|t| (Utc::now() - t).num_seconds() as f64 / 3600.0)
                .unwrap_or(0.0)
        };
        let gpu_instance_id = { lock.read().await.gpu_instance_id.clone() };

        self.gpu.destroy(&gpu_instance_id).await?;

        {
            let mut binding = lock.write().await;
            binding.state = BindingState::Destroyed;
        }
        self.bindings.remove(&fleet_instance_id);

        self.events
            .record(FleetEvent::AutoDestroy {
                instance_id: fleet_instance_id,
                paused_hours,
                timestamp: Utc::now(),
            })
            .await;
        info!(fleet_instance_id, paused_hours, "instance auto-destroyed");
        Ok(())
    }
}
