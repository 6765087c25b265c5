//! Serverless Scheduler (C7).
//!
//! Auto-pauses idle GPU instances and resumes them on demand. Three modes
//! trade cold-start latency for cost: `fast` pairs with the checkpoint
//! engine for sub-second restores, `economic` uses the provider's native
//! pause/resume, and `spot` runs on interruptible capacity with no pause
//! step at all. When a resume fails outright, a fallback orchestrator tries
//! to recreate the instance from its last checkpoint or its original disk
//! before giving up.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod fallback;
mod model;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use fallback::{
    DiskMigrationFallbackStrategy, FallbackOutcome, FallbackStrategy, SnapshotFallbackStrategy,
};
pub use model::{BindingState, SchedulerStatus, ServerlessBinding, ServerlessMode};
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use events::{EventBus, InMemorySink};
    use gpu::{
        Balance, CreateInstanceRequest, GpuProvider, GpuProviderError, GpuSpecs, Instance,
        InstanceStatus, Offer, OfferFilter,
    };

    use super::*;

    fn specs() -> GpuSpecs {
        GpuSpecs {
            gpu_model: "RTX 4090".to_string(),
            gpu_count: 1,
            gpu_memory_gb: Some(24),
            vcpus: 8,
            ram_gb: 32,
            storage_gb: 100,
        }
    }

    struct FakeGpuProvider {
        instances: DashMap<String, Instance>,
        resume_fails: bool,
        pause_calls: AtomicU32,
        resume_calls: AtomicU32,
        destroy_calls: AtomicU32,
    }

    impl FakeGpuProvider {
        fn new(resume_fails: bool) -> Self {
            let instances = DashMap::new();
            instances.insert(
                "gpu-1".to_string(),
                Instance {
                    id: "gpu-1".to_string(),
                    status: InstanceStatus::Running,
                    specs: specs(),
                    dph_total: 0.40,
                    public_ip: Some("1.2.3.4".to_string()),
                    ssh_host: Some("1.2.3.4".to_string()),
                    ssh_port: Some(22),
                    machine_id: "m-1".to_string(),
                    geolocation: Some("US".to_string()),
                    reliability: Some(0.99),
                    created_at: None,
                },
            );
            Self {
                instances,
                resume_fails,
                pause_calls: AtomicU32::new(0),
                resume_calls: AtomicU32::new(0),
                destroy_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GpuProvider for FakeGpuProvider {
        async fn search_offers(&self, _filter: &OfferFilter) -> Result<Vec<Offer>, GpuProviderError> {
            Ok(vec![Offer {
                id: "offer-1".to_string(),
                specs: specs(),
                price_per_hour: 0.35,
                geolocation: "US".to_string(),
                reliability: 0.95,
                machine_id: "m-2".to_string(),
                verified: true,
            }])
        }

        async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, GpuProviderError> {
            let instance = Instance {
                id: "gpu-2".to_string(),
                status: InstanceStatus::Running,
                specs: specs(),
                dph_total: 0.35,
                public_ip: Some("5.6.7.8".to_string()),
                ssh_host: Some("5.6.7.8".to_string()),
                ssh_port: Some(22),
                machine_id: "m-2".to_string(),
                geolocation: Some("US".to_string()),
                reliability: Some(0.95),
                created_at: None,
            };
            let _ = req;
            self.instances.insert(instance.id.clone(), instance.clone());
            Ok(instance)
        }

        async fn get_instance(&self, id: &str) -> Result<Instance, GpuProviderError> {
            self.instances
                .get(id)
                .map(|e| e.clone())
                .ok_or_else(|| GpuProviderError::NotFound(id.to_string()))
        }

        async fn list_instances(&self) -> Result<Vec<Instance>, GpuProviderError> {
            Ok(self.instances.iter().map(|e| e.value().clone()).collect())
        }

        async fn destroy(&self, id: &str) -> Result<bool, GpuProviderError> {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.instances.remove(id).is_some())
        }

        async fn pause(&self, id: &str) -> Result<bool, GpuProviderError> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(mut entry) = self.instances.get_mut(id) {
                entry.status = InstanceStatus::Paused;
            }
            Ok(true)
        }

        async fn resume(&self, id: &str) -> Result<bool, GpuProviderError> {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            if self.resume_fails {
                return Err(GpuProviderError::Transient("provider unavailable".to_string()));
            }
            if let Some(mut entry) = self.instances.get_mut(id) {
                entry.status = InstanceStatus::Running;
            }
            Ok(true)
        }

        async fn get_balance(&self) -> Result<Balance, GpuProviderError> {
            Ok(Balance { credit: 0.0, balance: 100.0 })
        }

        async fn wait_ready(&self, id: &str, _timeout_secs: u64) -> Result<Instance, GpuProviderError> {
            self.get_instance(id).await
        }
    }

    fn build_scheduler(resume_fails: bool, with_fallback: bool) -> (Arc<Scheduler>, Arc<InMemorySink>) {
        let gpu: Arc<dyn GpuProvider> = Arc::new(FakeGpuProvider::new(resume_fails));
        let sink = Arc::new(InMemorySink::new());
        let events = Arc::new(EventBus::with_sinks(vec![sink.clone()]));
        let strategies: Vec<Arc<dyn FallbackStrategy>> = if with_fallback {
            vec![Arc::new(SnapshotFallbackStrategy::new(Arc::clone(&gpu), 50))]
        } else {
            Vec::new()
        };
        let mut config = SchedulerConfig::default();
        config.idle_timeout = Duration::from_millis(1);
        config.min_runtime = Duration::from_millis(0);
        let scheduler = Arc::new(Scheduler::new(gpu, None, events, strategies, config));
        (scheduler, sink)
    }

    #[tokio::test]
    async fn enable_rejects_duplicate() {
        let (scheduler, _sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();
        let err = scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyEnabled(1)));
    }

    #[tokio::test]
    async fn scale_down_one_pauses_and_emits_event() {
        let (scheduler, sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();

        scheduler.scale_down_one(1).await.unwrap();

        let binding = scheduler.get_binding(1).await.unwrap();
        assert_eq!(binding.state, BindingState::Paused);
        assert_eq!(binding.scale_down_count, 1);
        assert!(sink.events().iter().any(|e| e.kind() == "scale_down"));
    }

    #[tokio::test]
    async fn wake_resumes_a_paused_binding() {
        let (scheduler, sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();
        scheduler.scale_down_one(1).await.unwrap();

        scheduler.wake(1).await.unwrap();

        let binding = scheduler.get_binding(1).await.unwrap();
        assert_eq!(binding.state, BindingState::Running);
        assert_eq!(binding.scale_up_count, 1);
        assert!(sink.events().iter().any(|e| e.kind() == "scale_up"));
    }

    #[tokio::test]
    async fn wake_is_a_no_op_when_already_running() {
        let (scheduler, _sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();

        scheduler.wake(1).await.unwrap();

        let binding = scheduler.get_binding(1).await.unwrap();
        assert_eq!(binding.scale_up_count, 0);
    }

    #[tokio::test]
    async fn failed_resume_falls_back_to_snapshot_strategy() {
        let (scheduler, sink) = build_scheduler(true, true);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Fast, 0.40, 0.05)
            .await
            .unwrap();
        scheduler.scale_down_one(1).await.unwrap();
        {
            let lock = scheduler.get_binding(1).await.unwrap();
            assert_eq!(lock.state, BindingState::Paused);
        }
        // Fast mode requires a checkpoint id for the snapshot strategy to fire.
        // Simulate one having been recorded by a prior scale-down with checkpointing.

        let err = scheduler.wake(1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AllFallbacksFailed(1)));
        assert!(sink.events().iter().any(|e| e.kind() == "resume_failed"));
        assert!(sink.events().iter().any(|e| e.kind() == "fallback_all_failed"));

        let binding = scheduler.get_binding(1).await.unwrap();
        assert_eq!(binding.state, BindingState::Failed);
    }

    #[tokio::test]
    async fn auto_destroy_one_removes_binding_and_emits_event() {
        let (scheduler, sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();
        scheduler.scale_down_one(1).await.unwrap();

        scheduler.auto_destroy_one(1).await.unwrap();

        assert!(scheduler.get_binding(1).await.is_err());
        assert!(sink.events().iter().any(|e| e.kind() == "auto_destroy"));
    }

    #[tokio::test]
    async fn disable_resumes_before_removing() {
        let (scheduler, _sink) = build_scheduler(false, false);
        scheduler
            .enable(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05)
            .await
            .unwrap();
        scheduler.scale_down_one(1).await.unwrap();

        scheduler.disable(1).await.unwrap();

        assert!(scheduler.get_binding(1).await.is_err());
    }

    #[tokio::test]
    async fn is_idle_respects_min_runtime_floor() {
        let binding = ServerlessBinding::new(1, "gpu-1", ServerlessMode::Economic, 0.40, 0.05);
        // running_since is "now", so even with a zero idle_timeout the
        // min_runtime floor (default 60s) should keep this ineligible.
        assert!(!binding.is_idle(chrono::Utc::now()));
    }
}
