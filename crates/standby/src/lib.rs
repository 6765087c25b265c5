//! Standby Manager (C6) and Sync Loop (C5).
//!
//! Pairs every auto-standby-enabled GPU instance with a warm CPU VM,
//! keeps the GPU's workspace mirrored onto it on an interval, watches the
//! GPU's health, and fails traffic over to the CPU side when the GPU
//! stops responding. A bounded recovery loop then looks for a replacement
//! GPU offer, restores the workspace onto it, and resumes normal sync.
//!
//! ## Example
//!
//! ```ignore
//! use standby::{StandbyConfig, StandbyManager};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(StandbyManager::new(
//!     gpu_provider, cpu_provider, region_resolver, history_store, event_bus,
//!     sync_transport, "vast",
//! ));
//! manager.configure(StandbyConfig::default()).await;
//! manager.on_gpu_created(42, "gpu-123").await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod manager;
mod model;
pub mod transport;

pub use config::{RecoveryFilters, StandbyConfig};
pub use error::StandbyError;
pub use manager::StandbyManager;
pub use model::{
    ActiveEndpoint, EndpointSource, FailureReason, PairState, StandbyAssociation,
    StandbyManagerStatus,
};
pub use transport::{RsyncTransport, SyncOutcome, SyncTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Leg, ScriptedTransport};
    use async_trait::async_trait;
    use chrono::Utc;
    use cpu::{CpuProvider, CpuProviderError, CpuSpecs, CreateInstanceRequest as CpuCreateRequest, Instance as CpuInstance, InstanceStatus as CpuStatus};
    use events::{EventBus, InMemorySink};
    use gpu::{
        Balance, CreateInstanceRequest as GpuCreateRequest, GpuProvider, GpuProviderError, GpuSpecs,
        Instance as GpuInstance, InstanceStatus as GpuStatus, Offer, OfferFilter,
    };
    use history::MachineHistoryStore;
    use region::Resolver;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeGpuProvider {
        instances: dashmap::DashMap<String, GpuInstance>,
        health_calls: AtomicU32,
        always_healthy: bool,
    }

    impl FakeGpuProvider {
        fn with_instance(id: &str, healthy: bool) -> Self {
            let provider = Self {
                instances: dashmap::DashMap::new(),
                health_calls: AtomicU32::new(0),
                always_healthy: healthy,
            };
            provider.instances.insert(
                id.to_string(),
                GpuInstance {
                    id: id.to_string(),
                    status: GpuStatus::Running,
                    specs: GpuSpecs {
                        gpu_model: "RTX 4090".into(),
                        gpu_count: 1,
                        gpu_memory_gb: Some(24),
                        vcpus: 8,
                        ram_gb: 32,
                        storage_gb: 100,
                    },
                    dph_total: 0.3,
                    public_ip: Some("1.2.3.4".into()),
                    ssh_host: Some("1.2.3.4".into()),
                    ssh_port: Some(22),
                    machine_id: "m-1".into(),
                    geolocation: Some("Bangkok, TH".into()),
                    reliability: Some(0.9),
                    created_at: Some(Utc::now()),
                },
            );
            provider
        }
    }

    #[async_trait]
    impl GpuProvider for FakeGpuProvider {
        async fn search_offers(&self, _filter: &OfferFilter) -> Result<Vec<Offer>, GpuProviderError> {
            Ok(vec![Offer {
                id: "offer-1".into(),
                specs: GpuSpecs {
                    gpu_model: "RTX 4090".into(),
                    gpu_count: 1,
                    gpu_memory_gb: Some(24),
                    vcpus: 8,
                    ram_gb: 32,
                    storage_gb: 100,
                },
                price_per_hour: 0.3,
                geolocation: "Bangkok, TH".into(),
                reliability: 0.9,
                machine_id: "m-2".into(),
                verified: true,
            }])
        }

        async fn create_instance(&self, req: GpuCreateRequest) -> Result<GpuInstance, GpuProviderError> {
            let instance = GpuInstance {
                id: "gpu-recovered".into(),
                status: GpuStatus::Running,
                specs: GpuSpecs {
                    gpu_model: "RTX 4090".into(),
                    gpu_count: 1,
                    gpu_memory_gb: Some(24),
                    vcpus: 8,
                    ram_gb: 32,
                    storage_gb: 100,
                },
                dph_total: 0.3,
                public_ip: Some("5.6.7.8".into()),
                ssh_host: Some("5.6.7.8".into()),
                ssh_port: Some(22),
                machine_id: "m-2".into(),
                geolocation: Some("Bangkok, TH".into()),
                reliability: Some(0.9),
                created_at: Some(Utc::now()),
            };
            let _ = req;
            self.instances.insert(instance.id.clone(), instance.clone());
            Ok(instance)
        }

        async fn get_instance(&self, id: &str) -> Result<GpuInstance, GpuProviderError> {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            self.instances
                .get(id)
                .map(|i| i.clone())
                .ok_or_else(|| GpuProviderError::NotFound(id.to_string()))
                .map(|mut i| {
                    if !self.always_healthy {
                        i.status = GpuStatus::Exited;
                    }
                    i
                })
        }

        async fn list_instances(&self) -> Result<Vec<GpuInstance>, GpuProviderError> {
            Ok(self.instances.iter().map(|e| e.value().clone()).collect())
        }

        async fn destroy(&self, id: &str) -> Result<bool, GpuProviderError> {
            Ok(self.instances.remove(id).is_some())
        }

        async fn pause(&self, _id: &str) -> Result<bool, GpuProviderError> {
            Ok(true)
        }

        async fn resume(&self, _id: &str) -> Result<bool, GpuProviderError> {
            Ok(true)
        }

        async fn get_balance(&self) -> Result<Balance, GpuProviderError> {
            Ok(Balance { credit: 0.0, balance: 100.0 })
        }

        async fn wait_ready(&self, id: &str, _timeout_secs: u64) -> Result<GpuInstance, GpuProviderError> {
            self.get_instance(id).await
        }
    }

    struct FakeCpuProvider;

    #[async_trait]
    impl CpuProvider for FakeCpuProvider {
        async fn create_instance(&self, req: CpuCreateRequest) -> Result<CpuInstance, CpuProviderError> {
            Ok(CpuInstance {
                id: "cpu-1".into(),
                name: req.name,
                zone: req.zone,
                status: CpuStatus::Running,
                specs: CpuSpecs {
                    machine_type: "e2-medium".into(),
                    vcpus: 2,
                    ram_gb: 4,
                    disk_gb: 100,
                },
                external_ip: Some("9.9.9.9".into()),
                internal_ip: None,
                spot: true,
                created_at: Some(Utc::now()),
            })
        }

        async fn get_instance(&self, name: &str, zone: &str) -> Result<CpuInstance, CpuProviderError> {
            Ok(CpuInstance {
                id: "cpu-1".into(),
                name: name.to_string(),
                zone: zone.to_string(),
                status: CpuStatus::Running,
                specs: CpuSpecs {
                    machine_type: "e2-medium".into(),
                    vcpus: 2,
                    ram_gb: 4,
                    disk_gb: 100,
                },
                external_ip: Some("9.9.9.9".into()),
                internal_ip: None,
                spot: true,
                created_at: Some(Utc::now()),
            })
        }

        async fn list_instances(&self, _zone: Option<&str>) -> Result<Vec<CpuInstance>, CpuProviderError> {
            Ok(vec![])
        }

        async fn start(&self, _name: &str, _zone: &str) -> Result<(), CpuProviderError> {
            Ok(())
        }

        async fn stop(&self, _name: &str, _zone: &str) -> Result<(), CpuProviderError> {
            Ok(())
        }

        async fn destroy(&self, _name: &str, _zone: &str) -> Result<bool, CpuProviderError> {
            Ok(true)
        }
    }

    fn build_manager(
        gpu_healthy: bool,
        legs: Vec<Leg>,
    ) -> (Arc<StandbyManager>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let events = Arc::new(EventBus::with_sinks(vec![sink.clone()]));
        let manager = Arc::new(StandbyManager::new(
            Arc::new(FakeGpuProvider::with_instance("gpu-1", gpu_healthy)),
            Arc::new(FakeCpuProvider),
            Arc::new(Resolver::new()),
            Arc::new(MachineHistoryStore::new()),
            events,
            Arc::new(ScriptedTransport::new(legs)),
            "vast",
        ));
        (manager, sink)
    }

    #[tokio::test]
    async fn disabled_auto_standby_is_a_no_op() {
        let (manager, _sink) = build_manager(true, vec![]);
        manager.configure(StandbyConfig { auto_standby_enabled: false, ..Default::default() }).await;
        let result = manager.on_gpu_created(1, "gpu-1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn on_gpu_created_provisions_and_reaches_ready() {
        let (manager, _sink) = build_manager(true, vec![]);
        manager
            .configure(StandbyConfig {
                auto_standby_enabled: true,
                ssh_ready_timeout: Duration::from_secs(5),
                ..Default::default()
            })
            .await;
        let association = manager.on_gpu_created(1, "gpu-1").await.unwrap().unwrap();
        assert_eq!(association.state, PairState::Ready);
        assert!(!association.cpu_zone.is_empty());
        assert!(manager.get_association("gpu-1").await.is_some());
    }

    #[tokio::test]
    async fn second_create_for_same_gpu_is_rejected() {
        let (manager, _sink) = build_manager(true, vec![]);
        manager
            .configure(StandbyConfig { auto_standby_enabled: true, ..Default::default() })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        let err = manager.on_gpu_created(1, "gpu-1").await.unwrap_err();
        assert!(matches!(err, StandbyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn sync_round_updates_counters_on_success() {
        let (manager, sink) = build_manager(true, vec![Leg::Ok(100), Leg::Ok(50)]);
        manager
            .configure(StandbyConfig { auto_standby_enabled: true, ..Default::default() })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        manager.sync_round("gpu-1").await.unwrap();
        let association = manager.get_association("gpu-1").await.unwrap();
        assert_eq!(association.sync_count, 1);
        assert_eq!(association.last_sync_bytes, 150);
        assert_eq!(association.state, PairState::Syncing);
        assert!(sink.events().iter().any(|e| e.kind() == "sync_ok"));
    }

    #[tokio::test]
    async fn three_consecutive_sync_failures_emit_sync_fail() {
        let (manager, sink) = build_manager(
            true,
            vec![
                Leg::Fail("boom".into()),
                Leg::Fail("boom".into()),
                Leg::Fail("boom".into()),
            ],
        );
        manager
            .configure(StandbyConfig { auto_standby_enabled: true, ..Default::default() })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        for _ in 0..3 {
            let _ = manager.sync_round("gpu-1").await;
        }
        assert!(sink.events().iter().any(|e| e.kind() == "sync_fail"));
    }

    #[tokio::test]
    async fn stop_sync_pauses_without_tearing_down_association() {
        let (manager, _sink) = build_manager(true, vec![Leg::Ok(100), Leg::Ok(50)]);
        manager
            .configure(StandbyConfig { auto_standby_enabled: true, ..Default::default() })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        manager.stop_sync("gpu-1").await.unwrap();
        assert!(!manager.get_association("gpu-1").await.unwrap().sync_enabled);
        manager.start_sync("gpu-1").await.unwrap();
        let association = manager.get_association("gpu-1").await.unwrap();
        assert!(association.sync_enabled);
        assert_eq!(association.state, PairState::Ready);
    }

    #[tokio::test]
    async fn stop_sync_on_missing_association_errors() {
        let (manager, _sink) = build_manager(true, vec![]);
        let err = manager.stop_sync("missing").await.unwrap_err();
        assert!(matches!(err, StandbyError::NotFound(_)));
    }

    #[tokio::test]
    async fn health_check_escalates_to_failover_after_threshold() {
        let (manager, sink) = build_manager(false, vec![]);
        manager
            .configure(StandbyConfig {
                auto_standby_enabled: true,
                failover_threshold: 2,
                auto_recovery: false,
                ..Default::default()
            })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        manager.health_check("gpu-1").await.unwrap();
        manager.health_check("gpu-1").await.unwrap();
        let association = manager.get_association("gpu-1").await.unwrap();
        assert_eq!(association.state, PairState::FailoverActive);
        assert!(sink.events().iter().any(|e| e.kind() == "failover"));
    }

    #[tokio::test]
    async fn active_endpoint_switches_to_cpu_after_failover() {
        let (manager, _sink) = build_manager(false, vec![]);
        manager
            .configure(StandbyConfig {
                auto_standby_enabled: true,
                failover_threshold: 1,
                auto_recovery: false,
                ..Default::default()
            })
            .await;
        manager.on_gpu_created(1, "gpu-1").await.unwrap();
        manager.health_check("gpu-1").await.unwrap();
        let endpoint = manager.get_active_endpoint("gpu-1").await.unwrap();
        assert_eq!(endpoint.source, EndpointSource::Cpu);
    }

    #[tokio::test]
    async fn mark_gpu_failed_without_association_errors() {
        let (manager, _sink) = build_manager(true, vec![]);
        let err = manager
            .mark_gpu_failed("missing", FailureReason::SpotInterruption)
            .await
            .unwrap_err();
        assert!(matches!(err, StandbyError::NotFound(_)));
    }

    #[tokio::test]
    async fn on_gpu_destroyed_is_idempotent() {
        let (manager, _sink) = build_manager(true, vec![]);
        manager.on_gpu_destroyed("never-existed").await.unwrap();
    }
}
