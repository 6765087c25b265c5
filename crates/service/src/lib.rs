//! Instance Service (C9) and Agent Ingress (C10): the two components that
//! sit above the provider adapters, machine history, standby manager, and
//! serverless scheduler, and that a façade would call directly.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod agent_ingress;
mod error;
mod instance_service;
mod model;

pub use agent_ingress::{AgentHeartbeat, AgentIngress, GpuMetrics, HeartbeatAction, HeartbeatResponse};
pub use error::{ErrorKind, ServiceError};
pub use instance_service::InstanceService;
pub use model::{
    AnnotatedOffer, CreateInstanceParams, DestroyReason, MigrateOutcome, MigrateParams,
    ValidationResult,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use events::{EventBus, InMemorySink};
    use gpu::{
        Balance, CreateInstanceRequest, GpuProvider, GpuProviderError, GpuSpecs, Instance,
        InstanceStatus, Offer, OfferFilter,
    };
    use history::MachineHistoryStore;
    use tokio::sync::Mutex;

    struct FakeGpuProvider {
        offers: Vec<Offer>,
        balance: Balance,
        created: Mutex<Vec<String>>,
        fail_create: bool,
    }

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

    fn offer(id: &str, machine_id: &str, price: f64) -> Offer {
        Offer {
            id: id.to_string(),
            specs: specs(),
            price_per_hour: price,
            geolocation: "US".to_string(),
            reliability: 0.99,
            machine_id: machine_id.to_string(),
            verified: true,
        }
    }

    #[async_trait]
    impl GpuProvider for FakeGpuProvider {
        async fn search_offers(&self, _filter: &OfferFilter) -> Result<Vec<Offer>, GpuProviderError> {
            Ok(self.offers.clone())
        }

        async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, GpuProviderError> {
            if self.fail_create {
                return Err(GpuProviderError::OfferUnavailable(req.offer_id));
            }
            self.created.lock().await.push(req.offer_id.clone());
            Ok(Instance {
                id: "new-instance".to_string(),
                status: InstanceStatus::Running,
                specs: specs(),
                dph_total: 0.5,
                public_ip: Some("1.2.3.4".to_string()),
                ssh_host: Some("1.2.3.4".to_string()),
                ssh_port: Some(22),
                machine_id: "m-new".to_string(),
                geolocation: Some("US".to_string()),
                reliability: Some(0.99),
                created_at: None,
            })
        }

        async fn get_instance(&self, id: &str) -> Result<Instance, GpuProviderError> {
            Ok(Instance {
                id: id.to_string(),
                status: InstanceStatus::Running,
                specs: specs(),
                dph_total: 0.5,
                public_ip: None,
                ssh_host: None,
                ssh_port: None,
                machine_id: "m-new".to_string(),
                geolocation: None,
                reliability: None,
                created_at: None,
            })
        }

        async fn list_instances(&self) -> Result<Vec<Instance>, GpuProviderError> {
            Ok(Vec::new())
        }

        async fn destroy(&self, _id: &str) -> Result<bool, GpuProviderError> {
            Ok(true)
        }

        async fn pause(&self, _id: &str) -> Result<bool, GpuProviderError> {
            Ok(true)
        }

        async fn resume(&self, _id: &str) -> Result<bool, GpuProviderError> {
            Ok(true)
        }

        async fn get_balance(&self) -> Result<Balance, GpuProviderError> {
            Ok(self.balance)
        }

        async fn wait_ready(&self, id: &str, _timeout_secs: u64) -> Result<Instance, GpuProviderError> {
            self.get_instance(id).await
        }
    }

    fn service(provider: FakeGpuProvider) -> InstanceService {
        InstanceService::new(
            Arc::new(provider),
            Arc::new(MachineHistoryStore::new()),
            None,
            None,
            Arc::new(EventBus::new()),
            "vast",
        )
    }

    #[tokio::test]
    async fn search_offers_excludes_blacklisted_by_default() {
        let history = Arc::new(MachineHistoryStore::new());
        for _ in 0..5 {
            history.record_attempt(history::CreationAttempt::failure(
                "vast",
                "bad-machine",
                history::FailingStage::SshTimeout,
                "timed out",
            ));
        }
        let provider = FakeGpuProvider {
            offers: vec![offer("o1", "bad-machine", 0.5), offer("o2", "good-machine", 0.5)],
            balance: Balance { credit: 10.0, balance: 0.0 },
            created: Mutex::new(Vec::new()),
            fail_create: false,
        };
        let svc = InstanceService::new(
            Arc::new(provider),
            history,
            None,
            None,
            Arc::new(EventBus::new()),
            "vast",
        );

        let results = svc.search_offers(&OfferFilter::default(), false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].offer.id, "o2");

        let all = svc.search_offers(&OfferFilter::default(), true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().find(|o| o.offer.id == "o1").unwrap().is_blacklisted);
    }

    #[tokio::test]
    async fn validate_before_create_rejects_insufficient_balance() {
        let provider = FakeGpuProvider {
            offers: vec![offer("o1", "m1", 5.0)],
            balance: Balance { credit: 0.0, balance: 1.0 },
            created: Mutex::new(Vec::new()),
            fail_create: false,
        };
        let svc = service(provider);
        let result = svc.validate_before_create("o1").await.unwrap();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("insufficient balance")));
    }

    #[tokio::test]
    async fn validate_before_create_rejects_unavailable_offer() {
        let provider = FakeGpuProvider {
            offers: vec![offer("o1", "m1", 1.0)],
            balance: Balance { credit: 10.0, balance: 0.0 },
            created: Mutex::new(Vec::new()),
            fail_create: false,
        };
        let svc = service(provider);
        let result = svc.validate_before_create("gone").await.unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn create_instance_records_a_failed_attempt_on_provider_error() {
        let history = Arc::new(MachineHistoryStore::new());
        let provider = FakeGpuProvider {
            offers: vec![offer("o1", "m1", 1.0)],
            balance: Balance { credit: 10.0, balance: 0.0 },
            created: Mutex::new(Vec::new()),
            fail_create: true,
        };
        let svc = InstanceService::new(
            Arc::new(provider),
            Arc::clone(&history),
            None,
            None,
            Arc::new(EventBus::new()),
            "vast",
        );

        let params = CreateInstanceParams {
            offer_id: "o1".to_string(),
            machine_id: "m1".to_string(),
            gpu_model: "RTX 4090".to_string(),
            price_per_hour: 1.0,
            image: "img".to_string(),
            disk_gb: 50,
            label: None,
            ports: Vec::new(),
            onstart: None,
        };
        let err = svc.create_instance(1, params, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::Gpu(_)));
        assert_eq!(history.attempts_for("vast", "m1").len(), 1);
        assert!(!history.attempts_for("vast", "m1")[0].success);
    }

    #[tokio::test]
    async fn create_instance_succeeds_and_records_success() {
        let history = Arc::new(MachineHistoryStore::new());
        let sink = Arc::new(InMemorySink::new());
        let events = Arc::new(EventBus::with_sinks(vec![sink.clone()]));
        let provider = FakeGpuProvider {
            offers: vec![offer("o1", "m1", 1.0)],
            balance: Balance { credit: 10.0, balance: 0.0 },
            created: Mutex::new(Vec::new()),
            fail_create: false,
        };
        let svc = InstanceService::new(
            Arc::new(provider),
            Arc::clone(&history),
            None,
            None,
            events,
            "vast",
        );

        let params = CreateInstanceParams {
            offer_id: "o1".to_string(),
            machine_id: "m1".to_string(),
            gpu_model: "RTX 4090".to_string(),
            price_per_hour: 1.0,
            image: "img".to_string(),
            disk_gb: 50,
            label: None,
            ports: Vec::new(),
            onstart: None,
        };
        let instance = svc.create_instance(1, params, true).await.unwrap();
        assert_eq!(instance.id, "new-instance");
        assert_eq!(history.attempts_for("vast", "m1").len(), 1);
        assert!(history.attempts_for("vast", "m1")[0].success);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn agent_ingress_strips_vast_prefix_and_reports_hibernation() {
        let ingress = AgentIngress::new(None, 5.0, Duration::from_secs(0));
        let heartbeat = AgentHeartbeat {
            agent: "fleet-agent".to_string(),
            version: "1.0".to_string(),
            instance_id: "vast_12345".to_string(),
            status: "idle".to_string(),
            message: None,
            last_backup: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            uptime: None,
            gpu_metrics: Some(GpuMetrics {
                utilization: 1.0,
                gpu_count: 1,
                gpu_names: vec![],
                gpu_utilizations: vec![1.0],
                gpu_memory_used: vec![],
                gpu_memory_total: vec![],
                gpu_temperatures: vec![],
            }),
            gpu_utilization: None,
        };
        let response = ingress.receive_status(heartbeat).await;
        assert_eq!(response.instance_id, "12345");
        assert_eq!(response.action, HeartbeatAction::PrepareHibernate);
    }

    #[tokio::test]
    async fn agent_ingress_reports_none_when_above_threshold() {
        let ingress = AgentIngress::new(None, 5.0, Duration::from_secs(300));
        let heartbeat = AgentHeartbeat {
            agent: "fleet-agent".to_string(),
            version: "1.0".to_string(),
            instance_id: "12345".to_string(),
            status: "running".to_string(),
            message: None,
            last_backup: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            uptime: None,
            gpu_metrics: None,
            gpu_utilization: Some(80.0),
        };
        let response = ingress.receive_status(heartbeat).await;
        assert_eq!(response.action, HeartbeatAction::None);
    }
}
