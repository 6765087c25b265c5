//! Compute Engine adapter: stable-cloud CPU VMs used as standby/failover
//! targets while a GPU machine is unreachable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::models::{
    AccessConfigRequest, DiskConfig, DiskInitializeParams, ImageResource, InsertInstanceBody,
    InstanceList, InstanceResource, Metadata, MetadataItem, NetworkInterfaceConfig, Operation,
    Scheduling, Tags, ZoneList,
};
use crate::auth::{ServiceAccountKey, TokenProvider};
use crate::providers::traits::{
    CpuProvider, CpuProviderError, CpuSpecs, CreateInstanceRequest, Instance, InstanceStatus,
};
use crate::retry::with_retry;

const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
const DEFAULT_IMAGE_FAMILY: &str = "ubuntu-2204-lts";
const DEFAULT_IMAGE_PROJECT: &str = "ubuntu-os-cloud";
const DEFAULT_DISK_TYPE: &str = "pd-standard";
const MANAGED_BY_LABEL: &str = "fleet-cloud";
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Google Compute Engine adapter for CPU standby VMs.
pub struct GcpProvider {
    http: Client,
    tokens: TokenProvider,
}

impl GcpProvider {
    /// Build an adapter from a service-account key file on disk.
    ///
    /// # Errors
    /// Returns [`CpuProviderError::Config`] if the key file cannot be
    /// read or parsed.
    pub fn from_key_path(path: &std::path::Path) -> Result<Self, CpuProviderError> {
        let key = ServiceAccountKey::load_from_path(path)?;
        Ok(Self::new(key))
    }

    /// Build an adapter from an already-loaded service-account key.
    #[must_use]
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with default TLS config"),
            tokens: TokenProvider::new(key),
        }
    }

    fn project(&self) -> &str {
        self.tokens.project_id()
    }

    async fn authed_request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::RequestBuilder, CpuProviderError> {
        let token = self.tokens.access_token().await?;
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {token}")))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, CpuProviderError> {
        let response = self
            .authed_request(reqwest::Method::GET, url)
            .await?
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn post<T, B>(&self, url: &str, body: Option<&B>) -> Result<T, CpuProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let mut request = self.authed_request(reqwest::Method::POST, url).await?;
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn delete(&self, url: &str) -> Result<Option<Operation>, CpuProviderError> {
        let response = self
            .authed_request(reqwest::Method::DELETE, url)
            .await?
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Self::handle_response(response).await.map(Some)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CpuProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "failed to parse response");
                CpuProviderError::Serialization(e)
            })
        } else {
            Err(CpuProviderError::from_status(status, text))
        }
    }

    async fn wait_for_operation(&self, op: Operation, zone: &str) -> Result<(), CpuProviderError> {
        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{zone}/operations/{}",
            self.project(),
            op.name
        );

        let start = std::time::Instant::now();
        loop {
            let current: Operation = self.get(&url).await?;

            if current.status == "DONE" {
                if let Some(err) = current.error {
                    let message = err
                        .errors
                        .into_iter()
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(CpuProviderError::Transient(format!(
                        "operation failed: {message}"
                    )));
                }
                return Ok(());
            }

            if start.elapsed() > OPERATION_TIMEOUT {
                return Err(CpuProviderError::Transient(format!(
                    "operation {} timed out",
                    op.name
                )));
            }

            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
        }
    }

    async fn resolve_source_image(&self) -> Result<String, CpuProviderError> {
        let url = format!(
            "{COMPUTE_BASE}/projects/{DEFAULT_IMAGE_PROJECT}/global/images/family/{DEFAULT_IMAGE_FAMILY}"
        );
        let image: ImageResource = with_retry("resolve_source_image", || self.get(&url)).await?;
        Ok(image.self_link)
    }

    fn instance_from_resource(resource: InstanceResource, zone: &str) -> Instance {
        let status = match resource.status.as_str() {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "STAGING" => InstanceStatus::Staging,
            "RUNNING" => InstanceStatus::Running,
            "STOPPING" => InstanceStatus::Stopping,
            "STOPPED" => InstanceStatus::Stopped,
            "SUSPENDING" => InstanceStatus::Suspending,
            "SUSPENDED" => InstanceStatus::Suspended,
            "TERMINATED" => InstanceStatus::Terminated,
            _ => InstanceStatus::Unknown,
        };

        let interface = resource.network_interfaces.first();
        let internal_ip = interface.and_then(|i| i.network_ip.clone());
        let external_ip = interface
            .and_then(|i| i.access_configs.first())
            .and_then(|a| a.nat_ip.clone());

        let spot = resource
            .scheduling
            .as_ref()
            .and_then(|s| s.provisioning_model.as_deref())
            == Some("SPOT");

        let disk_gb = resource
            .disks
            .first()
            .and_then(|d| d.disk_size_gb.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let machine_type = resource
            .machine_type
            .rsplit('/')
            .next()
            .unwrap_or(&resource.machine_type)
            .to_string();

        Instance {
            id: resource.id,
            name: resource.name,
            zone: zone.to_string(),
            status,
            specs: CpuSpecs {
                machine_type,
                vcpus: 0,
                ram_gb: 0,
                disk_gb,
            },
            external_ip,
            internal_ip,
            spot,
            created_at: resource
                .creation_timestamp
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(&ts).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }
}

#[async_trait]
impl CpuProvider for GcpProvider {
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, CpuProviderError> {
        info!(name = %req.name, zone = %req.zone, "creating CPU standby instance");

        let source_image = self.resolve_source_image().await?;

        let mut metadata_items = vec![];
        if let Some(script) = &req.startup_script {
            metadata_items.push(MetadataItem {
                key: "startup-script".to_string(),
                value: script.clone(),
            });
        }
        if let Some(ssh_key) = &req.ssh_public_key {
            metadata_items.push(MetadataItem {
                key: "ssh-keys".to_string(),
                value: format!("root:{ssh_key}"),
            });
        }

        let mut labels: HashMap<String, String> = req.labels.into_iter().collect();
        labels
            .entry("managed-by".to_string())
            .or_insert_with(|| MANAGED_BY_LABEL.to_string());

        let body = InsertInstanceBody {
            name: req.name.clone(),
            machine_type: format!(
                "zones/{}/machineTypes/{}",
                req.zone, req.machine_type
            ),
            disks: vec![DiskConfig {
                boot: true,
                auto_delete: true,
                initialize_params: DiskInitializeParams {
                    source_image,
                    disk_size_gb: req.disk_size_gb.to_string(),
                    disk_type: format!("zones/{}/diskTypes/{DEFAULT_DISK_TYPE}", req.zone),
                },
            }],
            network_interfaces: vec![NetworkInterfaceConfig {
                network: "global/networks/default".to_string(),
                access_configs: vec![AccessConfigRequest {
                    kind: "ONE_TO_ONE_NAT".to_string(),
                    name: "External NAT".to_string(),
                }],
            }],
            tags: Tags {
                items: vec!["fleet-standby".to_string(), "allow-ssh".to_string()],
            },
            metadata: Metadata {
                items: metadata_items,
            },
            labels,
            scheduling: req.spot.then(|| Scheduling {
                provisioning_model: "SPOT".to_string(),
                instance_termination_action: "STOP".to_string(),
                on_host_maintenance: "TERMINATE".to_string(),
            }),
        };

        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{}/instances",
            self.project(),
            req.zone
        );

        let op: Operation =
            with_retry("create_instance", || self.post(&url, Some(&body))).await?;
        self.wait_for_operation(op, &req.zone).await?;

        let instance = self.get_instance(&req.name, &req.zone).await?;
        info!(instance_id = %instance.id, "CPU standby instance created");
        Ok(instance)
    }

    async fn get_instance(&self, name: &str, zone: &str) -> Result<Instance, CpuProviderError> {
        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{zone}/instances/{name}",
            self.project()
        );
        let resource: InstanceResource =
            with_retry("get_instance", || self.get(&url)).await?;
        Ok(Self::instance_from_resource(resource, zone))
    }

    async fn list_instances(
        &self,
        zone: Option<&str>,
    ) -> Result<Vec<Instance>, CpuProviderError> {
        let zones: Vec<String> = match zone {
            Some(z) => vec![z.to_string()],
            None => {
                let url = format!("{COMPUTE_BASE}/projects/{}/zones", self.project());
                let list: ZoneList = with_retry("list_zones", || self.get(&url)).await?;
                list.items.into_iter().map(|z| z.name).collect()
            }
        };

        let mut instances = Vec::new();
        for z in zones {
            let url = format!(
                "{COMPUTE_BASE}/projects/{}/zones/{z}/instances?filter=labels.managed-by={MANAGED_BY_LABEL}",
                self.project()
            );
            let result: Result<InstanceList, CpuProviderError> =
                with_retry("list_instances", || self.get(&url)).await;

            match result {
                Ok(list) => instances.extend(
                    list.items
                        .into_iter()
                        .map(|r| Self::instance_from_resource(r, &z)),
                ),
                Err(e) => debug!(zone = %z, error = %e, "skipping zone while listing instances"),
            }
        }

        Ok(instances)
    }

    async fn start(&self, name: &str, zone: &str) -> Result<(), CpuProviderError> {
        info!(name = %name, zone = %zone, "starting CPU standby instance");
        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{zone}/instances/{name}/start",
            self.project()
        );
        let op: Operation =
            with_retry("start_instance", || self.post::<Operation, ()>(&url, None)).await?;
        self.wait_for_operation(op, zone).await
    }

    async fn stop(&self, name: &str, zone: &str) -> Result<(), CpuProviderError> {
        info!(name = %name, zone = %zone, "stopping CPU standby instance");
        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{zone}/instances/{name}/stop",
            self.project()
        );
        let op: Operation =
            with_retry("stop_instance", || self.post::<Operation, ()>(&url, None)).await?;
        self.wait_for_operation(op, zone).await
    }

    async fn destroy(&self, name: &str, zone: &str) -> Result<bool, CpuProviderError> {
        info!(name = %name, zone = %zone, "destroying CPU standby instance");
        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{zone}/instances/{name}",
            self.project()
        );

        match with_retry("destroy_instance", || self.delete(&url)).await? {
            Some(op) => {
                self.wait_for_operation(op, zone).await?;
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_rsa_key() -> &'static str {
        include_str!("../../../testdata/test_rsa_key.pem")
    }

    fn test_key(token_uri: String) -> ServiceAccountKey {
        serde_json::from_value(serde_json::json!({
            "project_id": "fleet-test",
            "private_key": test_rsa_key(),
            "client_email": "fleet@fleet-test.iam.gserviceaccount.com",
            "token_uri": token_uri
        }))
        .unwrap()
    }

    #[test]
    fn instance_status_maps_running() {
        let resource = InstanceResource {
            id: "1".to_string(),
            name: "standby-1".to_string(),
            status: "RUNNING".to_string(),
            machine_type: "zones/us-central1-a/machineTypes/e2-medium".to_string(),
            network_interfaces: vec![],
            scheduling: None,
            creation_timestamp: None,
            disks: vec![],
        };
        let instance = GcpProvider::instance_from_resource(resource, "us-central1-a");
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.specs.machine_type, "e2-medium");
    }

    #[tokio::test]
    async fn destroy_is_idempotent_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex("^/token$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex("^/compute/v1/projects/.*"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = GcpProvider::new(test_key(format!("{}/token", server.uri())));
        let url = format!("{}/compute/v1/projects/x/zones/z/instances/i", server.uri());
        let result = provider.delete(&url).await.unwrap();
        assert!(result.is_none());
    }
}
