//! Spot/interruptible GPU marketplace client, modeled on a Vast.ai-style
//! bidding API: search "asks", create an instance from a consumed offer,
//! query/list/destroy/pause/resume by numeric id, query account balance.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use super::models::{
    ActionResponse, BalanceResponse, CreateInstanceBody, CreateInstanceResponse, InstanceData,
    InstanceEnvelope, InstancesField, OfferData, OffersResponse,
};
use crate::providers::traits::{
    Balance, CreateInstanceRequest, GpuProvider, GpuProviderError, GpuSpecs, Instance,
    InstanceStatus, Offer, OfferFilter,
};
use crate::retry::with_retry;

/// Default base URL for the marketplace API.
pub const DEFAULT_BASE_URL: &str = "https://console.vast.ai/api/v0";

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval used by `wait_ready`.
const POLL_INTERVAL_SECS: u64 = 10;

/// Spot GPU marketplace adapter.
#[derive(Clone)]
pub struct VastProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl VastProvider {
    /// Create a new adapter against the default base URL.
    ///
    /// # Errors
    /// Returns [`GpuProviderError::Config`] if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self, GpuProviderError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a new adapter against a custom base URL (used by tests).
    ///
    /// # Errors
    /// Returns [`GpuProviderError::Config`] if `api_key` is empty.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, GpuProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GpuProviderError::Config(
                "GPU marketplace API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GpuProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn put<T, B>(
        &self,
        path: &str,
        body: &B,
        query: &[(&str, String)],
    ) -> Result<T, GpuProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "PUT request");

        let response = self
            .client
            .put(&url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn delete_raw(&self, path: &str) -> Result<bool, GpuProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            // Destroy is idempotent over 404.
            Ok(true)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(GpuProviderError::from_status(status, text))
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GpuProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "failed to parse response");
                GpuProviderError::Serialization(e)
            })
        } else {
            Err(GpuProviderError::from_status(status, text))
        }
    }

    fn offer_from_data(data: OfferData) -> Offer {
        Offer {
            id: data.id.to_string(),
            specs: GpuSpecs {
                gpu_model: data.gpu_name.unwrap_or_else(|| "Unknown".to_string()),
                gpu_count: data.num_gpus,
                gpu_memory_gb: Some(data.gpu_ram.round() as u32),
                vcpus: data.cpu_cores,
                ram_gb: data.cpu_ram.round() as u32,
                storage_gb: data.disk_space.round() as u32,
            },
            price_per_hour: data.dph_total,
            geolocation: data.geolocation.unwrap_or_else(|| "Unknown".to_string()),
            reliability: data.reliability,
            machine_id: data
                .machine_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            verified: data.verified,
        }
    }

    fn instance_from_data(data: InstanceData) -> Instance {
        let status = match data.actual_status.as_str() {
            "loading" | "scheduling" => InstanceStatus::Creating,
            "running" => InstanceStatus::Running,
            "exited" => InstanceStatus::Exited,
            _ if data.actual_status.is_empty() => InstanceStatus::Unknown,
            _ => InstanceStatus::Unknown,
        };

        let ssh_port = data
            .ports
            .get("22/tcp")
            .and_then(|mappings| mappings.first())
            .and_then(|m| m.host_port.as_ref())
            .and_then(|p| p.parse().ok());

        Instance {
            id: data.id.to_string(),
            status,
            specs: GpuSpecs {
                gpu_model: data.gpu_name.unwrap_or_else(|| "Unknown".to_string()),
                gpu_count: data.num_gpus,
                gpu_memory_gb: Some(data.gpu_ram.round() as u32),
                vcpus: data.cpu_cores,
                ram_gb: data.cpu_ram.round() as u32,
                storage_gb: data.disk_space.round() as u32,
            },
            dph_total: data.dph_total,
            public_ip: data.public_ipaddr,
            ssh_host: data.ssh_host,
            ssh_port,
            machine_id: data
                .machine_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            geolocation: data.geolocation,
            reliability: data.reliability,
            created_at: data
                .start_date
                .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0)),
        }
    }
}

#[async_trait]
impl GpuProvider for VastProvider {
    async fn search_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, GpuProviderError> {
        let mut query = serde_json::Map::new();
        query.insert("rentable".into(), json!({"eq": true}));
        if let Some(n) = filter.num_gpus {
            query.insert("num_gpus".into(), json!({"eq": n}));
        }
        if let Some(d) = filter.min_disk_gb {
            query.insert("disk_space".into(), json!({"gte": d}));
        }
        if let Some(p) = filter.max_price_per_hour {
            query.insert("dph_total".into(), json!({"lte": p}));
        }
        if let Some(r) = filter.min_reliability {
            query.insert("reliability2".into(), json!({"gte": r}));
        }
        if filter.verified_only {
            query.insert("verified".into(), json!({"eq": true}));
        }
        if let Some(gpu) = &filter.gpu_model {
            query.insert("gpu_name".into(), json!({"eq": gpu}));
        }

        let q = serde_json::Value::Object(query).to_string();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };

        let response: OffersResponse = with_retry("search_offers", || {
            self.get(
                "/bundles",
                &[
                    ("q", q.clone()),
                    ("order", "dph_total".to_string()),
                    ("type", "on-demand".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
        })
        .await?;

        let mut offers: Vec<Offer> = response
            .into_offers()
            .into_iter()
            .map(Self::offer_from_data)
            .collect();

        if let Some(region) = &filter.region {
            let region = region.to_lowercase();
            offers.retain(|o| o.geolocation.to_lowercase().contains(&region));
        }

        Ok(offers)
    }

    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, GpuProviderError> {
        info!(offer_id = %req.offer_id, "creating instance from offer");

        let mut extra_env: Vec<(String, String)> = Vec::new();
        for port in &req.ports {
            extra_env.push((format!("-p {port}:{port}"), "1".to_string()));
        }

        let body = CreateInstanceBody {
            client_id: "me",
            image: req.image,
            disk: req.disk_gb,
            onstart: req
                .onstart
                .unwrap_or_else(|| "touch ~/.no_auto_tmux".to_string()),
            extra_env,
            label: req.label,
        };

        let path = format!("/asks/{}/", req.offer_id);
        let response: CreateInstanceResponse =
            with_retry("create_instance", || self.put(&path, &body, &[])).await?;

        let instance_id = response.new_contract.ok_or_else(|| {
            GpuProviderError::Transient("no instance id returned from marketplace".to_string())
        })?;

        let instance = self.get_instance(&instance_id.to_string()).await?;
        info!(instance_id = %instance.id, "instance created");
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, GpuProviderError> {
        let envelope: InstanceEnvelope = with_retry("get_instance", || {
            self.get(&format!("/instances/{id}/"), &[])
        })
        .await?;

        let data = match envelope.instances {
            Some(InstancesField::One(d)) => d,
            Some(InstancesField::Many(mut list)) if !list.is_empty() => list.remove(0),
            _ => return Err(GpuProviderError::NotFound(id.to_string())),
        };

        Ok(Self::instance_from_data(data))
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, GpuProviderError> {
        let envelope: InstanceEnvelope = with_retry("list_instances", || {
            self.get("/instances/", &[("owner", "me".to_string())])
        })
        .await?;

        let instances = match envelope.instances {
            Some(InstancesField::Many(list)) => list,
            Some(InstancesField::One(d)) => vec![d],
            None => Vec::new(),
        };

        Ok(instances.into_iter().map(Self::instance_from_data).collect())
    }

    async fn destroy(&self, id: &str) -> Result<bool, GpuProviderError> {
        info!(instance_id = %id, "destroying instance");
        with_retry("destroy", || self.delete_raw(&format!("/instances/{id}/"))).await
    }

    async fn pause(&self, id: &str) -> Result<bool, GpuProviderError> {
        info!(instance_id = %id, "pausing instance");
        let response: ActionResponse = with_retry("pause", || {
            self.put(
                &format!("/instances/{id}/"),
                &json!({"paused": true}),
                &[("api_key", self.api_key.clone())],
            )
        })
        .await?;
        Ok(response.success)
    }

    async fn resume(&self, id: &str) -> Result<bool, GpuProviderError> {
        info!(instance_id = %id, "resuming instance");
        let response: ActionResponse = with_retry("resume", || {
            self.put(
                &format!("/instances/{id}/"),
                &json!({"paused": false}),
                &[("api_key", self.api_key.clone())],
            )
        })
        .await?;
        Ok(response.success)
    }

    async fn get_balance(&self) -> Result<Balance, GpuProviderError> {
        let response: BalanceResponse =
            with_retry("get_balance", || self.get("/users/current/", &[])).await?;
        Ok(Balance {
            credit: response.credit,
            balance: response.balance,
        })
    }

    async fn wait_ready(&self, id: &str, timeout_secs: u64) -> Result<Instance, GpuProviderError> {
        info!(instance_id = %id, timeout_secs, "waiting for instance to be ready");

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        loop {
            let instance = self.get_instance(id).await?;

            debug!(
                instance_id = %id,
                status = %instance.status,
                elapsed_secs = start.elapsed().as_secs(),
                "polling instance status"
            );

            if instance.status == InstanceStatus::Running && instance.ssh_host.is_some() {
                info!(instance_id = %id, "instance ready");
                return Ok(instance);
            }

            if start.elapsed() > timeout {
                return Err(GpuProviderError::Transient(format!(
                    "timed out after {timeout_secs}s waiting for instance {id}"
                )));
            }

            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rejects_empty_api_key() {
        let err = VastProvider::new("").unwrap_err();
        assert!(matches!(err, GpuProviderError::Config(_)));
    }

    #[tokio::test]
    async fn search_offers_parses_bare_array_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/bundles$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": 12345,
                    "gpu_name": "RTX 4090",
                    "num_gpus": 1,
                    "gpu_ram": 24.0,
                    "cpu_cores": 16,
                    "cpu_ram": 64.0,
                    "disk_space": 200.0,
                    "dph_total": 0.35,
                    "geolocation": "US, California",
                    "reliability2": 0.97,
                    "verified": true,
                    "machine_id": 999
                }
            ])))
            .mount(&server)
            .await;

        let provider = VastProvider::with_base_url("test-key", server.uri()).unwrap();
        let offers = provider
            .search_offers(&OfferFilter::default())
            .await
            .unwrap();

        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].id, "12345");
        assert_eq!(offers[0].specs.gpu_model, "RTX 4090");
        assert!((offers[0].reliability - 0.97).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path_regex("^/instances/.*"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = VastProvider::with_base_url("test-key", server.uri()).unwrap();
        let result = provider.destroy("42").await.unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn rate_limited_response_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/users/current/$"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/users/current/$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "credit": 10.0,
                "balance": 5.0
            })))
            .mount(&server)
            .await;

        let provider = VastProvider::with_base_url("test-key", server.uri()).unwrap();
        let balance = provider.get_balance().await.unwrap();
        assert!((balance.balance - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/instances/.*"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad id"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = VastProvider::with_base_url("test-key", server.uri()).unwrap();
        let err = provider.get_instance("not-a-real-id").await.unwrap_err();
        assert!(matches!(err, GpuProviderError::InvalidRequest(_)));
    }
}
