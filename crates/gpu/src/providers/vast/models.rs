//! Wire types for a Vast.ai-style bidding GPU marketplace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single offer ("ask") as returned by the bundles search endpoint.
#[derive(Debug, Deserialize)]
pub struct OfferData {
    pub id: i64,
    pub gpu_name: Option<String>,
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,
    #[serde(default)]
    pub gpu_ram: f64,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub cpu_ram: f64,
    #[serde(default)]
    pub disk_space: f64,
    #[serde(default)]
    pub dph_total: f64,
    pub geolocation: Option<String>,
    #[serde(default, rename = "reliability2")]
    pub reliability: f64,
    #[serde(default)]
    pub verified: bool,
    pub machine_id: Option<i64>,
}

fn default_num_gpus() -> u32 {
    1
}

/// Bundles search response: either a bare array or `{"offers": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OffersResponse {
    Wrapped { offers: Vec<OfferData> },
    Bare(Vec<OfferData>),
}

impl OffersResponse {
    pub fn into_offers(self) -> Vec<OfferData> {
        match self {
            Self::Wrapped { offers } => offers,
            Self::Bare(offers) => offers,
        }
    }
}

/// Body sent to `PUT /asks/{offer_id}/`.
#[derive(Debug, Serialize)]
pub struct CreateInstanceBody {
    pub client_id: &'static str,
    pub image: String,
    pub disk: u32,
    pub onstart: String,
    pub extra_env: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Response from `PUT /asks/{offer_id}/`.
#[derive(Debug, Deserialize)]
pub struct CreateInstanceResponse {
    pub new_contract: Option<i64>,
}

/// Single-instance response wrapper: either `{"instances": {...}}` or `{"instances": [...]}`.
#[derive(Debug, Deserialize)]
pub struct InstanceEnvelope {
    pub instances: Option<InstancesField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InstancesField {
    One(InstanceData),
    Many(Vec<InstanceData>),
}

/// Raw instance data as returned by the instances endpoints.
#[derive(Debug, Deserialize)]
pub struct InstanceData {
    pub id: i64,
    #[serde(default)]
    pub actual_status: String,
    pub gpu_name: Option<String>,
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,
    #[serde(default)]
    pub gpu_ram: f64,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub cpu_ram: f64,
    #[serde(default)]
    pub disk_space: f64,
    #[serde(default)]
    pub dph_total: f64,
    pub public_ipaddr: Option<String>,
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ports: HashMap<String, Vec<PortMapping>>,
    pub machine_id: Option<i64>,
    pub geolocation: Option<String>,
    #[serde(rename = "reliability2")]
    pub reliability: Option<f64>,
    pub start_date: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PortMapping {
    #[serde(rename = "HostPort")]
    pub host_port: Option<String>,
}

/// Response from `PUT /instances/{id}/` (pause/resume).
#[derive(Debug, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: bool,
}

/// Response from `GET /users/current/`.
#[derive(Debug, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub credit: f64,
    #[serde(default)]
    pub balance: f64,
}
