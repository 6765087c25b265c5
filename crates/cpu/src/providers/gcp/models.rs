//! Wire types for the Compute Engine v1 REST API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct DiskInitializeParams {
    #[serde(rename = "sourceImage")]
    pub source_image: String,
    #[serde(rename = "diskSizeGb")]
    pub disk_size_gb: String,
    #[serde(rename = "diskType")]
    pub disk_type: String,
}

#[derive(Debug, Serialize)]
pub struct DiskConfig {
    pub boot: bool,
    #[serde(rename = "autoDelete")]
    pub auto_delete: bool,
    #[serde(rename = "initializeParams")]
    pub initialize_params: DiskInitializeParams,
}

#[derive(Debug, Serialize)]
pub struct AccessConfigRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct NetworkInterfaceConfig {
    pub network: String,
    #[serde(rename = "accessConfigs")]
    pub access_configs: Vec<AccessConfigRequest>,
}

#[derive(Debug, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Serialize)]
pub struct Tags {
    pub items: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Scheduling {
    #[serde(rename = "provisioningModel")]
    pub provisioning_model: String,
    #[serde(rename = "instanceTerminationAction")]
    pub instance_termination_action: String,
    #[serde(rename = "onHostMaintenance")]
    pub on_host_maintenance: String,
}

/// Body for `POST .../zones/{zone}/instances`.
#[derive(Debug, Serialize)]
pub struct InsertInstanceBody {
    pub name: String,
    #[serde(rename = "machineType")]
    pub machine_type: String,
    pub disks: Vec<DiskConfig>,
    #[serde(rename = "networkInterfaces")]
    pub network_interfaces: Vec<NetworkInterfaceConfig>,
    pub tags: Tags,
    pub metadata: Metadata,
    pub labels: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
}

#[derive(Debug, Deserialize)]
pub struct AccessConfig {
    #[serde(rename = "natIP")]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkInterface {
    #[serde(rename = "networkIP")]
    pub network_ip: Option<String>,
    #[serde(default, rename = "accessConfigs")]
    pub access_configs: Vec<AccessConfig>,
}

/// An instance resource, as returned by get/list/insert.
#[derive(Debug, Deserialize)]
pub struct InstanceResource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "machineType")]
    pub machine_type: String,
    #[serde(default, rename = "networkInterfaces")]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub scheduling: Option<InstanceScheduling>,
    #[serde(rename = "creationTimestamp")]
    pub creation_timestamp: Option<String>,
    #[serde(default)]
    pub disks: Vec<InstanceDisk>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceScheduling {
    #[serde(default, rename = "provisioningModel")]
    pub provisioning_model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceDisk {
    #[serde(default, rename = "diskSizeGb")]
    pub disk_size_gb: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceList {
    #[serde(default)]
    pub items: Vec<InstanceResource>,
}

#[derive(Debug, Deserialize)]
pub struct ZoneList {
    #[serde(default)]
    pub items: Vec<ZoneItem>,
}

#[derive(Debug, Deserialize)]
pub struct ZoneItem {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageResource {
    #[serde(rename = "selfLink")]
    pub self_link: String,
}

#[derive(Debug, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A long-running zone operation, polled until `status == "DONE"`.
#[derive(Debug, Deserialize)]
pub struct Operation {
    pub name: String,
    pub status: String,
    pub error: Option<OperationError>,
}
