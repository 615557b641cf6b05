//! Wire types for the Spheron REST API.
//!
//! Field names follow the API's camelCase JSON; identifiers arrive as `_id`.

use serde::{Deserialize, Serialize};

/// Compute protocol an instance is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProtocol {
    Akash,
}

/// A container port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub container_port: i64,
    pub exposed_port: i64,
}

/// An environment variable as the API stores it: `KEY=VALUE` plus a secrecy flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Deployment configuration sent when creating an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfiguration {
    pub folder_name: String,
    pub protocol: ClusterProtocol,
    pub image: String,
    pub tag: String,
    pub instance_count: u32,
    pub build_image: bool,
    pub ports: Vec<Port>,
    pub env: Vec<Env>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub region: String,
    pub akash_machine_image_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub organization_id: String,
    pub unique_topic_id: String,
    pub configuration: InstanceConfiguration,
    pub cluster_url: String,
    pub cluster_provider: String,
    pub cluster_name: String,
    pub health_check_url: String,
    pub health_check_port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceResponse {
    #[serde(default)]
    pub cluster_id: String,
    pub cluster_instance_id: String,
    #[serde(default)]
    pub cluster_instance_order_id: String,
    #[serde(default)]
    pub topic_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstanceRequest {
    pub env: Vec<Env>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub unique_topic_id: String,
    pub tag: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstanceResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cluster_instance_id: String,
    #[serde(default)]
    pub cluster_instance_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckUpdateRequest {
    pub health_check_url: String,
    pub health_check_port: i64,
}

/// Health check as reported on a cluster instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub port: Port,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstance {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub orders: Vec<String>,
    pub cluster: String,
    pub active_order: String,
    #[serde(default)]
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineImage {
    #[serde(default)]
    pub machine_type: String,
}

/// Configuration recorded on a deployed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfiguration {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub env: Vec<Env>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub agreed_machine_image: MachineImage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolData {
    #[serde(default)]
    pub provider_host: String,
}

/// A deployment order of a cluster instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOrder {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub cluster_instance_configuration: OrderConfiguration,
    #[serde(default)]
    pub url_preview: String,
    #[serde(default)]
    pub protocol_data: Option<ProtocolData>,
}

impl InstanceOrder {
    /// The provider host this order is served from, if it has been assigned one.
    pub fn provider_host(&self) -> Option<&str> {
        self.protocol_data
            .as_ref()
            .map(|data| data.provider_host.as_str())
            .filter(|host| !host.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// Kind of custom domain attached to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    Domain,
    Subdomain,
}

impl DomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::Domain => "domain",
            DomainType::Subdomain => "subdomain",
        }
    }
}

impl std::str::FromStr for DomainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(DomainType::Domain),
            "subdomain" => Ok(DomainType::Subdomain),
            other => Err(format!("unsupported domain type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub link: String,
    /// Kept as the API spells it; parse with [`DomainType`] where the kind matters.
    #[serde(rename = "type", default)]
    pub domain_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    pub link: String,
}

// Response envelopes

#[derive(Debug, Deserialize)]
pub(crate) struct ScopeResponse {
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceEnvelope {
    pub instance: ClusterInstance,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderEnvelope {
    pub order: InstanceOrder,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterEnvelope {
    pub cluster: Cluster,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DomainsEnvelope {
    #[serde(default)]
    pub domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DomainEnvelope {
    pub domain: Domain,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
