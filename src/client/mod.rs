//! Spheron REST API client.
//!
//! [`ClusterApi`] is the seam resources program against; [`SpheronApi`] is the
//! `reqwest` implementation that talks to the real service. Tests substitute
//! [`crate::testing::InMemoryClusterApi`].

mod error;
pub mod events;
pub mod models;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ProviderConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub use error::{ApiError, Result};
pub use events::{parse_deployment_event, parse_event_ports, DeploymentEvent};
pub use models::*;

/// Operations the provider needs from the cluster-management API.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// The organization the API token is scoped to.
    async fn get_organization(&self) -> Result<Organization>;

    async fn create_cluster_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse>;

    async fn get_cluster_instance(&self, id: &str) -> Result<ClusterInstance>;

    async fn get_cluster_instance_order(&self, id: &str) -> Result<InstanceOrder>;

    async fn get_cluster(&self, id: &str) -> Result<Cluster>;

    async fn update_cluster_instance(
        &self,
        id: &str,
        request: UpdateInstanceRequest,
    ) -> Result<UpdateInstanceResponse>;

    async fn update_cluster_instance_health_check(
        &self,
        id: &str,
        request: HealthCheckUpdateRequest,
    ) -> Result<()>;

    async fn close_cluster_instance(&self, id: &str) -> Result<()>;

    async fn get_cluster_instance_domains(&self, instance_id: &str) -> Result<Vec<Domain>>;

    async fn add_cluster_instance_domain(
        &self,
        instance_id: &str,
        request: DomainRequest,
    ) -> Result<Domain>;

    async fn update_cluster_instance_domain(
        &self,
        instance_id: &str,
        domain_id: &str,
        request: DomainRequest,
    ) -> Result<Domain>;

    async fn delete_cluster_instance_domain(&self, instance_id: &str, domain_id: &str)
        -> Result<()>;

    /// Block until the deployment published on `topic_id` finishes.
    ///
    /// Returns the raw event line; decode it with [`parse_deployment_event`].
    async fn wait_for_deployed_event(&self, topic_id: &str) -> Result<String>;
}

/// HTTP client for the Spheron API.
#[derive(Debug, Clone)]
pub struct SpheronApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    deployment_timeout: Duration,
    request_timeout: Duration,
}

impl SpheronApi {
    /// Create a client from resolved provider configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("spheron-provider/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            deployment_timeout: config.deployment_timeout,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Override the per-call timeout for non-streaming requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url).bearer_auth(&self.token)
    }

    /// A request bounded by the per-call timeout; the event stream uses [`Self::request`].
    fn call(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, path).timeout(self.request_timeout)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.call(Method::GET, path).send().await?;
        decode(response).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.call(method, path).json(body).send().await?;
        decode(response).await
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        let response = self.call(method, path).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`ApiError::Status`], using the body's `message` when present.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or(body);

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait::async_trait]
impl ClusterApi for SpheronApi {
    #[instrument(skip(self))]
    async fn get_organization(&self) -> Result<Organization> {
        let scope: ScopeResponse = self.get("/v1/api-keys/scope").await?;
        scope
            .organizations
            .into_iter()
            .next()
            .ok_or(ApiError::MissingOrganization)
    }

    #[instrument(skip(self, request), fields(cluster = %request.cluster_name))]
    async fn create_cluster_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse> {
        let response: CreateInstanceResponse = self
            .send_json(Method::POST, "/v1/cluster-instance/create", &request)
            .await?;
        debug!(instance_id = %response.cluster_instance_id, "Cluster instance created");
        Ok(response)
    }

    #[instrument(skip(self))]
    async fn get_cluster_instance(&self, id: &str) -> Result<ClusterInstance> {
        let envelope: InstanceEnvelope =
            self.get(&format!("/v1/cluster-instance/{}", id)).await?;
        Ok(envelope.instance)
    }

    #[instrument(skip(self))]
    async fn get_cluster_instance_order(&self, id: &str) -> Result<InstanceOrder> {
        let envelope: OrderEnvelope = self
            .get(&format!("/v1/cluster-instance/order/{}", id))
            .await?;
        Ok(envelope.order)
    }

    #[instrument(skip(self))]
    async fn get_cluster(&self, id: &str) -> Result<Cluster> {
        let envelope: ClusterEnvelope = self.get(&format!("/v1/cluster/{}", id)).await?;
        Ok(envelope.cluster)
    }

    #[instrument(skip(self, request))]
    async fn update_cluster_instance(
        &self,
        id: &str,
        request: UpdateInstanceRequest,
    ) -> Result<UpdateInstanceResponse> {
        self.send_json(
            Method::PATCH,
            &format!("/v1/cluster-instance/{}/update", id),
            &request,
        )
        .await
    }

    #[instrument(skip(self, request))]
    async fn update_cluster_instance_health_check(
        &self,
        id: &str,
        request: HealthCheckUpdateRequest,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::PATCH,
                &format!("/v1/cluster-instance/{}/update/health-check", id),
                &request,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_cluster_instance(&self, id: &str) -> Result<()> {
        self.send_empty(Method::POST, &format!("/v1/cluster-instance/{}/close", id))
            .await
    }

    #[instrument(skip(self))]
    async fn get_cluster_instance_domains(&self, instance_id: &str) -> Result<Vec<Domain>> {
        let envelope: DomainsEnvelope = self
            .get(&format!("/v1/cluster-instance/{}/domains", instance_id))
            .await?;
        Ok(envelope.domains)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn add_cluster_instance_domain(
        &self,
        instance_id: &str,
        request: DomainRequest,
    ) -> Result<Domain> {
        let envelope: DomainEnvelope = self
            .send_json(
                Method::POST,
                &format!("/v1/cluster-instance/{}/domains", instance_id),
                &request,
            )
            .await?;
        Ok(envelope.domain)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn update_cluster_instance_domain(
        &self,
        instance_id: &str,
        domain_id: &str,
        request: DomainRequest,
    ) -> Result<Domain> {
        let envelope: DomainEnvelope = self
            .send_json(
                Method::PATCH,
                &format!("/v1/cluster-instance/{}/domains/{}", instance_id, domain_id),
                &request,
            )
            .await?;
        Ok(envelope.domain)
    }

    #[instrument(skip(self))]
    async fn delete_cluster_instance_domain(
        &self,
        instance_id: &str,
        domain_id: &str,
    ) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            &format!("/v1/cluster-instance/{}/domains/{}", instance_id, domain_id),
        )
        .await
    }

    #[instrument(skip(self), fields(timeout = ?self.deployment_timeout))]
    async fn wait_for_deployed_event(&self, topic_id: &str) -> Result<String> {
        let wait = async {
            let response = self
                .request(Method::GET, "/v1/subscribe")
                .query(&[("topicId", topic_id)])
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await?;
            let response = check_status(response).await?;

            debug!("Subscribed to deployment events");
            events::wait_for_deployed(response.bytes_stream()).await
        };

        tokio::time::timeout(self.deployment_timeout, wait)
            .await
            .map_err(|_| ApiError::Timeout(self.deployment_timeout))?
    }
}
