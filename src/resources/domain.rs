//! `spheron_domain`: a custom domain attached to one exposed port of an instance.
//!
//! The API stores a domain's target as a link (the instance's preview URL or
//! `providerHost:exposedPort`), while users configure the container port. The
//! helpers at the bottom translate between the two.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::client::{ClusterApi, Domain, DomainRequest, DomainType, InstanceOrder};
use crate::error::ProviderError;
use crate::resource::{decode_state, encode_state, require, Resource};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation;

pub const TYPE_NAME: &str = "spheron_domain";

const UNSUPPORTED_TYPE: &str =
    "DomainType not supported. Supported domain types are: domain and subdomain.";

/// State of a `spheron_domain`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainModel {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub verified: Option<bool>,
    #[serde(default)]
    pub instance_port: i64,
    #[serde(rename = "type", default)]
    pub domain_type: String,
    pub instance_id: Option<String>,
}

impl DomainModel {
    fn parsed_type(&self) -> Result<DomainType, ProviderError> {
        self.domain_type
            .parse()
            .map_err(|_| ProviderError::Validation(UNSUPPORTED_TYPE.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DomainResource;

impl DomainResource {
    /// Resolve the link a domain should point at and build the request body.
    async fn domain_request(
        &self,
        api: &dyn ClusterApi,
        model: &DomainModel,
    ) -> Result<(String, DomainRequest), ProviderError> {
        let domain_type = model.parsed_type()?;
        let instance_id = require(&model.instance_id, "instance_id must be set")?.to_string();

        let order = active_order(api, &instance_id).await?;
        let link = get_instance_deployment_url(&order, model.instance_port).ok_or_else(|| {
            ProviderError::FailedPrecondition(format!(
                "instance {} exposes no deployment URL for container port {}",
                instance_id, model.instance_port
            ))
        })?;
        debug!(%link, "Resolved domain link");

        Ok((
            instance_id,
            DomainRequest {
                name: model.name.clone(),
                domain_type,
                link,
            },
        ))
    }
}

async fn active_order(api: &dyn ClusterApi, instance_id: &str) -> Result<InstanceOrder, ProviderError> {
    let instance = api.get_cluster_instance(instance_id).await?;
    Ok(api.get_cluster_instance_order(&instance.active_order).await?)
}

#[async_trait::async_trait]
impl Resource for DomainResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Instance domain resource")
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("Id of the domain."),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .requires_replace()
                    .with_description("The domain name"),
            )
            .with_attribute(
                "verified",
                Attribute::computed_bool().with_description(
                    "True once the domain is verified and starts serving the instance.",
                ),
            )
            .with_attribute(
                "instance_port",
                Attribute::required_int64()
                    .with_description("Container port of the instance to attach the domain to."),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .requires_replace()
                    .with_description("Type of the domain: `domain` or `subdomain`."),
            )
            .with_attribute(
                "instance_id",
                Attribute::required_string()
                    .requires_replace()
                    .with_description("The id of the instance to attach the domain to."),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);
        if let Some(domain_type) = config.get("type").and_then(Value::as_str) {
            if domain_type.parse::<DomainType>().is_err() {
                diagnostics.push(
                    Diagnostic::error("DomainType not supported.")
                        .with_detail(UNSUPPORTED_TYPE)
                        .with_attribute("type"),
                );
            }
        }
        diagnostics
    }

    #[instrument(skip(self, api, planned_state), name = "domain.create")]
    async fn create(&self, api: &dyn ClusterApi, planned_state: Value) -> Result<Value, ProviderError> {
        let mut model: DomainModel = decode_state(planned_state)?;

        let (instance_id, request) = self
            .domain_request(api, &model)
            .await
            .map_err(|e| e.context("Unable to create domain for instance"))?;

        let domain = api
            .add_cluster_instance_domain(&instance_id, request)
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to create domain"))?;

        model.id = Some(domain.id);
        model.verified = Some(domain.verified);
        info!(domain = %model.name, %instance_id, "Domain created");
        encode_state(&model)
    }

    #[instrument(skip(self, api, current_state), name = "domain.read")]
    async fn read(&self, api: &dyn ClusterApi, current_state: Value) -> Result<Value, ProviderError> {
        let mut model: DomainModel = decode_state(current_state)?;
        debug!("Preparing to read domain resource");

        const MISSING_IDS: &str = "Id or instanceId not provided. Unable to get domain details.";
        let id = require(&model.id, MISSING_IDS)?.to_string();
        let instance_id = require(&model.instance_id, MISSING_IDS)?.to_string();

        let domains = api
            .get_cluster_instance_domains(&instance_id)
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context("Couldn't fetch instance domains for provided instance id")
            })?;

        let instance = api
            .get_cluster_instance(&instance_id)
            .await
            .map_err(|e| ProviderError::from(e).context("Couldn't fetch instance for specified domain"))?;

        let order = api
            .get_cluster_instance_order(&instance.active_order)
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context("Instance the domain is attached to doesn't have provisioned deployments")
            })?;

        let domain = find_domain_by_id(&domains, &id)?;
        let container_port = get_port_from_deployment_url(&order, &domain.link)
            .map_err(|e| e.context("Instance doesn't have provisioned deployments"))?;

        model.instance_port = container_port;
        model.name = domain.name.clone();
        model.verified = Some(domain.verified);
        model.domain_type = domain.domain_type.clone();

        encode_state(&model)
    }

    #[instrument(skip(self, api, prior_state, planned_state), name = "domain.update")]
    async fn update(
        &self,
        api: &dyn ClusterApi,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let prior: DomainModel = decode_state(prior_state)?;
        let mut model: DomainModel = decode_state(planned_state)?;
        if model.id.is_none() {
            model.id = prior.id;
        }
        let id = require(&model.id, "Id not provided. Unable to update domain.")?.to_string();

        let (instance_id, request) = self
            .domain_request(api, &model)
            .await
            .map_err(|e| e.context("Unable to update domain for instance"))?;

        let domain = api
            .update_cluster_instance_domain(&instance_id, &id, request)
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to update domain"))?;

        model.verified = Some(domain.verified);
        debug!(success = true, "Updated domain resource");
        encode_state(&model)
    }

    #[instrument(skip(self, api, current_state), name = "domain.delete")]
    async fn delete(&self, api: &dyn ClusterApi, current_state: Value) -> Result<(), ProviderError> {
        let model: DomainModel = decode_state(current_state)?;
        let id = require(&model.id, "Id not provided. Unable to delete domain.")?;
        let instance_id = require(&model.instance_id, "instance_id not provided. Unable to delete domain.")?;

        api.delete_cluster_instance_domain(instance_id, id)
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to destroy domain"))?;

        debug!(success = true, "Domain deleted");
        Ok(())
    }

    /// Import ids take the form `<instance_id>/<domain_id>`.
    async fn import(&self, api: &dyn ClusterApi, id: &str) -> Result<Value, ProviderError> {
        let state = match id.split_once('/') {
            Some((instance_id, domain_id)) => json!({"id": domain_id, "instance_id": instance_id}),
            None => json!({ "id": id }),
        };
        self.read(api, state).await
    }
}

/// The link a domain must point at to reach `desired_port` of the order's container.
///
/// Port 80 is served on the order's preview URL when it has one; every other
/// port is reachable at `providerHost:exposedPort`. Returns `None` until the
/// order has a provider host, or when no port maps `desired_port`.
pub fn get_instance_deployment_url(order: &InstanceOrder, desired_port: i64) -> Option<String> {
    let host = order.provider_host()?;
    let port = order
        .cluster_instance_configuration
        .ports
        .iter()
        .find(|p| p.container_port == desired_port)?;

    if port.exposed_port == 80 && !order.url_preview.is_empty() {
        return Some(order.url_preview.clone());
    }
    Some(format!("{}:{}", host, port.exposed_port))
}

/// Reverse of [`get_instance_deployment_url`]: the container port a link points at.
pub fn get_port_from_deployment_url(order: &InstanceOrder, url: &str) -> Result<i64, ProviderError> {
    if let Some(host) = order.provider_host() {
        for port in &order.cluster_instance_configuration.ports {
            if url == order.url_preview && port.exposed_port == 80 {
                return Ok(port.container_port);
            }
            if url == format!("{}:{}", host, port.exposed_port) {
                return Ok(port.container_port);
            }
        }
    }

    Err(ProviderError::NotFound(
        "no matching port found for the provided URL".to_string(),
    ))
}

pub fn find_domain_by_id<'a>(domains: &'a [Domain], id: &str) -> Result<&'a Domain, ProviderError> {
    domains
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| ProviderError::NotFound(format!("Domain with ID {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{OrderConfiguration, Port, ProtocolData};
    use crate::testing::{assert_error_contains, assert_no_errors, InMemoryClusterApi};

    fn order(url_preview: &str, host: &str, ports: &[(i64, i64)]) -> InstanceOrder {
        InstanceOrder {
            id: "order-1".to_string(),
            url_preview: url_preview.to_string(),
            protocol_data: Some(ProtocolData {
                provider_host: host.to_string(),
            }),
            cluster_instance_configuration: OrderConfiguration {
                ports: ports
                    .iter()
                    .map(|&(container_port, exposed_port)| Port {
                        container_port,
                        exposed_port,
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_deployment_url_prefers_preview_for_port_80() {
        let order = order("app.preview.net", "provider.net", &[(3000, 80), (9090, 31555)]);

        assert_eq!(
            get_instance_deployment_url(&order, 3000),
            Some("app.preview.net".to_string())
        );
        assert_eq!(
            get_instance_deployment_url(&order, 9090),
            Some("provider.net:31555".to_string())
        );
        assert_eq!(get_instance_deployment_url(&order, 1234), None);
    }

    #[test]
    fn test_deployment_url_without_preview_uses_host() {
        let order = order("", "provider.net", &[(3000, 80)]);
        assert_eq!(
            get_instance_deployment_url(&order, 3000),
            Some("provider.net:80".to_string())
        );
    }

    #[test]
    fn test_deployment_url_requires_provider_host() {
        let mut order = order("app.preview.net", "", &[(3000, 80)]);
        assert_eq!(get_instance_deployment_url(&order, 3000), None);

        order.protocol_data = None;
        assert_eq!(get_instance_deployment_url(&order, 3000), None);
    }

    #[test]
    fn test_port_from_deployment_url() {
        let order = order("app.preview.net", "provider.net", &[(3000, 80), (9090, 31555)]);

        assert_eq!(get_port_from_deployment_url(&order, "app.preview.net").unwrap(), 3000);
        assert_eq!(
            get_port_from_deployment_url(&order, "provider.net:31555").unwrap(),
            9090
        );

        let err = get_port_from_deployment_url(&order, "other.net:1").unwrap_err();
        assert!(err.message().contains("no matching port"));
    }

    #[test]
    fn test_find_domain_by_id() {
        let domains = vec![Domain {
            id: "d-1".to_string(),
            name: "app.example.com".to_string(),
            verified: false,
            link: String::new(),
            domain_type: "domain".to_string(),
        }];

        assert_eq!(find_domain_by_id(&domains, "d-1").unwrap().name, "app.example.com");
        assert!(matches!(
            find_domain_by_id(&domains, "d-2"),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let resource = DomainResource;
        let config = json!({
            "name": "app.example.com",
            "instance_port": 80,
            "type": "doain",
            "instance_id": "inst-1"
        });
        let diagnostics = resource.validate(&config);
        assert_error_contains(&diagnostics, "DomainType not supported");

        let config = json!({
            "name": "app.example.com",
            "instance_port": 80,
            "type": "subdomain",
            "instance_id": "inst-1"
        });
        assert_no_errors(&resource.validate(&config));
    }

    fn planned(port: i64) -> Value {
        json!({
            "name": "app.example.com",
            "instance_port": port,
            "type": "domain",
            "instance_id": "inst-1"
        })
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let api = InMemoryClusterApi::new();
        api.add_instance("inst-1", order("app.preview.net", "provider.net", &[(3000, 80), (9090, 31555)]))
            .await;
        let resource = DomainResource;

        let state = resource.create(&api, planned(3000)).await.unwrap();
        assert_eq!(state["id"], "domain-1");
        assert_eq!(state["verified"], false);
        assert_eq!(api.domains("inst-1").await[0].link, "app.preview.net");

        let read = resource.read(&api, state.clone()).await.unwrap();
        assert_eq!(read["instance_port"], 3000);
        assert_eq!(read["type"], "domain");

        let mut next = planned(9090);
        next["id"] = state["id"].clone();
        let updated = resource.update(&api, state, next).await.unwrap();
        assert_eq!(updated["instance_port"], 9090);
        assert_eq!(api.domains("inst-1").await[0].link, "provider.net:31555");

        resource.delete(&api, updated).await.unwrap();
        assert!(api.domains("inst-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_for_unexposed_port() {
        let api = InMemoryClusterApi::new();
        api.add_instance("inst-1", order("", "provider.net", &[(3000, 31000)]))
            .await;

        let err = DomainResource.create(&api, planned(8080)).await.unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert!(err.message().starts_with("Unable to create domain for instance"));
        assert!(api.domains("inst-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_type_before_api_calls() {
        let api = InMemoryClusterApi::new();
        let mut state = planned(3000);
        state["type"] = json!("wildcard");

        let err = DomainResource.create(&api, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_read_requires_ids() {
        let api = InMemoryClusterApi::new();
        let err = DomainResource
            .read(&api, json!({"id": "domain-1"}))
            .await
            .unwrap_err();
        assert!(err.message().contains("Id or instanceId not provided"));
    }

    #[tokio::test]
    async fn test_read_missing_domain_is_not_found() {
        let api = InMemoryClusterApi::new();
        api.add_instance("inst-1", order("", "provider.net", &[(3000, 31000)]))
            .await;

        let err = DomainResource
            .read(&api, json!({"id": "gone", "instance_id": "inst-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_import_with_instance_prefix() {
        let api = InMemoryClusterApi::new();
        api.add_instance("inst-1", order("", "provider.net", &[(3000, 31000)]))
            .await;
        let resource = DomainResource;
        let created = resource.create(&api, planned(3000)).await.unwrap();

        let imported = resource.import(&api, "inst-1/domain-1").await.unwrap();
        assert_eq!(imported["id"], created["id"]);
        assert_eq!(imported["instance_id"], "inst-1");
        assert_eq!(imported["name"], "app.example.com");
        assert_eq!(imported["instance_port"], 3000);
    }
}
