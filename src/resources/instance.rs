//! `spheron_instance`: a single-container deployment of a public Docker Hub image.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::{
    parse_event_ports, ClusterApi, ClusterProtocol, CreateInstanceRequest, Env,
    HealthCheckUpdateRequest, InstanceConfiguration, Port, UpdateInstanceRequest,
};
use crate::error::ProviderError;
use crate::resource::{decode_state, encode_state, require, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock, PlanModifier, Schema};

pub const TYPE_NAME: &str = "spheron_instance";

const DEFAULT_REGION: &str = "any";
const CLUSTER_PROVIDER: &str = "DOCKERHUB";

/// State of a `spheron_instance`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceModel {
    pub id: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub cluster_name: String,
    pub ports: Option<Vec<PortModel>>,
    pub env: Option<Vec<EnvModel>>,
    pub env_secret: Option<Vec<EnvModel>>,
    pub commands: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub machine_image: String,
    pub health_check: Option<HealthCheckModel>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortModel {
    pub container_port: i64,
    /// Unknown until deployed when left unset.
    pub exposed_port: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvModel {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckModel {
    pub path: Option<String>,
    pub port: Option<i64>,
}

impl InstanceModel {
    /// Plain envs followed by secret envs, in the API's `KEY=VALUE` form.
    fn client_envs(&self) -> Vec<Env> {
        let mut envs = map_envs_to_client(self.env.as_deref().unwrap_or_default(), false);
        envs.extend(map_envs_to_client(
            self.env_secret.as_deref().unwrap_or_default(),
            true,
        ));
        envs
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceResource;

fn env_block() -> NestedBlock {
    NestedBlock::set(
        Block::new()
            .with_attribute(
                "key",
                Attribute::required_string().with_description("Environment variable key."),
            )
            .with_attribute(
                "value",
                Attribute::required_string().with_description("Environment variable value."),
            ),
    )
}

fn deployment_failed(cluster_name: &str, err: impl Display) -> ProviderError {
    ProviderError::DeploymentFailed(format!(
        "Instance deployment on cluster {} failed. {}",
        cluster_name, err
    ))
}

#[async_trait::async_trait]
impl Resource for InstanceResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Instance resource")
            .with_attribute(
                "image",
                Attribute::required_string().requires_replace().with_description(
                    "The docker image to deploy. Currently only public dockerhub images are supported.",
                ),
            )
            .with_attribute(
                "tag",
                Attribute::required_string().with_description("The tag of docker image."),
            )
            .with_attribute(
                "cluster_name",
                Attribute::required_string().with_description("The name of the cluster."),
            )
            .with_block(
                "ports",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "container_port",
                            Attribute::required_int64()
                                .with_description("Container port that will be exposed."),
                        )
                        .with_attribute(
                            "exposed_port",
                            Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed())
                                .use_state_for_unknown()
                                .with_description(
                                    "The port the container port is exposed on. Leave empty to map to a random value, known after deployment.",
                                ),
                        ),
                )
                .with_plan_modifier(PlanModifier::RequiresReplaceIfConfigured),
            )
            .with_block("env", env_block())
            .with_block("env_secret", env_block())
            .with_attribute(
                "commands",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional())
                    .with_description("List of executables for docker CMD command."),
            )
            .with_attribute(
                "args",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional())
                    .with_description("List of params for docker CMD command."),
            )
            .with_attribute(
                "region",
                Attribute::required_string()
                    .requires_replace()
                    .with_description("Region to which to deploy instance."),
            )
            .with_attribute(
                "machine_image",
                Attribute::required_string()
                    .requires_replace()
                    .with_description("Machine image name which should be used for deploying instance."),
            )
            .with_attribute(
                "health_check",
                Attribute::new(
                    AttributeType::object([
                        ("path", AttributeType::String),
                        ("port", AttributeType::Int64),
                    ]),
                    AttributeFlags::optional(),
                )
                .with_description("Path and container port on which health check should be done."),
            )
            .with_attribute(
                "id",
                Attribute::new(AttributeType::String, AttributeFlags::optional_computed())
                    .use_state_for_unknown()
                    .with_description("Id of the instance."),
            )
    }

    #[instrument(skip(self, api, planned_state), name = "instance.create")]
    async fn create(&self, api: &dyn ClusterApi, planned_state: Value) -> Result<Value, ProviderError> {
        let mut model: InstanceModel = decode_state(planned_state)?;

        let organization = api
            .get_organization()
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to get organization"))?;

        let region = if model.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            model.region.clone()
        };
        let topic_id = Uuid::new_v4().to_string();
        let health_check_url = model
            .health_check
            .as_ref()
            .and_then(|hc| hc.path.clone())
            .unwrap_or_default();

        let request = CreateInstanceRequest {
            organization_id: organization.id,
            unique_topic_id: topic_id.clone(),
            configuration: InstanceConfiguration {
                folder_name: String::new(),
                protocol: ClusterProtocol::Akash,
                image: model.image.clone(),
                tag: model.tag.clone(),
                instance_count: 1,
                build_image: false,
                ports: map_ports_to_client(model.ports.as_deref().unwrap_or_default()),
                env: model.client_envs(),
                command: model.commands.clone().unwrap_or_default(),
                args: model.args.clone().unwrap_or_default(),
                region,
                akash_machine_image_name: model.machine_image.clone(),
            },
            cluster_url: model.image.clone(),
            cluster_provider: CLUSTER_PROVIDER.to_string(),
            cluster_name: model.cluster_name.clone(),
            health_check_url,
            health_check_port: String::new(),
        };

        let response = api
            .create_cluster_instance(request)
            .await
            .map_err(|e| ProviderError::from(e).context("Error creating instance"))?;
        debug!(instance_id = %response.cluster_instance_id, %topic_id, "Waiting for deployment");

        let event = api
            .wait_for_deployed_event(&topic_id)
            .await
            .map_err(|e| deployment_failed(&model.cluster_name, e))?;
        let ports = parse_event_ports(&event).map_err(|e| deployment_failed(&model.cluster_name, e))?;

        model.id = Some(response.cluster_instance_id);
        model.ports = map_client_ports(&ports);

        info!(id = ?model.id, cluster = %model.cluster_name, "Instance deployed");
        encode_state(&model)
    }

    #[instrument(skip(self, api, current_state), name = "instance.read")]
    async fn read(&self, api: &dyn ClusterApi, current_state: Value) -> Result<Value, ProviderError> {
        let mut model: InstanceModel = decode_state(current_state)?;
        debug!("Preparing to read instance resource");

        let id = require(&model.id, "Id not provided. Unable to get instance details.")?;

        let instance = api
            .get_cluster_instance(id)
            .await
            .map_err(|e| ProviderError::from(e).context("Couldn't fetch instance by provided id"))?;

        let order = api
            .get_cluster_instance_order(&instance.active_order)
            .await
            .map_err(|e| ProviderError::from(e).context("Instance doesn't have provisioned deployments"))?;

        let cluster = api
            .get_cluster(&instance.cluster)
            .await
            .map_err(|e| ProviderError::from(e).context("Instance cluster not found"))?;

        let config = order.cluster_instance_configuration;
        model.args = non_empty(config.args);
        model.cluster_name = cluster.name;
        model.commands = non_empty(config.command);
        model.env = map_client_envs(&config.env, false);
        model.env_secret = map_client_envs(&config.env, true);

        if instance.health_check.port != Port::default() {
            model.health_check = Some(HealthCheckModel {
                path: Some(instance.health_check.url),
                port: Some(instance.health_check.port.container_port),
            });
        }

        model.image = config.image;
        model.machine_image = config.agreed_machine_image.machine_type;
        model.ports = map_client_ports(&config.ports);
        model.region = config.region;
        model.tag = config.tag;

        encode_state(&model)
    }

    #[instrument(skip(self, api, prior_state, planned_state), name = "instance.update")]
    async fn update(
        &self,
        api: &dyn ClusterApi,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let prior: InstanceModel = decode_state(prior_state)?;
        let mut model: InstanceModel = decode_state(planned_state)?;
        if model.id.is_none() {
            model.id = prior.id;
        }
        let id = require(&model.id, "Id not provided. Unable to update instance.")?.to_string();

        let organization = api
            .get_organization()
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to get organization"))?;

        if let Some(HealthCheckModel {
            path: Some(path),
            port: Some(port),
        }) = &model.health_check
        {
            let request = HealthCheckUpdateRequest {
                health_check_url: path.clone(),
                health_check_port: *port,
            };
            api.update_cluster_instance_health_check(&id, request)
                .await
                .map_err(|e| {
                    ProviderError::from(e).context("Unable to update instance health check endpoint")
                })?;
        }

        let instance = api
            .get_cluster_instance(&id)
            .await
            .map_err(|e| ProviderError::from(e).context("Couldn't fetch instance by provided id"))?;

        let order = api
            .get_cluster_instance_order(&instance.active_order)
            .await
            .map_err(|e| ProviderError::from(e).context("Instance doesn't have provisioned deployments"))?;

        let envs = model.client_envs();
        let commands = model.commands.clone().unwrap_or_default();
        let args = model.args.clone().unwrap_or_default();
        let active = &order.cluster_instance_configuration;

        let unchanged = active.args == args
            && active.command == commands
            && same_envs(&active.env, &envs)
            && active.tag == model.tag;

        if unchanged {
            debug!("Deployment configuration unchanged");
        } else {
            let topic_id = Uuid::new_v4().to_string();
            let request = UpdateInstanceRequest {
                env: envs,
                command: commands,
                args,
                unique_topic_id: topic_id.clone(),
                tag: model.tag.clone(),
                organization_id: organization.id,
            };

            api.update_cluster_instance(&id, request)
                .await
                .map_err(|e| ProviderError::from(e).context("Unable to update instance"))?;

            api.wait_for_deployed_event(&topic_id).await.map_err(|e| {
                warn!(%topic_id, error = %e, "Redeployment did not complete");
                deployment_failed(&model.cluster_name, e)
            })?;
        }

        debug!(success = true, "Updated instance resource");
        encode_state(&model)
    }

    #[instrument(skip(self, api, current_state), name = "instance.delete")]
    async fn delete(&self, api: &dyn ClusterApi, current_state: Value) -> Result<(), ProviderError> {
        let model: InstanceModel = decode_state(current_state)?;
        let id = require(&model.id, "Id not provided. Unable to destroy instance.")?;

        api.close_cluster_instance(id)
            .await
            .map_err(|e| ProviderError::from(e).context("Unable to destroy instance"))?;

        debug!(success = true, "Instance closed");
        Ok(())
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Env lists compare as sets: order in configuration is not significant.
fn same_envs(a: &[Env], b: &[Env]) -> bool {
    let key = |e: &Env| (e.value.clone(), e.is_secret);
    let mut a: Vec<_> = a.iter().map(key).collect();
    let mut b: Vec<_> = b.iter().map(key).collect();
    a.sort();
    b.sort();
    a == b
}

/// Exposed ports default to the container port when unset or zero.
pub fn map_ports_to_client(ports: &[PortModel]) -> Vec<Port> {
    ports
        .iter()
        .map(|p| Port {
            container_port: p.container_port,
            exposed_port: p
                .exposed_port
                .filter(|&exposed| exposed != 0)
                .unwrap_or(p.container_port),
        })
        .collect()
}

pub fn map_client_ports(ports: &[Port]) -> Option<Vec<PortModel>> {
    let ports: Vec<_> = ports
        .iter()
        .map(|p| PortModel {
            container_port: p.container_port,
            exposed_port: Some(p.exposed_port),
        })
        .collect();
    non_empty(ports)
}

pub fn map_envs_to_client(envs: &[EnvModel], is_secret: bool) -> Vec<Env> {
    envs.iter()
        .map(|env| Env {
            value: format!("{}={}", env.key, env.value),
            is_secret,
        })
        .collect()
}

/// Envs of the given secrecy split on the first `=`; `None` when there are none.
pub fn map_client_envs(envs: &[Env], is_secret: bool) -> Option<Vec<EnvModel>> {
    let envs: Vec<_> = envs
        .iter()
        .filter(|env| env.is_secret == is_secret)
        .map(|env| {
            let (key, value) = env.value.split_once('=').unwrap_or((env.value.as_str(), ""));
            EnvModel {
                key: key.to_string(),
                value: value.to_string(),
            }
        })
        .collect();
    non_empty(envs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_has_errors, assert_no_errors, InMemoryClusterApi};
    use serde_json::json;

    fn config() -> Value {
        json!({
            "image": "nginx",
            "tag": "1.25",
            "cluster_name": "web",
            "ports": [{"container_port": 80}, {"container_port": 9090, "exposed_port": 31555}],
            "env": [{"key": "MODE", "value": "prod"}],
            "env_secret": [{"key": "TOKEN", "value": "a=b"}],
            "region": "us-east",
            "machine_image": "Ventus Nano 1"
        })
    }

    #[test]
    fn test_map_ports_to_client_defaults_exposed() {
        let ports = map_ports_to_client(&[
            PortModel {
                container_port: 80,
                exposed_port: None,
            },
            PortModel {
                container_port: 3000,
                exposed_port: Some(0),
            },
            PortModel {
                container_port: 9090,
                exposed_port: Some(31555),
            },
        ]);

        assert_eq!(ports[0].exposed_port, 80);
        assert_eq!(ports[1].exposed_port, 3000);
        assert_eq!(ports[2].exposed_port, 31555);
        assert_eq!(map_client_ports(&[]), None);
    }

    #[test]
    fn test_env_mapping() {
        let envs = vec![
            Env {
                value: "MODE=prod".to_string(),
                is_secret: false,
            },
            Env {
                value: "TOKEN=a=b".to_string(),
                is_secret: true,
            },
            Env {
                value: "FLAG".to_string(),
                is_secret: false,
            },
        ];

        let plain = map_client_envs(&envs, false).unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[1].key, "FLAG");
        assert_eq!(plain[1].value, "");

        let secret = map_client_envs(&envs, true).unwrap();
        assert_eq!(secret[0].key, "TOKEN");
        assert_eq!(secret[0].value, "a=b");

        assert_eq!(map_client_envs(&envs[..1], true), None);

        let back = map_envs_to_client(&secret, true);
        assert_eq!(back, vec![envs[1].clone()]);
    }

    #[test]
    fn test_same_envs_ignores_order() {
        let a = map_envs_to_client(
            &[
                EnvModel {
                    key: "A".to_string(),
                    value: "1".to_string(),
                },
                EnvModel {
                    key: "B".to_string(),
                    value: "2".to_string(),
                },
            ],
            false,
        );
        let mut b = a.clone();
        b.reverse();
        assert!(same_envs(&a, &b));

        b[0].is_secret = true;
        assert!(!same_envs(&a, &b));
    }

    #[test]
    fn test_validate() {
        let resource = InstanceResource;
        assert_no_errors(&resource.validate(&config()));

        let mut missing = config();
        missing.as_object_mut().unwrap().remove("image");
        assert_has_errors(&resource.validate(&missing));
    }

    #[tokio::test]
    async fn test_create_sends_request_and_reads_event_ports() {
        let api = InMemoryClusterApi::new();
        api.set_deployed_ports(vec![
            Port {
                container_port: 80,
                exposed_port: 80,
            },
            Port {
                container_port: 9090,
                exposed_port: 31555,
            },
        ])
        .await;

        let state = InstanceResource.create(&api, config()).await.unwrap();
        assert_eq!(state["id"], "instance-1");
        assert_eq!(state["ports"][0]["exposed_port"], 80);
        assert_eq!(state["ports"][1]["exposed_port"], 31555);

        let request = api.last_create_request().await.unwrap();
        assert_eq!(request.organization_id, "org-1");
        assert_eq!(request.cluster_url, "nginx");
        assert_eq!(request.cluster_provider, "DOCKERHUB");
        assert_eq!(request.configuration.instance_count, 1);
        assert_eq!(request.configuration.protocol, ClusterProtocol::Akash);
        assert_eq!(request.configuration.ports[0].exposed_port, 80);
        assert_eq!(request.configuration.env[0].value, "MODE=prod");
        assert!(request.configuration.env[1].is_secret);
        assert!(Uuid::parse_str(&request.unique_topic_id).is_ok());
        assert_eq!(api.waited_topics().await, vec![request.unique_topic_id.clone()]);
    }

    #[tokio::test]
    async fn test_create_defaults_region() {
        let api = InMemoryClusterApi::new();
        let mut config = config();
        config["region"] = json!("");
        config["health_check"] = json!({"path": "/healthz", "port": 80});

        InstanceResource.create(&api, config).await.unwrap();
        let request = api.last_create_request().await.unwrap();
        assert_eq!(request.configuration.region, "any");
        assert_eq!(request.health_check_url, "/healthz");
        assert_eq!(request.health_check_port, "");
    }

    #[tokio::test]
    async fn test_create_deployment_failure() {
        let api = InMemoryClusterApi::new();
        api.fail_deployments("DEPLOYMENT_FAILED").await;

        let err = InstanceResource.create(&api, config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::DeploymentFailed(_)));
        assert!(err
            .message()
            .starts_with("Instance deployment on cluster web failed."));
    }

    #[tokio::test]
    async fn test_read_maps_active_order() {
        let api = InMemoryClusterApi::new();
        let created = InstanceResource.create(&api, config()).await.unwrap();
        api.set_health_check("instance-1", "/healthz", 80).await;

        let state = InstanceResource
            .read(&api, json!({"id": created["id"]}))
            .await
            .unwrap();

        assert_eq!(state["image"], "nginx");
        assert_eq!(state["tag"], "1.25");
        assert_eq!(state["cluster_name"], "web");
        assert_eq!(state["region"], "us-east");
        assert_eq!(state["machine_image"], "Ventus Nano 1");
        assert_eq!(state["env"], json!([{"key": "MODE", "value": "prod"}]));
        assert_eq!(state["env_secret"], json!([{"key": "TOKEN", "value": "a=b"}]));
        assert_eq!(state["health_check"], json!({"path": "/healthz", "port": 80}));
        assert!(state["commands"].is_null());
        assert_eq!(state["ports"][1]["container_port"], 9090);
    }

    #[tokio::test]
    async fn test_read_without_id() {
        let api = InMemoryClusterApi::new();
        let err = InstanceResource.read(&api, json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_unchanged_skips_redeploy() {
        let api = InMemoryClusterApi::new();
        let created = InstanceResource.create(&api, config()).await.unwrap();

        let mut planned = config();
        planned["id"] = created["id"].clone();
        InstanceResource
            .update(&api, created, planned)
            .await
            .unwrap();

        assert!(!api.calls().await.contains(&"update_cluster_instance".to_string()));
        assert_eq!(api.waited_topics().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_redeploys_on_tag_change() {
        let api = InMemoryClusterApi::new();
        let created = InstanceResource.create(&api, config()).await.unwrap();

        let mut planned = config();
        planned["id"] = created["id"].clone();
        planned["tag"] = json!("1.26");
        planned["health_check"] = json!({"path": "/healthz", "port": 80});
        let state = InstanceResource
            .update(&api, created, planned.clone())
            .await
            .unwrap();

        assert_eq!(state, serde_json::to_value(decode_state::<InstanceModel>(planned).unwrap()).unwrap());
        let calls = api.calls().await;
        assert!(calls.contains(&"update_cluster_instance_health_check".to_string()));
        assert!(calls.contains(&"update_cluster_instance".to_string()));
        assert_eq!(api.waited_topics().await.len(), 2);

        let read = InstanceResource.read(&api, state).await.unwrap();
        assert_eq!(read["tag"], "1.26");
        assert_eq!(read["health_check"]["path"], "/healthz");
    }

    #[tokio::test]
    async fn test_update_health_check_needs_path_and_port() {
        let api = InMemoryClusterApi::new();
        let created = InstanceResource.create(&api, config()).await.unwrap();

        let mut planned = config();
        planned["id"] = created["id"].clone();
        planned["health_check"] = json!({"path": "/healthz"});
        InstanceResource.update(&api, created, planned).await.unwrap();

        assert!(!api
            .calls()
            .await
            .contains(&"update_cluster_instance_health_check".to_string()));
    }

    #[tokio::test]
    async fn test_delete_and_import() {
        let api = InMemoryClusterApi::new();
        let created = InstanceResource.create(&api, config()).await.unwrap();

        let imported = InstanceResource.import(&api, "instance-1").await.unwrap();
        assert_eq!(imported["id"], "instance-1");
        assert_eq!(imported["image"], "nginx");

        InstanceResource.delete(&api, created).await.unwrap();
        let err = InstanceResource.import(&api, "instance-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
