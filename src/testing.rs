//! Testing utilities.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through its operations and
//! full plan/apply lifecycles. [`InMemoryClusterApi`] stands in for the
//! Spheron API so resources can be exercised without network access.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use spheron_provider::testing::{InMemoryClusterApi, ProviderTester};
//! use spheron_provider::SpheronProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_instance() {
//!     let api = Arc::new(InMemoryClusterApi::new());
//!     let tester = ProviderTester::new(SpheronProvider::with_api(api.clone()));
//!
//!     let state = tester.lifecycle_create("spheron_instance", json!({
//!         "image": "nginx",
//!         "tag": "latest",
//!         "cluster_name": "web",
//!         "region": "any",
//!         "machine_image": "Ventus Nano 1"
//!     })).await.unwrap();
//!
//!     assert_eq!(state["id"], "instance-1");
//! }
//! ```

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::client::{
    ApiError, Cluster, ClusterApi, ClusterInstance, CreateInstanceRequest, CreateInstanceResponse,
    Domain, DomainRequest, HealthCheck, HealthCheckUpdateRequest, InstanceOrder, MachineImage,
    OrderConfiguration, Organization, Port, ProtocolData, UpdateInstanceRequest,
    UpdateInstanceResponse,
};
use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run create → update → delete; returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// In-memory API
// =========================================================================

const TEST_PROVIDER_HOST: &str = "provider.test";

#[derive(Default)]
struct ApiState {
    counters: HashMap<&'static str, u64>,
    instances: HashMap<String, ClusterInstance>,
    orders: HashMap<String, InstanceOrder>,
    clusters: HashMap<String, Cluster>,
    domains: HashMap<String, Vec<Domain>>,
    /// Ports reported by the deployment event of each pending topic.
    topics: HashMap<String, Vec<Port>>,
    deployed_ports: Option<Vec<Port>>,
    deployment_failure: Option<String>,
    create_requests: Vec<CreateInstanceRequest>,
    waited_topics: Vec<String>,
    calls: Vec<String>,
}

impl ApiState {
    fn next_id(&mut self, kind: &'static str) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        format!("{}-{}", kind, counter)
    }

    fn record(&mut self, call: &str) {
        self.calls.push(call.to_string());
    }

    fn instance_mut(&mut self, id: &str) -> Result<&mut ClusterInstance, ApiError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| not_found("cluster instance", id))
    }
}

fn not_found(kind: &str, id: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{} {} not found", kind, id),
    }
}

/// An in-memory [`ClusterApi`].
///
/// Instances deploy immediately: every create or update publishes a deployed
/// event on its topic, carrying the requested ports unless overridden with
/// [`InMemoryClusterApi::set_deployed_ports`]. Every call is recorded by name.
#[derive(Default)]
pub struct InMemoryClusterApi {
    state: Mutex<ApiState>,
}

impl InMemoryClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance whose active order is `order`.
    pub async fn add_instance(&self, id: &str, order: InstanceOrder) {
        let mut state = self.state.lock().await;
        let cluster_id = format!("{}-cluster", id);
        state.clusters.insert(
            cluster_id.clone(),
            Cluster {
                id: cluster_id.clone(),
                name: id.to_string(),
            },
        );
        state.instances.insert(
            id.to_string(),
            ClusterInstance {
                id: id.to_string(),
                state: "Active".to_string(),
                name: id.to_string(),
                orders: vec![order.id.clone()],
                cluster: cluster_id,
                active_order: order.id.clone(),
                health_check: HealthCheck::default(),
            },
        );
        state.orders.insert(order.id.clone(), order);
    }

    /// Ports to report in subsequent deployment events.
    pub async fn set_deployed_ports(&self, ports: Vec<Port>) {
        self.state.lock().await.deployed_ports = Some(ports);
    }

    /// Make subsequent deployments end with `status`.
    pub async fn fail_deployments(&self, status: &str) {
        self.state.lock().await.deployment_failure = Some(status.to_string());
    }

    pub async fn set_health_check(&self, instance_id: &str, url: &str, port: i64) {
        let mut state = self.state.lock().await;
        if let Some(instance) = state.instances.get_mut(instance_id) {
            instance.health_check = HealthCheck {
                url: url.to_string(),
                port: Port {
                    container_port: port,
                    exposed_port: 0,
                },
            };
        }
    }

    pub async fn domains(&self, instance_id: &str) -> Vec<Domain> {
        let state = self.state.lock().await;
        state.domains.get(instance_id).cloned().unwrap_or_default()
    }

    /// Names of the API methods called so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn waited_topics(&self) -> Vec<String> {
        self.state.lock().await.waited_topics.clone()
    }

    pub async fn last_create_request(&self) -> Option<CreateInstanceRequest> {
        self.state.lock().await.create_requests.last().cloned()
    }
}

#[async_trait::async_trait]
impl ClusterApi for InMemoryClusterApi {
    async fn get_organization(&self) -> Result<Organization, ApiError> {
        self.state.lock().await.record("get_organization");
        Ok(Organization {
            id: "org-1".to_string(),
            name: "test".to_string(),
        })
    }

    async fn create_cluster_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ApiError> {
        let mut state = self.state.lock().await;
        state.record("create_cluster_instance");

        let instance_id = state.next_id("instance");
        let order_id = state.next_id("order");
        let cluster_id = state.next_id("cluster");
        let config = &request.configuration;
        let ports = state
            .deployed_ports
            .clone()
            .unwrap_or_else(|| config.ports.clone());

        state.orders.insert(
            order_id.clone(),
            InstanceOrder {
                id: order_id.clone(),
                cluster_instance_configuration: OrderConfiguration {
                    image: config.image.clone(),
                    tag: config.tag.clone(),
                    ports: ports.clone(),
                    env: config.env.clone(),
                    command: config.command.clone(),
                    args: config.args.clone(),
                    region: config.region.clone(),
                    agreed_machine_image: MachineImage {
                        machine_type: config.akash_machine_image_name.clone(),
                    },
                },
                url_preview: format!("{}.{}", instance_id, TEST_PROVIDER_HOST),
                protocol_data: Some(ProtocolData {
                    provider_host: TEST_PROVIDER_HOST.to_string(),
                }),
            },
        );
        state.clusters.insert(
            cluster_id.clone(),
            Cluster {
                id: cluster_id.clone(),
                name: request.cluster_name.clone(),
            },
        );
        state.instances.insert(
            instance_id.clone(),
            ClusterInstance {
                id: instance_id.clone(),
                state: "Active".to_string(),
                name: config.image.clone(),
                orders: vec![order_id.clone()],
                cluster: cluster_id.clone(),
                active_order: order_id.clone(),
                health_check: HealthCheck::default(),
            },
        );
        state.topics.insert(request.unique_topic_id.clone(), ports);
        let topic_id = request.unique_topic_id.clone();
        state.create_requests.push(request);

        Ok(CreateInstanceResponse {
            cluster_id,
            cluster_instance_id: instance_id,
            cluster_instance_order_id: order_id,
            topic_id,
        })
    }

    async fn get_cluster_instance(&self, id: &str) -> Result<ClusterInstance, ApiError> {
        let mut state = self.state.lock().await;
        state.record("get_cluster_instance");
        let instance = state.instance_mut(id)?.clone();
        Ok(instance)
    }

    async fn get_cluster_instance_order(&self, id: &str) -> Result<InstanceOrder, ApiError> {
        let mut state = self.state.lock().await;
        state.record("get_cluster_instance_order");
        state
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("order", id))
    }

    async fn get_cluster(&self, id: &str) -> Result<Cluster, ApiError> {
        let mut state = self.state.lock().await;
        state.record("get_cluster");
        state
            .clusters
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("cluster", id))
    }

    async fn update_cluster_instance(
        &self,
        id: &str,
        request: UpdateInstanceRequest,
    ) -> Result<UpdateInstanceResponse, ApiError> {
        let mut state = self.state.lock().await;
        state.record("update_cluster_instance");

        let active_order = state.instance_mut(id)?.active_order.clone();
        let mut order = state
            .orders
            .get(&active_order)
            .cloned()
            .ok_or_else(|| not_found("order", &active_order))?;

        order.id = state.next_id("order");
        let config = &mut order.cluster_instance_configuration;
        config.env = request.env;
        config.command = request.command;
        config.args = request.args;
        config.tag = request.tag;
        if let Some(ports) = state.deployed_ports.clone() {
            config.ports = ports;
        }
        let ports = config.ports.clone();

        let instance = state.instance_mut(id)?;
        instance.orders.push(order.id.clone());
        instance.active_order = order.id.clone();

        let order_id = order.id.clone();
        state.orders.insert(order_id.clone(), order);
        state.topics.insert(request.unique_topic_id, ports);

        Ok(UpdateInstanceResponse {
            message: "success".to_string(),
            cluster_instance_id: id.to_string(),
            cluster_instance_order_id: order_id,
        })
    }

    async fn update_cluster_instance_health_check(
        &self,
        id: &str,
        request: HealthCheckUpdateRequest,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.record("update_cluster_instance_health_check");
        state.instance_mut(id)?.health_check = HealthCheck {
            url: request.health_check_url,
            port: Port {
                container_port: request.health_check_port,
                exposed_port: 0,
            },
        };
        Ok(())
    }

    async fn close_cluster_instance(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.record("close_cluster_instance");
        state
            .instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("cluster instance", id))
    }

    async fn get_cluster_instance_domains(&self, instance_id: &str) -> Result<Vec<Domain>, ApiError> {
        let mut state = self.state.lock().await;
        state.record("get_cluster_instance_domains");
        state.instance_mut(instance_id)?;
        Ok(state.domains.get(instance_id).cloned().unwrap_or_default())
    }

    async fn add_cluster_instance_domain(
        &self,
        instance_id: &str,
        request: DomainRequest,
    ) -> Result<Domain, ApiError> {
        let mut state = self.state.lock().await;
        state.record("add_cluster_instance_domain");
        state.instance_mut(instance_id)?;

        let domain = Domain {
            id: state.next_id("domain"),
            name: request.name,
            verified: false,
            link: request.link,
            domain_type: request.domain_type.as_str().to_string(),
        };
        state
            .domains
            .entry(instance_id.to_string())
            .or_default()
            .push(domain.clone());
        Ok(domain)
    }

    async fn update_cluster_instance_domain(
        &self,
        instance_id: &str,
        domain_id: &str,
        request: DomainRequest,
    ) -> Result<Domain, ApiError> {
        let mut state = self.state.lock().await;
        state.record("update_cluster_instance_domain");

        let domain = state
            .domains
            .get_mut(instance_id)
            .and_then(|domains| domains.iter_mut().find(|d| d.id == domain_id))
            .ok_or_else(|| not_found("domain", domain_id))?;
        domain.name = request.name;
        domain.link = request.link;
        domain.domain_type = request.domain_type.as_str().to_string();
        Ok(domain.clone())
    }

    async fn delete_cluster_instance_domain(
        &self,
        instance_id: &str,
        domain_id: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.record("delete_cluster_instance_domain");

        let domains = state
            .domains
            .get_mut(instance_id)
            .ok_or_else(|| not_found("domain", domain_id))?;
        let before = domains.len();
        domains.retain(|d| d.id != domain_id);
        if domains.len() == before {
            return Err(not_found("domain", domain_id));
        }
        Ok(())
    }

    async fn wait_for_deployed_event(&self, topic_id: &str) -> Result<String, ApiError> {
        let mut state = self.state.lock().await;
        state.record("wait_for_deployed_event");
        state.waited_topics.push(topic_id.to_string());

        if let Some(status) = state.deployment_failure.clone() {
            return Err(ApiError::DeploymentFailed(status));
        }
        let ports = state
            .topics
            .remove(topic_id)
            .ok_or(ApiError::EventStreamClosed)?;

        let event = json!({
            "type": 1,
            "data": {
                "deploymentStatus": "DEPLOYED",
                "latestUrlPreview": "",
                "providerHost": TEST_PROVIDER_HOST,
                "ports": ports,
            },
            "session": topic_id,
        });
        Ok(format!("data: {}", event))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
