//! The provider service: the operations the host framework invokes.
//!
//! [`ProviderService`] is the host-facing surface. [`SpheronProvider`] implements
//! it by dispatching each call to the [`Resource`] registered for the requested
//! type, handing it the API client built during `configure`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ClusterApi, SpheronApi};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resource::Resource;
use crate::resources;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};
use crate::validation;

/// Operations a provider serves to its host.
///
/// State and configuration travel as `serde_json::Value`; failures are
/// returned as [`ProviderError`] and validation problems as [`Diagnostic`]s.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.schema().resources.keys().cloned().collect();
        resources.sort();
        ProviderMetadata { resources }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    /// Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// The Spheron provider.
pub struct SpheronProvider {
    api: RwLock<Option<Arc<dyn ClusterApi>>>,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
}

impl Default for SpheronProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SpheronProvider {
    /// Create an unconfigured provider serving every built-in resource.
    pub fn new() -> Self {
        let resources = resources::all()
            .into_iter()
            .map(|resource| (resource.type_name(), resource))
            .collect();
        Self {
            api: RwLock::new(None),
            resources,
        }
    }

    /// Create a provider already bound to `api`; `configure` is then optional.
    pub fn with_api(api: Arc<dyn ClusterApi>) -> Self {
        let provider = Self::new();
        Self {
            api: RwLock::new(Some(api)),
            ..provider
        }
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|resource| &**resource)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn api(&self) -> Result<Arc<dyn ClusterApi>, ProviderError> {
        self.api.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration(
                "provider is not configured; configure must succeed before resource operations"
                    .to_string(),
            )
        })
    }
}

#[async_trait::async_trait]
impl ProviderService for SpheronProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, (name, resource)| schema.with_resource(*name, resource.schema()),
        )
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&ProviderConfig::schema(), &config))
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.validate_provider_config(config.clone()).await?;
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
            return Ok(diagnostics);
        }

        let resolved = match ProviderConfig::resolve(&config) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(error = %e, "Configure failed");
                return Ok(vec![Diagnostic::from(&e)]);
            },
        };

        let api = match SpheronApi::new(&resolved) {
            Ok(api) => api,
            Err(e) => {
                let e = ProviderError::from(e).context("Unable to create Spheron API client");
                error!(error = %e, "Configure failed");
                return Ok(vec![Diagnostic::from(&e)]);
            },
        };

        *self.api.write().await = Some(Arc::new(api));
        info!(api_url = %resolved.api_url, "Configure completed successfully");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        self.api.write().await.take();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.resource(resource_type)?.validate(&config))
    }

    #[instrument(skip(self, prior_state, proposed_state, config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        let plan = plan_resource(&schema, prior_state.as_ref(), &proposed_state, &config);
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Plan completed"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let api = self.api().await?;
        resource.create(api.as_ref(), planned_state).await.map_err(|e| {
            error!(error = %e, "Create failed");
            e
        })
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let api = self.api().await?;
        resource.read(api.as_ref(), current_state).await
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let api = self.api().await?;
        resource
            .update(api.as_ref(), prior_state, planned_state)
            .await
            .map_err(|e| {
                error!(error = %e, "Update failed");
                e
            })
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let api = self.api().await?;
        resource.delete(api.as_ref(), current_state).await
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let api = self.api().await?;
        let state = resource.import(api.as_ref(), id).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}
