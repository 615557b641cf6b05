//! Spheron provider
//!
//! Resource handlers for managing Spheron compute instances and the custom
//! domains attached to them, written against the Spheron REST API.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **ProviderService trait**: the operations a host invokes (schema, configure, plan, CRUD, import)
//! - **SpheronProvider**: the implementation serving `spheron_instance` and `spheron_domain`
//! - **Schema types**: attribute schemas with plan modifiers, validation and schema-driven planning
//! - **API client**: a `reqwest` client for the cluster-instance and domain endpoints, plus
//!   the deployment event stream
//! - **Testing**: [`testing::ProviderTester`] and an in-memory API
//! - **Logging**: structured logging through `tracing`, written to stderr
//!
//! # Quick Start
//!
//! ```ignore
//! use spheron_provider::{init_logging, ProviderService, SpheronProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = SpheronProvider::new();
//!     provider.configure(json!({"token": std::env::var("SPHERON_TOKEN")?})).await?;
//!
//!     let plan = provider
//!         .plan("spheron_instance", None, json!({
//!             "image": "nginx",
//!             "tag": "latest",
//!             "cluster_name": "web",
//!             "ports": [{"container_port": 80}],
//!             "region": "any",
//!             "machine_image": "Ventus Nano 1"
//!         }), serde_json::Value::Null)
//!         .await?;
//!     let state = provider.create("spheron_instance", plan.planned_state).await?;
//!     tracing::info!(id = %state["id"], "Instance deployed");
//!     Ok(())
//! }
//! ```
//!
//! # Resources
//!
//! - **spheron_instance**: deploys a public Docker Hub image and waits for the
//!   deployment to finish. Changing the tag, commands, args or env redeploys in place.
//! - **spheron_domain**: attaches a domain or subdomain to one container port of an
//!   instance. Import ids take the form `<instance_id>/<domain_id>`.

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod resources;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::{ApiError, ClusterApi, SpheronApi};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{ProviderService, SpheronProvider};
pub use resource::Resource;
pub use schema::ProviderSchema;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
