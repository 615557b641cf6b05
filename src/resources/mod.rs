//! Resource implementations served by the provider.

pub mod domain;
pub mod instance;

pub use domain::{DomainModel, DomainResource};
pub use instance::{EnvModel, HealthCheckModel, InstanceModel, InstanceResource, PortModel};

use crate::resource::Resource;

/// Every resource type this provider serves.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![Box::new(DomainResource), Box::new(InstanceResource)]
}
