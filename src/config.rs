//! Provider configuration.
//!
//! Values come from the provider block first and fall back to environment
//! variables:
//!
//! - `SPHERON_TOKEN`: API token (required one way or the other)
//! - `SPHERON_API_URL`: API base URL
//! - `SPHERON_DEPLOYMENT_TIMEOUT`: seconds to wait for a deployment event

use std::time::Duration;

use serde::Deserialize;

use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

pub const DEFAULT_API_URL: &str = "https://api-v2.spheron.network";
pub const DEFAULT_DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(900);

pub const ENV_TOKEN: &str = "SPHERON_TOKEN";
pub const ENV_API_URL: &str = "SPHERON_API_URL";
pub const ENV_DEPLOYMENT_TIMEOUT: &str = "SPHERON_DEPLOYMENT_TIMEOUT";

/// Provider block as written by the user; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    token: Option<String>,
    api_url: Option<String>,
    deployment_timeout_secs: Option<u64>,
}

/// Resolved provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub token: String,
    pub api_url: String,
    pub deployment_timeout: Duration,
}

impl ProviderConfig {
    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!(
                        "Spheron API token. Can also be set with {}.",
                        ENV_TOKEN
                    )),
            )
            .with_attribute(
                "api_url",
                Attribute::optional_string().with_description(format!(
                    "Spheron API base URL. Defaults to {}.",
                    DEFAULT_API_URL
                )),
            )
            .with_attribute(
                "deployment_timeout_secs",
                Attribute::optional_int64().with_description(
                    "Seconds to wait for an instance deployment to finish. Defaults to 900.",
                ),
            )
    }

    /// Resolve configuration from the provider block and the process environment.
    pub fn resolve(config: &serde_json::Value) -> Result<Self, ProviderError> {
        Self::resolve_with(config, |key| std::env::var(key).ok())
    }

    /// Resolve configuration using `lookup` in place of the process environment.
    pub fn resolve_with<F>(config: &serde_json::Value, lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = if config.is_null() {
            RawConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| ProviderError::Configuration(e.to_string()))?
        };

        let token = raw
            .token
            .filter(|t| !t.is_empty())
            .or_else(|| lookup(ENV_TOKEN).filter(|t| !t.is_empty()))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "missing API token: set `token` in the provider block or {}",
                    ENV_TOKEN
                ))
            })?;

        let api_url = raw
            .api_url
            .filter(|u| !u.is_empty())
            .or_else(|| lookup(ENV_API_URL).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let deployment_timeout = match raw.deployment_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => match lookup(ENV_DEPLOYMENT_TIMEOUT) {
                Some(value) => value.trim().parse().map(Duration::from_secs).map_err(|_| {
                    ProviderError::Configuration(format!(
                        "{} must be a whole number of seconds, got '{}'",
                        ENV_DEPLOYMENT_TIMEOUT, value
                    ))
                })?,
                None => DEFAULT_DEPLOYMENT_TIMEOUT,
            },
        };

        Ok(Self {
            token,
            api_url,
            deployment_timeout,
        })
    }
}
