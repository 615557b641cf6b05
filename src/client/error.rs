//! Spheron API client error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("API key is not scoped to any organization")]
    MissingOrganization,

    #[error("event stream closed before the deployment finished")]
    EventStreamClosed,

    #[error("deployment ended with status {0}")]
    DeploymentFailed(String),

    #[error("timed out after {0:?} waiting for the deployment event")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, ApiError>;
