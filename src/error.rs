//! Error types for the Spheron provider.

use thiserror::Error;

use crate::client::ApiError;

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The Spheron API is unreachable or returned a server error.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// The API rejected the request payload.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An instance deployment did not reach the deployed state.
    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::AlreadyExists(msg) => msg,
            Self::PermissionDenied(msg) => msg,
            Self::ResourceExhausted(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::Unimplemented(msg) => msg,
            Self::InvalidRequest(msg) => msg,
            Self::DeploymentFailed(msg) => msg,
        }
    }

    /// Prefix the message with a short description of what was being attempted.
    ///
    /// The variant is preserved so callers can still match on the kind.
    /// `Serialization` carries no message of its own and passes through unchanged.
    pub fn context(self, summary: &str) -> Self {
        let wrap = |msg: String| format!("{}: {}", summary, msg);
        match self {
            Self::NotFound(msg) => Self::NotFound(wrap(msg)),
            Self::Validation(msg) => Self::Validation(wrap(msg)),
            Self::Configuration(msg) => Self::Configuration(wrap(msg)),
            Self::UnknownResource(msg) => Self::UnknownResource(msg),
            Self::Serialization(err) => Self::Serialization(err),
            Self::AlreadyExists(msg) => Self::AlreadyExists(wrap(msg)),
            Self::PermissionDenied(msg) => Self::PermissionDenied(wrap(msg)),
            Self::ResourceExhausted(msg) => Self::ResourceExhausted(wrap(msg)),
            Self::Unavailable(msg) => Self::Unavailable(wrap(msg)),
            Self::DeadlineExceeded(msg) => Self::DeadlineExceeded(wrap(msg)),
            Self::FailedPrecondition(msg) => Self::FailedPrecondition(wrap(msg)),
            Self::Unimplemented(msg) => Self::Unimplemented(msg),
            Self::InvalidRequest(msg) => Self::InvalidRequest(wrap(msg)),
            Self::DeploymentFailed(msg) => Self::DeploymentFailed(wrap(msg)),
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, message } => match status {
                400 | 422 => ProviderError::InvalidRequest(message),
                401 | 403 => ProviderError::PermissionDenied(message),
                404 => ProviderError::NotFound(message),
                409 => ProviderError::AlreadyExists(message),
                412 => ProviderError::FailedPrecondition(message),
                429 => ProviderError::ResourceExhausted(message),
                _ => ProviderError::Unavailable(format!("HTTP {}: {}", status, message)),
            },
            ApiError::Timeout(elapsed) => ProviderError::DeadlineExceeded(format!(
                "no deployment event after {}s",
                elapsed.as_secs()
            )),
            ApiError::DeploymentFailed(status) => {
                ProviderError::DeploymentFailed(format!("deployment ended with status {}", status))
            },
            err @ ApiError::EventStreamClosed => ProviderError::DeploymentFailed(err.to_string()),
            ApiError::Decode(err) => ProviderError::Serialization(err),
            err @ (ApiError::Http(_) | ApiError::MissingOrganization) => {
                ProviderError::Unavailable(err.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("domain-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: domain-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("spheron_bucket".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: spheron_bucket");

        let err = ProviderError::DeploymentFailed("cluster web".to_string());
        assert_eq!(format!("{}", err), "Deployment failed: cluster web");
    }

    #[test]
    fn test_api_status_mapping() {
        let status = |code: u16| ApiError::Status {
            status: code,
            message: "boom".to_string(),
        };

        assert!(matches!(
            ProviderError::from(status(404)),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            ProviderError::from(status(401)),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            ProviderError::from(status(403)),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            ProviderError::from(status(409)),
            ProviderError::AlreadyExists(_)
        ));
        assert!(matches!(
            ProviderError::from(status(429)),
            ProviderError::ResourceExhausted(_)
        ));
        assert!(matches!(
            ProviderError::from(status(422)),
            ProviderError::InvalidRequest(_)
        ));

        let err = ProviderError::from(status(502));
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert_eq!(err.message(), "HTTP 502: boom");
    }

    #[test]
    fn test_deployment_errors_mapping() {
        let err = ProviderError::from(ApiError::Timeout(Duration::from_secs(900)));
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert!(err.message().contains("900s"));

        let err = ProviderError::from(ApiError::DeploymentFailed("FAILED".to_string()));
        assert!(matches!(err, ProviderError::DeploymentFailed(_)));

        let err = ProviderError::from(ApiError::EventStreamClosed);
        assert!(matches!(err, ProviderError::DeploymentFailed(_)));
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::NotFound("domain-123".to_string());
        assert_eq!(err.message(), "domain-123");

        let err = ProviderError::Configuration("missing token".to_string());
        assert_eq!(err.message(), "missing token");
    }

    #[test]
    fn test_context_keeps_serialization_kind() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProviderError::from(ApiError::Decode(decode)).context("Unable to read domain");
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = ProviderError::NotFound("instance abc".to_string())
            .context("Unable to create domain for instance");
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(
            err.message(),
            "Unable to create domain for instance: instance abc"
        );
    }
}
