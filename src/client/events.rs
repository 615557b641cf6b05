//! Deployment event stream handling.
//!
//! Instance creates and updates are asynchronous: the API publishes progress on
//! a server-sent event stream keyed by the `uniqueTopicId` sent with the request.
//! Each payload line looks like:
//!
//! ```text
//! data: {"type":1,"data":{"deploymentStatus":"DEPLOYED","latestUrlPreview":"...","providerHost":"...","ports":[...]},"session":"..."}
//! ```

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ApiError, Result};
use super::models::Port;

/// Status reported once the instance is running.
pub const STATUS_DEPLOYED: &str = "DEPLOYED";

/// Statuses that end the wait with an error.
pub const FAILURE_STATUSES: &[&str] = &["FAILED", "DEPLOYMENT_FAILED"];

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEventData {
    #[serde(default)]
    pub deployment_status: String,
    #[serde(default)]
    pub latest_url_preview: String,
    #[serde(default)]
    pub provider_host: String,
    #[serde(default)]
    pub ports: Vec<Port>,
}

/// A decoded deployment event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    #[serde(rename = "type", default)]
    pub event_type: i64,
    #[serde(default)]
    pub data: DeploymentEventData,
    #[serde(default)]
    pub session: String,
}

impl DeploymentEvent {
    pub fn is_deployed(&self) -> bool {
        self.data.deployment_status == STATUS_DEPLOYED
    }

    pub fn is_failed(&self) -> bool {
        FAILURE_STATUSES.contains(&self.data.deployment_status.as_str())
    }
}

/// Decode one event line, with or without its `data:` prefix.
pub fn parse_deployment_event(line: &str) -> Result<DeploymentEvent> {
    let payload = line
        .strip_prefix(DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(line);
    Ok(serde_json::from_str(payload)?)
}

/// Ports the deployment ended up exposing, taken from a raw event line.
pub fn parse_event_ports(line: &str) -> Result<Vec<Port>> {
    Ok(parse_deployment_event(line)?.data.ports)
}

/// Consume an event stream until the deployment finishes.
///
/// Returns the raw `data:` line of the deployed event. Lines that do not
/// decode as deployment events (keep-alives, comments) are skipped.
pub(crate) async fn wait_for_deployed<S, B, E>(stream: S) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Err(e.into()),
        };
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(found) = inspect_line(line.trim_end())? {
                return Ok(found);
            }
        }
    }

    // Stream may end without a trailing newline.
    if !buffer.is_empty() {
        let line = String::from_utf8_lossy(&buffer);
        if let Some(found) = inspect_line(line.trim_end())? {
            return Ok(found);
        }
    }

    Err(ApiError::EventStreamClosed)
}

fn inspect_line(line: &str) -> Result<Option<String>> {
    if !line.starts_with(DATA_PREFIX) {
        return Ok(None);
    }

    let event = match parse_deployment_event(line) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable event line");
            return Ok(None);
        },
    };

    if event.is_deployed() {
        debug!(session = %event.session, "Deployment reached DEPLOYED");
        return Ok(Some(line.to_string()));
    }
    if event.is_failed() {
        warn!(status = %event.data.deployment_status, "Deployment failed");
        return Err(ApiError::DeploymentFailed(event.data.deployment_status));
    }

    debug!(status = %event.data.deployment_status, "Deployment in progress");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const DEPLOYED: &str = r#"data: {"type":1,"data":{"deploymentStatus":"DEPLOYED","latestUrlPreview":"x.provider.net","providerHost":"provider.net","ports":[{"containerPort":8080,"exposedPort":31245}]},"session":"s-1"}"#;

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, ApiError>> {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[test]
    fn test_parse_deployment_event() {
        let event = parse_deployment_event(DEPLOYED).unwrap();
        assert_eq!(event.event_type, 1);
        assert_eq!(event.session, "s-1");
        assert!(event.is_deployed());
        assert_eq!(event.data.provider_host, "provider.net");
        assert_eq!(
            event.data.ports,
            vec![Port {
                container_port: 8080,
                exposed_port: 31245
            }]
        );
    }

    #[test]
    fn test_parse_without_prefix() {
        let event = parse_deployment_event(r#"{"data":{"deploymentStatus":"FAILED"}}"#).unwrap();
        assert!(event.is_failed());
        assert!(event.data.ports.is_empty());
    }

    #[test]
    fn test_parse_event_ports_rejects_garbage() {
        assert!(parse_event_ports("data: not json").is_err());
        assert_eq!(parse_event_ports(DEPLOYED).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_deployed_line() {
        let progress = r#"data: {"type":0,"data":{"deploymentStatus":"PENDING"}}"#;
        let input = format!(": keep-alive\n{}\n\n{}\n", progress, DEPLOYED);
        let line = wait_for_deployed(chunks(&[&input])).await.unwrap();
        assert_eq!(line, DEPLOYED);
    }

    #[tokio::test]
    async fn test_wait_handles_split_chunks() {
        let (head, tail) = DEPLOYED.split_at(40);
        let tail = format!("{}\r\n", tail);
        let line = wait_for_deployed(chunks(&[head, &tail])).await.unwrap();
        assert_eq!(line, DEPLOYED);
    }

    #[tokio::test]
    async fn test_wait_without_trailing_newline() {
        let line = wait_for_deployed(chunks(&[DEPLOYED])).await.unwrap();
        assert_eq!(line, DEPLOYED);
    }

    #[tokio::test]
    async fn test_wait_fails_on_failed_status() {
        let failed = "data: {\"data\":{\"deploymentStatus\":\"DEPLOYMENT_FAILED\"}}\n";
        let err = wait_for_deployed(chunks(&[failed])).await.unwrap_err();
        assert!(matches!(err, ApiError::DeploymentFailed(status) if status == "DEPLOYMENT_FAILED"));
    }

    #[tokio::test]
    async fn test_wait_fails_when_stream_closes() {
        let progress = "data: {\"data\":{\"deploymentStatus\":\"PENDING\"}}\n";
        let err = wait_for_deployed(chunks(&[progress])).await.unwrap_err();
        assert!(matches!(err, ApiError::EventStreamClosed));
    }

    #[tokio::test]
    async fn test_wait_skips_undecodable_data() {
        let input = format!("data: [1,2\n{}\n", DEPLOYED);
        let line = wait_for_deployed(chunks(&[&input])).await.unwrap();
        assert_eq!(line, DEPLOYED);
    }
}
