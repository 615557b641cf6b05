//! The per-resource callback trait.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::ClusterApi;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};
use crate::validation;

/// CRUD callbacks for one resource type.
///
/// State crosses this boundary as `serde_json::Value`; implementations decode
/// it into their own model with [`decode_state`] and hand back [`encode_state`].
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// Full resource type name, e.g. `spheron_instance`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema of the resource.
    fn schema(&self) -> Schema;

    /// Validate user configuration before planning.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validation::validate(&self.schema(), config)
    }

    async fn create(&self, api: &dyn ClusterApi, planned_state: Value)
        -> Result<Value, ProviderError>;

    async fn read(&self, api: &dyn ClusterApi, current_state: Value)
        -> Result<Value, ProviderError>;

    async fn update(
        &self,
        api: &dyn ClusterApi,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    async fn delete(&self, api: &dyn ClusterApi, current_state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its import id.
    ///
    /// The default passes the id through as `id` and reads the rest.
    async fn import(&self, api: &dyn ClusterApi, id: &str) -> Result<Value, ProviderError> {
        self.read(api, json!({ "id": id })).await
    }
}

/// Decode resource state into a typed model.
pub fn decode_state<T: DeserializeOwned>(state: Value) -> Result<T, ProviderError> {
    serde_json::from_value(state)
        .map_err(|e| ProviderError::InvalidRequest(format!("malformed resource state: {}", e)))
}

/// Encode a typed model back into resource state.
pub fn encode_state<T: Serialize>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}

/// Unwrap an attribute that must be known for the current operation.
pub(crate) fn require<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, ProviderError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Model {
        id: Option<String>,
        #[serde(default)]
        name: String,
    }

    #[test]
    fn test_decode_encode_state() {
        let model: Model = decode_state(json!({"id": "x"})).unwrap();
        assert_eq!(model.name, "");
        assert_eq!(encode_state(&model).unwrap(), json!({"id": "x", "name": ""}));

        let err = decode_state::<Model>(json!({"name": 5})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn test_require() {
        assert_eq!(require(&Some("a".to_string()), "missing").unwrap(), "a");
        assert!(require(&Some(String::new()), "missing").is_err());
        let err = require(&None, "Id not provided").unwrap_err();
        assert_eq!(err.message(), "Id not provided");
    }
}
