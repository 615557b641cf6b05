//! Schema validation helpers.
//!
//! Checks a resource or provider configuration (`serde_json::Value`) against a
//! [`Schema`] before any API call is made, producing diagnostics with dotted
//! attribute paths such as `ports.0.container_port`.
//!
//! # Example
//!
//! ```
//! use spheron_provider::schema::{Schema, Attribute};
//! use spheron_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("instance_port", Attribute::required_int64());
//!
//! let diagnostics = validate(&schema, &json!({"name": "app.example.com", "instance_port": 80}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "app.example.com", "instance_port": "80"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("instance_port".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use serde_json::Value;
use std::collections::HashMap;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let mut diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            if !path.is_empty() {
                diagnostic = diagnostic.with_attribute(path);
            }
            diagnostics.push(diagnostic);
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::Set(_)) {
                    "set"
                } else {
                    "list"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        },
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        },
    }
}

// Object fields carry no required/optional flags, so only present, non-null
// fields are type checked.
fn validate_object_type(
    attrs: &HashMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr_type) in attrs {
        match obj.get(name) {
            None | Some(Value::Null) => {},
            Some(value) => {
                validate_attribute_type(attr_type, value, &join_path(path, name), diagnostics)
            },
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("image", Attribute::required_string());

        assert!(validate(&schema, &json!({"image": "nginx"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("image".to_string()));

        assert_eq!(validate(&schema, &json!({"image": null})).len(), 1);

        let diagnostics = validate(&schema, &json!({"image": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("verified", Attribute::computed_bool());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"verified": "yes"})).is_empty());
    }

    #[test]
    fn test_validate_optional_computed_is_checked() {
        let schema = Schema::v0().with_attribute(
            "id",
            Attribute::new(AttributeType::String, AttributeFlags::optional_computed()),
        );

        assert!(validate(&schema, &json!({})).is_empty());
        assert_eq!(validate(&schema, &json!({"id": 7})).len(), 1);
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("instance_port", Attribute::required_int64());

        assert!(validate(&schema, &json!({"instance_port": 8080})).is_empty());
        assert!(validate(&schema, &json!({"instance_port": 8080.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"instance_port": 80.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"instance_port": "80"})).len(), 1);
    }

    #[test]
    fn test_validate_string_list() {
        let schema = Schema::v0().with_attribute(
            "commands",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional(),
            ),
        );

        assert!(validate(&schema, &json!({"commands": ["sh", "-c"]})).is_empty());
        assert!(validate(&schema, &json!({"commands": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"commands": ["sh", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("commands.1".to_string()));

        let diagnostics = validate(&schema, &json!({"commands": "sh"}));
        assert_eq!(diagnostics[0].detail, Some("Expected list, got string".to_string()));
    }

    #[test]
    fn test_validate_nested_block_list() {
        let schema = Schema::v0().with_block(
            "ports",
            NestedBlock::list(
                Block::new().with_attribute("container_port", Attribute::required_int64()),
            )
            .with_min_items(1)
            .with_max_items(2),
        );

        assert!(validate(&schema, &json!({"ports": [{"container_port": 80}]})).is_empty());

        let diagnostics = validate(&schema, &json!({"ports": []}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(
            &schema,
            &json!({"ports": [{"container_port": 80}, {"container_port": 443}, {"container_port": 8080}]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));

        let diagnostics = validate(&schema, &json!({"ports": [{"container_port": "eighty"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("ports.0.container_port".to_string())
        );

        let diagnostics = validate(&schema, &json!({"ports": {"container_port": 80}}));
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_validate_object_type() {
        let schema = Schema::v0().with_attribute(
            "health_check",
            Attribute::new(
                AttributeType::object([
                    ("path", AttributeType::String),
                    ("port", AttributeType::Int64),
                ]),
                AttributeFlags::optional(),
            ),
        );

        assert!(validate(&schema, &json!({"health_check": {"path": "/", "port": 80}})).is_empty());
        assert!(validate(&schema, &json!({"health_check": {"path": "/", "port": null}})).is_empty());

        let diagnostics = validate(&schema, &json!({"health_check": {"path": "/", "port": "80"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("health_check.port".to_string()));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("instance_port", Attribute::required_int64())
            .with_attribute("instance_id", Attribute::required_string());

        let diagnostics = validate(
            &schema,
            &json!({"name": 123, "instance_port": "not a number"}),
        );
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_helpers() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(!is_valid(&schema, &json!({})));

        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
        assert_eq!(diagnostics[0].attribute, None);
    }
}
