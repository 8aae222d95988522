//! Types exchanged across the provider contract.

use dataprover_codec::{HostValue, Record};
use serde::{Deserialize, Serialize};

/// Merged configuration handed to a provider.
pub type ProviderConfig = Record;

// ---------------------------------------------------------------------------
// Configuration schema
// ---------------------------------------------------------------------------

/// Input type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigFieldType {
    String,
    Integer,
    Number,
    Boolean,
    Select,
    Password,
}

impl ConfigFieldType {
    /// Parse a type name case-insensitively; unknown names become `String`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "INTEGER" => Self::Integer,
            "NUMBER" => Self::Number,
            "BOOLEAN" => Self::Boolean,
            "SELECT" => Self::Select,
            "PASSWORD" => Self::Password,
            _ => Self::String,
        }
    }
}

/// One choice of a `SELECT` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

/// Optional constraints on a field's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

/// A single field in a configuration form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

impl ConfigField {
    /// Build a field from a guest-produced map.
    ///
    /// Returns `None` when the value is not a map or has no `name`.
    pub fn from_host(value: &HostValue) -> Option<Self> {
        let map = value.as_map()?;
        let name = text(map.get("name"))?;
        let label = text(map.get("label")).unwrap_or_else(|| name.clone());
        let field_type = text(map.get("type"))
            .map(|t| ConfigFieldType::parse(&t))
            .unwrap_or(ConfigFieldType::String);

        let options = map
            .get("options")
            .and_then(HostValue::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let value = text(item.get("value"))?;
                        let label = text(item.get("label")).unwrap_or_else(|| value.clone());
                        Some(FieldOption { value, label })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let validation = map.get("validation").and_then(HostValue::as_map).map(|v| {
            FieldValidation {
                min: number(v.get("min")),
                max: number(v.get("max")),
                pattern: text(v.get("pattern")),
                min_length: number(v.get("minLength")).map(|n| n as u32),
                max_length: number(v.get("maxLength")).map(|n| n as u32),
            }
        });

        Some(Self {
            name,
            label,
            field_type,
            required: map.get("required").and_then(HostValue::as_bool).unwrap_or(false),
            description: text(map.get("description")),
            placeholder: text(map.get("placeholder")),
            default_value: text(map.get("defaultValue")),
            validation,
            options,
        })
    }
}

fn text(value: Option<&HostValue>) -> Option<String> {
    match value? {
        HostValue::Null => None,
        HostValue::Text(s) => Some(s.clone()),
        HostValue::Int(n) => Some(n.to_string()),
        HostValue::Float(f) => Some(f.to_string()),
        HostValue::Decimal(d) => Some(d.to_string()),
        HostValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(value: Option<&HostValue>) -> Option<f64> {
    match value? {
        HostValue::Int(n) => Some(*n as f64),
        HostValue::Float(f) => Some(*f),
        HostValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An ordered list of configuration fields.
///
/// Used for both the data configuration and the connection configuration
/// of a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// Parse a guest value: either a list of fields or a map with a
    /// `fields` list. Anything else yields an empty schema.
    pub fn from_host(value: &HostValue) -> Self {
        let items = match value {
            HostValue::List(items) => items.as_slice(),
            HostValue::Map(_) => value.get("fields").and_then(HostValue::as_list).unwrap_or(&[]),
            _ => &[],
        };
        Self {
            fields: items.iter().filter_map(ConfigField::from_host).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `true` when at least one field must be supplied.
    pub fn has_required_fields(&self) -> bool {
        self.fields.iter().any(|f| f.required)
    }

    /// Names of `PASSWORD` fields.
    pub fn secret_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.field_type == ConfigFieldType::Password)
            .map(|f| f.name.as_str())
    }

    /// Field defaults as a config map.
    pub fn defaults(&self) -> ProviderConfig {
        self.fields
            .iter()
            .filter_map(|f| {
                f.default_value
                    .as_ref()
                    .map(|d| (f.name.clone(), HostValue::Text(d.clone())))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    /// Read `{valid, errors}` from a guest value. A bare boolean is accepted;
    /// anything unrecognized counts as valid.
    pub fn from_host(value: &HostValue) -> Self {
        match value {
            HostValue::Bool(valid) => Self {
                valid: *valid,
                errors: Vec::new(),
            },
            HostValue::Map(map) => Self {
                valid: map.get("valid").and_then(HostValue::as_bool).unwrap_or(true),
                errors: map
                    .get("errors")
                    .and_then(HostValue::as_list)
                    .map(|items| items.iter().filter_map(|e| text(Some(e))).collect())
                    .unwrap_or_default(),
            },
            _ => Self::ok(),
        }
    }
}

/// Outcome of `testConfiguration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTestResult {
    pub success: bool,
    pub message: String,
}

impl ConfigTestResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "OK".into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn from_host(value: &HostValue) -> Self {
        match value {
            HostValue::Bool(true) => Self::ok(),
            HostValue::Bool(false) => Self::failed("configuration test failed"),
            HostValue::Map(map) => {
                let success = map.get("success").and_then(HostValue::as_bool).unwrap_or(false);
                let message = text(map.get("message"))
                    .unwrap_or_else(|| if success { "OK".into() } else { "failed".into() });
                Self { success, message }
            }
            _ => Self::ok(),
        }
    }
}

/// Readiness of a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    /// Initialized and ready to fetch.
    Available,
    /// Loaded but waiting for required connection settings.
    NotConfigured,
    /// Initialization or loading failed.
    Error,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::NotConfigured => write!(f, "not configured"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Descriptive information about a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: Option<String>,
    pub language: String,
    pub data_source: Option<String>,
    pub tags: Vec<String>,
    pub scheduled: bool,
}

#[cfg(test)]
mod tests {
    use dataprover_codec::HostValue;
    use indexmap::IndexMap;

    use super::*;

    fn host(json: serde_json::Value) -> HostValue {
        HostValue::from(json)
    }

    #[test]
    fn field_type_parse_is_case_insensitive() {
        assert_eq!(ConfigFieldType::parse("password"), ConfigFieldType::Password);
        assert_eq!(ConfigFieldType::parse("Select"), ConfigFieldType::Select);
        assert_eq!(ConfigFieldType::parse("weird"), ConfigFieldType::String);
    }

    #[test]
    fn schema_from_guest_list() {
        let schema = ConfigSchema::from_host(&host(serde_json::json!([
            {
                "name": "jdbcUrl",
                "label": "JDBC URL",
                "type": "string",
                "required": true,
                "placeholder": "jdbc:postgresql://localhost:5432/yaci"
            },
            {
                "name": "password",
                "type": "password",
                "required": false
            },
            {
                "name": "network",
                "type": "select",
                "defaultValue": "preprod",
                "options": [{"value": "mainnet", "label": "Mainnet"}, {"value": "preprod"}],
                "validation": {"minLength": 3, "pattern": "^[a-z]+$"}
            },
            {"label": "no name, dropped"}
        ])));

        assert_eq!(schema.fields.len(), 3);
        assert!(schema.has_required_fields());
        assert_eq!(schema.fields[1].label, "password");
        assert_eq!(schema.secret_fields().collect::<Vec<_>>(), vec!["password"]);

        let network = &schema.fields[2];
        assert_eq!(network.field_type, ConfigFieldType::Select);
        assert_eq!(network.options[1].label, "preprod");
        let validation = network.validation.as_ref().expect("validation parsed");
        assert_eq!(validation.min_length, Some(3));
        assert_eq!(validation.pattern.as_deref(), Some("^[a-z]+$"));

        let defaults = schema.defaults();
        assert_eq!(defaults.get("network"), Some(&HostValue::from("preprod")));
    }

    #[test]
    fn schema_from_map_with_fields() {
        let schema = ConfigSchema::from_host(&host(serde_json::json!({
            "fields": [{"name": "epoch", "type": "INTEGER"}]
        })));
        assert_eq!(schema.fields[0].field_type, ConfigFieldType::Integer);
        assert!(!schema.has_required_fields());
    }

    #[test]
    fn schema_serializes_camel_case() {
        let schema = ConfigSchema::from_host(&host(serde_json::json!([
            {"name": "url", "defaultValue": "x"}
        ])));
        let json = serde_json::to_value(&schema).expect("serializes");
        assert_eq!(json["fields"][0]["defaultValue"], "x");
        assert_eq!(json["fields"][0]["type"], "STRING");
    }

    #[test]
    fn validation_result_from_guest() {
        let result = ValidationResult::from_host(&host(serde_json::json!({
            "valid": false,
            "errors": ["amount must be positive"]
        })));
        assert_eq!(result, ValidationResult::invalid(vec!["amount must be positive".into()]));
        assert_eq!(ValidationResult::from_host(&HostValue::Null), ValidationResult::ok());
    }

    #[test]
    fn config_test_result_from_guest() {
        let mut map = IndexMap::new();
        map.insert("success".to_owned(), HostValue::Bool(false));
        map.insert("message".to_owned(), HostValue::from("connection refused"));
        let result = ConfigTestResult::from_host(&HostValue::Map(map));
        assert!(!result.success);
        assert_eq!(result.message, "connection refused");
    }
}
