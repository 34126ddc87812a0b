use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key-value bag delivered by the configuration source for one scope.
pub type ConfigProperties = Map<String, Value>;

/// Option key for the OAuth scope identifier
pub const SCOPE_NAME: &str = "scopeName";
/// Option key for the content-tree path the scope covers
pub const RESOURCE_PATH: &str = "resourcePath";
/// Option key for the privileges granted by the scope
pub const REQUIRED_PRIVILEGES: &str = "requiredPrivileges";

/// Privilege materialized when `requiredPrivileges` is not set
pub const DEFAULT_PRIVILEGE: &str = "jcr:read";

const KNOWN_KEYS: [&str; 3] = [SCOPE_NAME, RESOURCE_PATH, REQUIRED_PRIVILEGES];

/// Declarative description of one OAuth scope.
///
/// Every construction path validates, so a `ScopeConfig` always has a
/// non-empty name, a non-empty resource path and at least one privilege.
/// Values are stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawScopeConfig")]
pub struct ScopeConfig {
    scope_name: String,
    resource_path: String,
    required_privileges: Vec<String>,
}

/// Unvalidated shape of the key-value bag
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScopeConfig {
    scope_name: Option<String>,
    resource_path: Option<String>,
    required_privileges: Option<Privileges>,
}

/// Factory configuration bags store single-valued arrays as a plain string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Privileges {
    One(String),
    Many(Vec<String>),
}

impl ScopeConfig {
    /// Create a configuration with the default `["jcr:read"]` privileges.
    pub fn new(scope_name: impl Into<String>, resource_path: impl Into<String>) -> Result<Self> {
        RawScopeConfig {
            scope_name: Some(scope_name.into()),
            resource_path: Some(resource_path.into()),
            required_privileges: None,
        }
        .try_into()
    }

    /// Replace the privilege list.
    pub fn with_privileges<I, S>(self, privileges: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawScopeConfig {
            scope_name: Some(self.scope_name),
            resource_path: Some(self.resource_path),
            required_privileges: Some(Privileges::Many(
                privileges.into_iter().map(Into::into).collect(),
            )),
        }
        .try_into()
    }

    /// Build a configuration from the key-value bag delivered by a
    /// configuration source. Unknown keys are ignored.
    pub fn from_properties(properties: &ConfigProperties) -> Result<Self> {
        for key in properties.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "ignoring unrecognized scope configuration key");
            }
        }

        let raw: RawScopeConfig = serde_json::from_value(Value::Object(properties.clone()))
            .map_err(|e| Error::invalid(e.to_string()))?;
        raw.try_into()
    }

    /// Render this configuration back into its key-value form.
    pub fn to_properties(&self) -> ConfigProperties {
        let mut properties = ConfigProperties::new();
        properties.insert(SCOPE_NAME.into(), Value::from(self.scope_name.as_str()));
        properties.insert(RESOURCE_PATH.into(), Value::from(self.resource_path.as_str()));
        properties.insert(
            REQUIRED_PRIVILEGES.into(),
            Value::from(self.required_privileges.clone()),
        );
        properties
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn required_privileges(&self) -> &[String] {
        &self.required_privileges
    }
}

impl TryFrom<RawScopeConfig> for ScopeConfig {
    type Error = Error;

    fn try_from(raw: RawScopeConfig) -> Result<Self> {
        let scope_name = required(SCOPE_NAME, raw.scope_name)?;
        let resource_path = required(RESOURCE_PATH, raw.resource_path)?;

        let required_privileges = match raw.required_privileges {
            None => vec![DEFAULT_PRIVILEGE.to_string()],
            Some(Privileges::One(privilege)) => vec![privilege],
            Some(Privileges::Many(privileges)) => privileges,
        };
        if required_privileges.is_empty() {
            return Err(Error::invalid(format!(
                "{REQUIRED_PRIVILEGES} must contain at least one privilege"
            )));
        }
        let required_privileges = required_privileges
            .into_iter()
            .map(|p| required(REQUIRED_PRIVILEGES, Some(p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            scope_name,
            resource_path,
            required_privileges,
        })
    }
}

fn required(key: &str, value: Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(Error::invalid(format!("{key} must not be empty"))),
        None => Err(Error::invalid(format!("{key} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> ConfigProperties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_properties_full() {
        let config = ScopeConfig::from_properties(&props(json!({
            "scopeName": "content.read",
            "resourcePath": "/content/site",
            "requiredPrivileges": ["jcr:read", "jcr:write"],
        })))
        .unwrap();

        assert_eq!(config.scope_name(), "content.read");
        assert_eq!(config.resource_path(), "/content/site");
        assert_eq!(config.required_privileges(), ["jcr:read", "jcr:write"]);
    }

    #[test]
    fn test_default_privileges() {
        let config = ScopeConfig::from_properties(&props(json!({
            "scopeName": "basic",
            "resourcePath": "/content",
        })))
        .unwrap();
        assert_eq!(config.required_privileges(), [DEFAULT_PRIVILEGE]);

        let config = ScopeConfig::from_properties(&props(json!({
            "scopeName": "basic",
            "resourcePath": "/content",
            "requiredPrivileges": null,
        })))
        .unwrap();
        assert_eq!(config.required_privileges(), [DEFAULT_PRIVILEGE]);
    }

    #[test]
    fn test_single_string_privilege() {
        let config = ScopeConfig::from_properties(&props(json!({
            "scopeName": "writer",
            "resourcePath": "/content",
            "requiredPrivileges": "jcr:write",
        })))
        .unwrap();
        assert_eq!(config.required_privileges(), ["jcr:write"]);
    }

    #[test]
    fn test_duplicate_privileges_kept_in_order() {
        let config = ScopeConfig::new("dup", "/content")
            .unwrap()
            .with_privileges(["jcr:write", "jcr:read", "jcr:write"])
            .unwrap();
        assert_eq!(
            config.required_privileges(),
            ["jcr:write", "jcr:read", "jcr:write"]
        );
    }

    #[test]
    fn test_rejects_empty_values() {
        let cases = [
            json!({ "scopeName": "", "resourcePath": "/x" }),
            json!({ "scopeName": "   ", "resourcePath": "/x" }),
            json!({ "scopeName": "a", "resourcePath": "" }),
            json!({ "resourcePath": "/x" }),
            json!({ "scopeName": "a" }),
            json!({ "scopeName": "a", "resourcePath": "/x", "requiredPrivileges": [] }),
            json!({ "scopeName": "a", "resourcePath": "/x", "requiredPrivileges": ["jcr:read", " "] }),
            json!({ "scopeName": 7, "resourcePath": "/x" }),
        ];

        for case in cases {
            let err = ScopeConfig::from_properties(&props(case.clone())).unwrap_err();
            assert!(
                matches!(err, Error::InvalidConfiguration(_)),
                "expected InvalidConfiguration for {case}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_values_are_trimmed() {
        let config = ScopeConfig::new("  spaced ", " /content ").unwrap();
        assert_eq!(config.scope_name(), "spaced");
        assert_eq!(config.resource_path(), "/content");
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = ScopeConfig::from_properties(&props(json!({
            "service.pid": "com.example.DynamicScope~pid-1",
            "scopeName": "basic",
            "resourcePath": "/content",
        })))
        .unwrap();
        assert_eq!(config.scope_name(), "basic");
    }

    #[test]
    fn test_properties_round_trip() {
        let config = ScopeConfig::new("content.read", "/content/site").unwrap();
        let properties = config.to_properties();
        assert_eq!(properties[SCOPE_NAME], json!("content.read"));
        assert_eq!(properties[REQUIRED_PRIVILEGES], json!(["jcr:read"]));
        assert_eq!(ScopeConfig::from_properties(&properties).unwrap(), config);
    }

    #[test]
    fn test_deserialize_validates() {
        let err = serde_json::from_value::<ScopeConfig>(json!({
            "scopeName": "",
            "resourcePath": "/x",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("scopeName must not be empty"));
    }
}
