//! Inbound side: configuration events and the startup manifest.

use crate::config::ConfigProperties;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Identity of one factory configuration, assigned by the configuration source
pub type ConfigId = String;

/// Event delivered by the configuration source.
///
/// The source serializes events per `config_id`; events for different ids
/// may arrive concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConfigEvent {
    Create {
        config_id: ConfigId,
        properties: ConfigProperties,
    },
    Update {
        config_id: ConfigId,
        properties: ConfigProperties,
    },
    Delete {
        config_id: ConfigId,
    },
}

impl ConfigEvent {
    pub fn config_id(&self) -> &str {
        match self {
            ConfigEvent::Create { config_id, .. }
            | ConfigEvent::Update { config_id, .. }
            | ConfigEvent::Delete { config_id } => config_id,
        }
    }
}

/// Declarative list of scope configurations consumed at startup.
///
/// ```json
/// {
///   "scopes": {
///     "pid-1": {
///       "scopeName": "content.read",
///       "resourcePath": "/content/site",
///       "requiredPrivileges": ["jcr:read"]
///     }
///   }
/// }
/// ```
///
/// Entries are kept as raw key-value bags so one invalid entry does not
/// prevent the others from being applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub scopes: BTreeMap<ConfigId, ConfigProperties>,
}

impl Manifest {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Manifest(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// One create event per entry, in configuration id order
    pub fn into_events(self) -> Vec<ConfigEvent> {
        self.scopes
            .into_iter()
            .map(|(config_id, properties)| ConfigEvent::Create {
                config_id,
                properties,
            })
            .collect()
    }
}
