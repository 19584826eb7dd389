//! Persistence unit configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::engine::Properties;

/// Name and engine properties of a persistence unit.
///
/// ```json
/// { "unit": "orders", "properties": { "gitwork.path": "./data" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(rename = "unit")]
    pub unit_name: String,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl UnitConfig {
    pub fn new(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            properties: Properties::new(),
        }
    }

    /// Set a single engine property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Merge a set of engine properties, overriding existing keys.
    pub fn properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: UnitConfig = serde_json::from_str(json)?;
        config.validate()
    }

    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.unit_name.trim().is_empty() {
            return Err(ConfigError::MissingUnitName);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder() {
        let config = UnitConfig::new("test")
            .property("a", "1")
            .properties([("b", "2"), ("a", "3")]);

        assert_eq!(config.unit_name, "test");
        assert_eq!(config.properties.get("a").map(String::as_str), Some("3"));
        assert_eq!(config.properties.len(), 2);
    }

    #[test]
    fn test_from_json() {
        let config =
            UnitConfig::from_json(r#"{"unit": "orders", "properties": {"gitwork.create": "false"}}"#)
                .unwrap();
        assert_eq!(config, UnitConfig::new("orders").property("gitwork.create", "false"));

        let bare = UnitConfig::from_json(r#"{"unit": "orders"}"#).unwrap();
        assert!(bare.properties.is_empty());

        assert!(matches!(
            UnitConfig::from_json(r#"{"unit": "  "}"#),
            Err(ConfigError::MissingUnitName)
        ));
        assert!(matches!(
            UnitConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unit.json");
        std::fs::write(&path, r#"{"unit": "test"}"#).unwrap();

        assert_eq!(UnitConfig::load(&path).unwrap().unit_name, "test");
        assert!(matches!(
            UnitConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
