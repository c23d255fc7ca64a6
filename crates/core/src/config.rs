//! Configuration values carried by data instances
//!
//! A [`DataConfig`] is an ordered JSON object of instance settings. The core
//! treats it as opaque: datatype drivers interpret the fields. Modification
//! merges field-wise, so callers can update one setting without restating
//! the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-object configuration attached to a data instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataConfig(Map<String, Value>);

impl DataConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        DataConfig(Map::new())
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        DataConfig(map)
    }

    /// Look up a setting.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a single setting.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Merge `other` into this configuration, field-wise.
    ///
    /// Fields present in `other` overwrite fields of the same name here;
    /// fields absent from `other` are left untouched.
    pub fn merge(&mut self, other: &DataConfig) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Number of settings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no settings are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The configuration as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let mut config = DataConfig::new();
        assert!(config.is_empty());
        config.set("block_size", json!(32));
        assert_eq!(config.get("block_size"), Some(&json!(32)));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_merge_overwrites_and_preserves() {
        let mut base = DataConfig::new();
        base.set("block_size", json!(32));
        base.set("compression", json!("lz4"));

        let mut update = DataConfig::new();
        update.set("compression", json!("none"));
        update.set("versioned", json!(true));

        base.merge(&update);
        assert_eq!(base.get("block_size"), Some(&json!(32)));
        assert_eq!(base.get("compression"), Some(&json!("none")));
        assert_eq!(base.get("versioned"), Some(&json!(true)));
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut base = DataConfig::new();
        base.set("block_size", json!(64));
        base.merge(&DataConfig::new());
        assert_eq!(base.get("block_size"), Some(&json!(64)));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = DataConfig::new();
        config.set("block_size", json!(32));
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: DataConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn test_to_value_is_object() {
        let mut config = DataConfig::new();
        config.set("a", json!(1));
        assert_eq!(config.to_value(), json!({"a": 1}));
    }
}
