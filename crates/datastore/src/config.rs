//! Datastore configuration surface
//!
//! Read once at open; how the values get here (file, CLI, embedding
//! application) is the caller's business. Paths may be relative; the caller
//! resolves them against the config file's directory with
//! [`DatastoreConfig::resolve_paths`] before opening.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_engine() -> String {
    "memstore".to_string()
}

/// Configuration for opening one datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Directory the datastore lives in.
    pub path: PathBuf,

    /// Alias of the default key-value engine (see
    /// [`axon_storage::open_engine`]).
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Optional routing of specific data instances onto other engines,
    /// by instance name.
    #[serde(default)]
    pub instance_engines: HashMap<String, String>,

    /// Log level hint passed through to the tracing subscriber set up by
    /// the embedding application.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl DatastoreConfig {
    /// Configuration with defaults for everything but the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DatastoreConfig {
            path: path.into(),
            engine: default_engine(),
            instance_engines: HashMap::new(),
            log_level: None,
        }
    }

    /// Use a different default engine alias.
    pub fn with_engine(mut self, alias: impl Into<String>) -> Self {
        self.engine = alias.into();
        self
    }

    /// Resolve a relative datastore path against `base` (typically the
    /// directory the config file was loaded from).
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatastoreConfig::new("/data/ds1");
        assert_eq!(config.engine, "memstore");
        assert!(config.instance_engines.is_empty());
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let mut config = DatastoreConfig::new("ds1");
        config.resolve_paths(Path::new("/etc/axon"));
        assert_eq!(config.path, PathBuf::from("/etc/axon/ds1"));
    }

    #[test]
    fn test_resolve_keeps_absolute_path() {
        let mut config = DatastoreConfig::new("/data/ds1");
        config.resolve_paths(Path::new("/etc/axon"));
        assert_eq!(config.path, PathBuf::from("/data/ds1"));
    }

    #[test]
    fn test_serde_defaults_apply() {
        let config: DatastoreConfig =
            serde_json::from_str(r#"{"path": "/data/ds1"}"#).unwrap();
        assert_eq!(config.engine, "memstore");
    }
}
