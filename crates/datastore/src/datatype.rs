//! Compiled-in datatype registry
//!
//! A datastore only serves data whose datatype drivers are linked into the
//! running executable. Drivers register a [`TypeService`] under their type
//! name; opening a datastore verifies every referenced `name@version`
//! against this table and fails with `DatatypeUnavailable` naming the
//! offender when one is missing.
//!
//! The `keyvalue` datatype ships built in: a plain blob-per-key type with
//! no interpretation of its values.

use axon_core::{AxonError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Identity and metadata of a compiled-in datatype driver.
pub trait TypeService: Send + Sync {
    /// The type name data instances reference (e.g. `"keyvalue"`).
    fn type_name(&self) -> &str;

    /// The driver version compiled into this executable.
    fn type_version(&self) -> &str;

    /// Canonical URL identifying the datatype implementation.
    fn type_url(&self) -> &str;
}

impl std::fmt::Debug for dyn TypeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeService({})", self.type_name())
    }
}

/// The built-in key-value datatype: uninterpreted blobs per key.
#[derive(Debug, Default)]
pub struct KeyValueType;

impl TypeService for KeyValueType {
    fn type_name(&self) -> &str {
        "keyvalue"
    }

    fn type_version(&self) -> &str {
        "0.1"
    }

    fn type_url(&self) -> &str {
        "github.com/axon-store/axon/datatype/keyvalue"
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn TypeService>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn TypeService>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn TypeService>> = HashMap::new();
        let keyvalue = Arc::new(KeyValueType);
        map.insert(keyvalue.type_name().to_string(), keyvalue);
        RwLock::new(map)
    })
}

/// Register (or replace) a datatype driver under its type name.
///
/// Drivers call this once at startup, before any datastore is opened.
pub fn register_type(service: Arc<dyn TypeService>) {
    registry()
        .write()
        .insert(service.type_name().to_string(), service);
}

/// Look up a compiled-in datatype by name.
pub fn type_by_name(name: &str) -> Option<Arc<dyn TypeService>> {
    registry().read().get(name).cloned()
}

/// Names of every compiled-in datatype, sorted.
pub fn compiled_type_names() -> Vec<String> {
    let mut names: Vec<String> = registry().read().keys().cloned().collect();
    names.sort();
    names
}

/// Verify that the referenced `name@version` is compiled into this
/// executable, returning the driver.
pub fn verify_available(name: &str, version: &str) -> Result<Arc<dyn TypeService>> {
    let service = type_by_name(name)
        .ok_or_else(|| AxonError::datatype_unavailable(name, version))?;
    if service.type_version() != version {
        return Err(AxonError::datatype_unavailable(name, version));
    }
    Ok(service)
}

/// JSON chart of compiled-in datatypes: `name -> url`.
pub fn types_json() -> serde_json::Value {
    let registry = registry().read();
    let mut map = serde_json::Map::new();
    for service in registry.values() {
        map.insert(
            service.type_name().to_string(),
            serde_json::Value::String(service.type_url().to_string()),
        );
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeType {
        name: &'static str,
        version: &'static str,
    }

    impl TypeService for FakeType {
        fn type_name(&self) -> &str {
            self.name
        }
        fn type_version(&self) -> &str {
            self.version
        }
        fn type_url(&self) -> &str {
            "example.com/fake"
        }
    }

    #[test]
    fn test_keyvalue_is_built_in() {
        let t = type_by_name("keyvalue").expect("keyvalue must be compiled in");
        assert_eq!(t.type_version(), "0.1");
        assert!(compiled_type_names().contains(&"keyvalue".to_string()));
    }

    #[test]
    fn test_verify_available_matches_version() {
        assert!(verify_available("keyvalue", "0.1").is_ok());
        let err = verify_available("keyvalue", "9.9").unwrap_err();
        assert_eq!(err.kind(), axon_core::ErrorKind::DatatypeUnavailable);
        assert!(err.to_string().contains("keyvalue"));
        assert!(err.to_string().contains("9.9"));
    }

    #[test]
    fn test_verify_unknown_type() {
        let err = verify_available("no-such-type", "1.0").unwrap_err();
        assert_eq!(err.kind(), axon_core::ErrorKind::DatatypeUnavailable);
    }

    #[test]
    fn test_register_replaces_same_name() {
        register_type(Arc::new(FakeType {
            name: "replace-me",
            version: "1",
        }));
        assert!(verify_available("replace-me", "1").is_ok());
        register_type(Arc::new(FakeType {
            name: "replace-me",
            version: "2",
        }));
        assert!(verify_available("replace-me", "1").is_err());
        assert!(verify_available("replace-me", "2").is_ok());
    }

    #[test]
    fn test_types_json_names_urls() {
        let json = types_json();
        assert_eq!(
            json["keyvalue"],
            "github.com/axon-store/axon/datatype/keyvalue"
        );
    }
}
