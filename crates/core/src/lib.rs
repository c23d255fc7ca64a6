//! Core types for the axon datastore
//!
//! This crate defines the foundational vocabulary shared by the storage
//! facade and the datastore service:
//! - Compact local identifiers and global version UUIDs
//! - The on-disk key layout (metadata, data, and tombstone key classes)
//! - The unified error type with its frozen wire taxonomy
//! - JSON-object configuration values carried by data instances

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ids;
pub mod key;

pub use config::DataConfig;
pub use error::{AxonError, Capability, ErrorKind, Result};
pub use ids::{ClientId, InstanceId, RepoId, VersionId, VersionUuid, LOCAL_ID_SIZE};
pub use key::{KeyClass, KeyError, KeyRange, MetadataClass, StoreKey, TKey, TKeyClass};
