//! Version DAG, repositories, and the datastore service
//!
//! This crate binds the storage facade to the repository model:
//!
//! - [`dag`]: per-repository version DAGs with lock/commit semantics
//! - [`repo`]: named data instances plus version-map bookkeeping
//! - [`datatype`]: the compiled-in datatype registry
//! - [`registry`]: the datastore-wide repo set and UUID resolution
//! - [`service`]: the mutation-mediating service bound to one backend
//! - [`config`]: the open-time configuration surface

#![warn(missing_docs)]

pub mod config;
pub mod dag;
pub mod datatype;
pub mod registry;
pub mod repo;
pub mod service;

pub use config::DatastoreConfig;
pub use dag::{VersionDag, VersionNode};
pub use datatype::{
    compiled_type_names, register_type, type_by_name, verify_available, KeyValueType,
    TypeService,
};
pub use registry::RepoRegistry;
pub use repo::{DataInstance, Repo, RECORD_FORMAT_VERSION};
pub use service::{Service, DATASTORE_VERSION};
