//! # Axon
//!
//! A versioned, multi-repository scientific datastore core: a DAG of
//! versions layered over a pluggable ordered key-value backend.
//!
//! Data lives in named **data instances** inside **repositories**; each
//! repository carries a directed acyclic graph of **versions** (branches
//! and commits). Clients address versions by opaque UUIDs while on-disk
//! keys use compact local identifiers.
//!
//! # Quick start
//!
//! ```no_run
//! use axon::{
//!     DataConfig, DatastoreConfig, KeyValueGetter, KeyValueSetter, Service, TKey,
//! };
//!
//! fn main() -> axon::Result<()> {
//!     let config = DatastoreConfig::new("./my-datastore");
//!     let service = Service::open(&config)?;
//!
//!     // A repository with one key-value data instance
//!     let (root, _repo_id) = service.new_repo("my-project", "EM volume")?;
//!     service.new_data(root, "keyvalue", "annotations", DataConfig::new())?;
//!
//!     // Writes go through a context bound to (version, instance)
//!     let ctx = service.data_context(root, "annotations")?;
//!     let kv = service.key_value_db()?;
//!     kv.put(&ctx, &TKey::new(0x20, b"soma-1"), b"dendrite")?;
//!
//!     // Lock the root, branch, and the child sees the parent's data
//!     service.lock(root)?;
//!     let child = service.new_version(root)?;
//!     let child_ctx = service.data_context(child, "annotations")?;
//!     assert!(kv.get(&child_ctx, &TKey::new(0x20, b"soma-1"))?.is_some());
//!
//!     service.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! The [`Service`] is the entry point; storage capabilities are handed out
//! as typed handles and fail closed when a backend lacks them.

pub use axon_core::{
    key, AxonError, Capability, ClientId, DataConfig, ErrorKind, InstanceId, KeyClass, KeyError,
    KeyRange, MetadataClass, RepoId, Result, StoreKey, TKey, TKeyClass, VersionId, VersionUuid,
    LOCAL_ID_SIZE,
};
pub use axon_datastore::{
    compiled_type_names, register_type, DataInstance, DatastoreConfig, KeyValueType, Repo,
    RepoRegistry, Service, TypeService, VersionDag, VersionNode, DATASTORE_VERSION,
};
pub use axon_storage::{
    instance_sizes, next_instance_id, open_engine, Batch, Batcher, CancelToken, Chunk, ChunkFunc,
    ChunkOp, DataContext, Engine, GraphStore, HandlerPool, HandlerToken, KeyValue, KeyValueDb,
    KeyValueGetter, KeyValueIngestable, KeyValueRequester, KeyValueSetter, MemStore,
    MetadataContext, Op, OrderedKeyValueDb, OrderedKeyValueGetter, OrderedKeyValueSetter,
    PatchFunc, RequestBuffer, SizeViewer, StoreContext, StoreHandles, TKeyValue, ThrottleToken,
    TransactionDb, VersionAncestry,
};
