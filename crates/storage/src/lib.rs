//! Storage facade for the axon datastore
//!
//! This crate layers the versioned-read machinery over raw ordered
//! key-value backends:
//!
//! - [`traits`]: the capability interfaces a backend may satisfy
//! - [`context`]: namespacing contexts attached to every call
//! - [`versioned`]: ancestor resolution for versioned reads
//! - [`engine`]: capability projection and the compiled-in engine table
//! - [`memstore`] / [`basic`]: the bundled engines
//! - [`dispatch`]: bounded worker tokens for chunk handlers
//! - [`cancel`] / [`chunk`]: cancellation and iteration plumbing

#![warn(missing_docs)]

pub mod basic;
pub mod cancel;
pub mod chunk;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod memstore;
pub mod traits;
pub mod versioned;

pub use basic::BasicStore;
pub use cancel::CancelToken;
pub use chunk::{Chunk, ChunkFunc, ChunkOp, Op};
pub use context::{DataContext, MetadataContext, StoreContext, VersionAncestry};
pub use dispatch::{HandlerPool, HandlerToken, ThrottleToken};
pub use engine::{instance_sizes, next_instance_id, open_engine, Engine, StoreHandles};
pub use memstore::MemStore;
pub use traits::{
    Batch, Batcher, GraphStore, KeyValue, KeyValueDb, KeyValueGetter, KeyValueIngestable,
    KeyValueRequester, KeyValueSetter, OrderedKeyValueDb, OrderedKeyValueGetter,
    OrderedKeyValueSetter, PatchFunc, RequestBuffer, SizeViewer, TKeyValue, TransactionDb,
};
pub use versioned::{collect_point_candidates, resolve, Candidate, CandidateTable};
