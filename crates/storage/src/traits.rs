//! Capability interfaces a storage backend may satisfy
//!
//! Backends differ in what they can do, so the storage layer is expressed as
//! a family of small traits. A backend implements whatever subset it
//! supports; the capability projection in [`crate::engine::StoreHandles`]
//! makes the subset explicit at open time, and requesting an unsupported
//! capability fails closed before any I/O.
//!
//! Keys come in two shapes: a type-specific [`TKey`] combined with a
//! [`StoreContext`] (the normal path), or a full [`StoreKey`] for the raw
//! replication path, which bypasses both namespacing and tombstone logic.

use crate::cancel::CancelToken;
use crate::chunk::{ChunkFunc, ChunkOp};
use crate::context::StoreContext;
use axon_core::key::KeyRange;
use axon_core::{Result, StoreKey, TKey};
use std::sync::mpsc::{Sender, SyncSender};

/// A full storage key-value pair, used by the raw replication path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full on-disk key.
    pub key: StoreKey,
    /// Value bytes (empty in keys-only queries).
    pub value: Vec<u8>,
}

/// A type-specific key-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TKeyValue {
    /// Type-specific key.
    pub tkey: TKey,
    /// Value bytes.
    pub value: Vec<u8>,
}

/// Plain reads.
pub trait KeyValueGetter: Send + Sync {
    /// The value visible at the context's version, or `None` when the key
    /// is absent or tombstoned there.
    fn get(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<Option<Vec<u8>>>;
}

/// Plain writes.
pub trait KeyValueSetter: Send + Sync {
    /// Write a value at the context's version. Removes any tombstone left
    /// for the same key at that version.
    fn put(&self, ctx: &dyn StoreContext, tkey: &TKey, value: &[u8]) -> Result<()>;

    /// Delete at the context's version. On a versioned context this writes
    /// a tombstone, so prior versions remain intact.
    fn delete(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<()>;

    /// Low-level write using a full key. Bypasses tombstone maintenance;
    /// used for datastore-to-datastore replication with
    /// [`OrderedKeyValueGetter::raw_range_query`].
    fn raw_put(&self, key: &StoreKey, value: &[u8]) -> Result<()>;

    /// Low-level delete using a full key, without tombstone logic.
    fn raw_delete(&self, key: &StoreKey) -> Result<()>;
}

/// Ordered reads: ranges, key iteration, and chunked processing.
pub trait OrderedKeyValueGetter: KeyValueGetter {
    /// All visible records with TKeys in `[kstart, kend)`, in lex order.
    fn get_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
    ) -> Result<Vec<TKeyValue>>;

    /// The visible TKeys in `[kstart, kend)`, in lex order.
    fn keys_in_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
    ) -> Result<Vec<TKey>>;

    /// Stream the visible TKeys in `[kstart, kend)` down a channel.
    ///
    /// The sender is dropped when the range is exhausted, closing the
    /// channel. A hung-up receiver ends the stream without error.
    fn send_keys_in_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
        ch: SyncSender<TKey>,
    ) -> Result<()>;

    /// Feed each visible record in `[kstart, kend)` to `f`, in TKey lex
    /// order, exactly once per surviving TKey.
    ///
    /// Chunk handling may fan work out concurrently (see
    /// [`crate::dispatch::HandlerPool`]), but delivery to `f` is sequential
    /// and ordered. If `f` returns an error, iteration terminates
    /// immediately and the error propagates. The token in `op` is honored
    /// between invocations and surfaces `Cancelled`.
    fn process_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
        op: &ChunkOp,
        f: ChunkFunc<'_>,
    ) -> Result<()>;

    /// Low-level, context-free iteration over full keys in
    /// `[kstart, kend]` (inclusive), without version filtering.
    ///
    /// Sends `Some(kv)` per record (value empty when `keys_only`), then a
    /// terminating `None` sentinel once the range is exhausted. Stops
    /// promptly on cancellation (within the reader's prefetch window) and
    /// returns `Cancelled`. A hung-up receiver ends the query without
    /// error. Used for datastore-to-datastore replication.
    fn raw_range_query(
        &self,
        kstart: &StoreKey,
        kend: &StoreKey,
        keys_only: bool,
        out: SyncSender<Option<KeyValue>>,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Ordered writes: bulk puts and range deletes.
pub trait OrderedKeyValueSetter: KeyValueSetter {
    /// Write several records at the context's version.
    fn put_range(&self, ctx: &dyn StoreContext, kvs: &[TKeyValue]) -> Result<()>;

    /// Delete every visible record with TKeys in `[kstart, kend)`. On
    /// versioned contexts this writes tombstones, unlike
    /// [`KeyValueSetter::raw_delete`].
    fn delete_range(&self, ctx: &dyn StoreContext, kstart: &TKey, kend: &TKey) -> Result<()>;

    /// Remove every record of the context's instance: the head version
    /// only, or all versions when `all_versions`. Removal is physical; no
    /// tombstones are written.
    fn delete_all(&self, ctx: &dyn StoreContext, all_versions: bool) -> Result<()>;
}

/// The simplest complete store: plain reads and writes.
pub trait KeyValueDb: KeyValueGetter + KeyValueSetter {}
impl<T: KeyValueGetter + KeyValueSetter> KeyValueDb for T {}

/// A complete ordered store: range queries and range writes.
pub trait OrderedKeyValueDb: OrderedKeyValueGetter + OrderedKeyValueSetter {}
impl<T: OrderedKeyValueGetter + OrderedKeyValueSetter> OrderedKeyValueDb for T {}

impl std::fmt::Debug for dyn OrderedKeyValueDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderedKeyValueDb")
    }
}

/// A write batch. Commit is the only durability barrier; dropping an
/// uncommitted batch aborts it.
pub trait Batch: Send {
    /// Add a put to the batch.
    fn put(&mut self, tkey: TKey, value: Vec<u8>);

    /// Add a delete (tombstone on versioned contexts) to the batch.
    fn delete(&mut self, tkey: TKey);

    /// Atomically apply every queued operation.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Backends that can group writes into atomic batches.
pub trait Batcher: Send + Sync {
    /// Start a batch bound to `ctx`.
    fn new_batch(&self, ctx: &dyn StoreContext) -> Result<Box<dyn Batch>>;
}

/// A queue of operations flushed together.
///
/// Unlike a [`Batch`], a buffer makes no ordering or atomicity guarantees
/// across its entries; it exists to let drivers coalesce work.
pub trait RequestBuffer: Send {
    /// Queue a put.
    fn put(&mut self, tkey: TKey, value: Vec<u8>);

    /// Queue a delete.
    fn delete(&mut self, tkey: TKey);

    /// Queue a put whose individual outcome is reported on `done` at flush.
    fn put_callback(&mut self, tkey: TKey, value: Vec<u8>, done: Sender<Result<()>>);

    /// Process every queued operation.
    fn flush(&mut self) -> Result<()>;
}

/// Backends that can queue operations for batched processing.
pub trait KeyValueRequester: Send + Sync {
    /// Start a request buffer bound to `ctx`.
    fn new_buffer(&self, ctx: &dyn StoreContext) -> Result<Box<dyn RequestBuffer>>;
}

/// Pure patch function applied under single-key atomicity.
///
/// Receives `None` for an uninitialized key and must produce the new value
/// bytes either way.
pub type PatchFunc<'a> = &'a dyn Fn(Option<&[u8]>) -> Result<Vec<u8>>;

/// Single-key transactional operations.
pub trait TransactionDb: Send + Sync {
    /// Take an advisory lock on `key`, retrying with exponential backoff.
    /// Bounded: gives up with a backend error rather than spinning forever.
    fn lock_key(&self, key: &StoreKey) -> Result<()>;

    /// Release an advisory lock on `key`.
    fn unlock_key(&self, key: &StoreKey) -> Result<()>;

    /// Apply `f` to the value at `tkey` under single-key atomicity.
    fn patch(&self, ctx: &dyn StoreContext, tkey: &TKey, f: PatchFunc<'_>) -> Result<()>;
}

/// Write path without immediate read-visibility, for bulk loads into
/// immutable stores.
pub trait KeyValueIngestable: Send + Sync {
    /// Accept a mutation that may become readable only after later
    /// processing.
    fn key_value_ingest(&self, ctx: &dyn StoreContext, tkey: &TKey, value: &[u8]) -> Result<()>;
}

/// Approximate on-disk size queries.
pub trait SizeViewer: Send + Sync {
    /// Approximate byte sizes of the given key ranges, in order.
    fn get_approximate_sizes(&self, ranges: &[KeyRange]) -> Result<Vec<u64>>;
}

impl std::fmt::Debug for dyn SizeViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SizeViewer")
    }
}

/// Typed handle for layered graph storage.
///
/// No bundled engine implements this; graph stores layered over an ordered
/// key-value backend plug in through the same handle mechanism.
pub trait GraphStore: Send + Sync {
    /// Identifier of the graph engine implementation.
    fn name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphStore({})", self.name())
    }
}
