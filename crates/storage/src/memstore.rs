//! Ordered in-memory storage engine
//!
//! `MemStore` keeps the whole key space in a `BTreeMap<Vec<u8>, Vec<u8>>`
//! behind a `parking_lot::RwLock`, which gives raw lexicographic ordering
//! for free. It satisfies every storage capability except graph storage, so
//! it doubles as the reference implementation of the versioned read
//! contract.
//!
//! Durability model: the map is snapshotted to `memstore.bin` in the
//! datastore directory when the engine is closed, and loaded again on open.
//! A crash between close calls loses the delta, which is acceptable for an engine
//! whose job is correctness of the versioning layer, not crash safety.

use crate::cancel::CancelToken;
use crate::chunk::{Chunk, ChunkFunc, ChunkOp};
use crate::context::StoreContext;
use crate::engine::{Engine, StoreHandles};
use crate::traits::{
    Batch, Batcher, KeyValue, KeyValueGetter, KeyValueIngestable, KeyValueRequester,
    KeyValueSetter, OrderedKeyValueGetter, OrderedKeyValueSetter, PatchFunc, RequestBuffer,
    SizeViewer, TKeyValue, TransactionDb,
};
use crate::versioned::{collect_point_candidates, resolve, Candidate, CandidateTable};
use axon_core::key::{self, KeyRange};
use axon_core::{AxonError, Result, StoreKey, TKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::error;

const SNAPSHOT_FILE: &str = "memstore.bin";
const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// How many records the raw range reader pulls per lock acquisition. This
/// is the prefetch window that bounds extra items after cancellation.
const RAW_QUERY_PREFETCH: usize = 256;

const LOCK_MAX_ATTEMPTS: u32 = 12;
const LOCK_INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const LOCK_MAX_BACKOFF: Duration = Duration::from_millis(64);

#[derive(Debug)]
struct Inner {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    locks: Mutex<HashSet<Vec<u8>>>,
    snapshot_path: Option<PathBuf>,
}

/// Ordered in-memory storage engine.
///
/// Cloning is cheap and shares the underlying store.
#[derive(Debug, Clone)]
pub struct MemStore {
    inner: Arc<Inner>,
}

impl MemStore {
    /// A purely in-memory store with no snapshot file.
    pub fn new() -> Self {
        MemStore {
            inner: Arc::new(Inner {
                map: RwLock::new(BTreeMap::new()),
                locks: Mutex::new(HashSet::new()),
                snapshot_path: None,
            }),
        }
    }

    /// Open a store rooted at `path`, loading a prior snapshot if present.
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        if create {
            std::fs::create_dir_all(path).map_err(|e| {
                AxonError::open(format!(
                    "cannot create datastore directory {}: {e}",
                    path.display()
                ))
            })?;
        }
        let snapshot_path = path.join(SNAPSHOT_FILE);
        let map = if snapshot_path.exists() {
            let bytes = std::fs::read(&snapshot_path).map_err(|e| {
                AxonError::open(format!("cannot read {}: {e}", snapshot_path.display()))
            })?;
            match bytes.split_first() {
                Some((&SNAPSHOT_FORMAT_VERSION, body)) => {
                    let pairs: Vec<(Vec<u8>, Vec<u8>)> =
                        bincode::deserialize(body).map_err(|e| {
                            AxonError::open(format!(
                                "corrupt memstore snapshot {}: {e}",
                                snapshot_path.display()
                            ))
                        })?;
                    pairs.into_iter().collect()
                }
                Some((&other, _)) => {
                    return Err(AxonError::open(format!(
                        "unsupported memstore snapshot format version {other}"
                    )))
                }
                None => {
                    return Err(AxonError::open(format!(
                        "empty memstore snapshot {}",
                        snapshot_path.display()
                    )))
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(MemStore {
            inner: Arc::new(Inner {
                map: RwLock::new(map),
                locks: Mutex::new(HashSet::new()),
                snapshot_path: Some(snapshot_path),
            }),
        })
    }

    /// Number of raw records currently stored (all classes, all versions).
    pub fn raw_len(&self) -> usize {
        self.inner.map.read().len()
    }

    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.inner.snapshot_path else {
            return Ok(());
        };
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = {
            let map = self.inner.map.read();
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut bytes = vec![SNAPSHOT_FORMAT_VERSION];
        bytes.extend(
            bincode::serialize(&pairs).map_err(|e| AxonError::backend(e.to_string()))?,
        );
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Every visible `(TKey, value)` of `[kstart, kend)` through `ctx`.
    fn visible_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
    ) -> Result<Vec<(TKey, Vec<u8>)>> {
        if !ctx.versioned() {
            let from = ctx.construct_key(kstart);
            let to = ctx.construct_key(kend);
            let map = self.inner.map.read();
            let mut out = Vec::new();
            for (k, v) in map.range::<[u8], _>((
                Bound::Included(from.as_bytes()),
                Bound::Excluded(to.as_bytes()),
            )) {
                let tkey = ctx.tkey_from_key(&StoreKey::from_bytes(k.clone()))?;
                out.push((tkey, v.clone()));
            }
            return Ok(out);
        }

        let ancestry = ctx
            .ancestry()
            .ok_or_else(|| AxonError::backend("versioned context without ancestry"))?;
        let mut table = CandidateTable::new();
        {
            let map = self.inner.map.read();
            for version in ancestry.versions() {
                let from = ctx.key_at_version(version, kstart);
                let to = ctx.key_at_version(version, kend);
                for (k, v) in map.range::<[u8], _>((
                    Bound::Included(from.as_bytes()),
                    Bound::Excluded(to.as_bytes()),
                )) {
                    let tkey = ctx.tkey_from_key(&StoreKey::from_bytes(k.clone()))?;
                    table.insert(tkey, Candidate::value(version, v.clone()));
                }
                if let (Some(tfrom), Some(tto)) = (
                    ctx.tombstone_at_version(version, kstart),
                    ctx.tombstone_at_version(version, kend),
                ) {
                    for (k, _) in map.range::<[u8], _>((
                        Bound::Included(tfrom.as_bytes()),
                        Bound::Excluded(tto.as_bytes()),
                    )) {
                        let tkey = ctx.tkey_from_key(&StoreKey::from_bytes(k.clone()))?;
                        table.insert(tkey, Candidate::tombstone(version));
                    }
                }
            }
        }
        table.resolve_all(ancestry)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_raw_range(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, start: &[u8], open_end: &[u8]) {
    let doomed: Vec<Vec<u8>> = map
        .range::<[u8], _>((Bound::Included(start), Bound::Excluded(open_end)))
        .map(|(k, _)| k.clone())
        .collect();
    for k in doomed {
        map.remove(&k);
    }
}

impl KeyValueGetter for MemStore {
    fn get(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<Option<Vec<u8>>> {
        if !ctx.versioned() {
            let key = ctx.construct_key(tkey);
            return Ok(self.inner.map.read().get(key.as_bytes()).cloned());
        }
        let ancestry = ctx
            .ancestry()
            .ok_or_else(|| AxonError::backend("versioned context without ancestry"))?;
        let map = self.inner.map.read();
        let candidates =
            collect_point_candidates(ctx, tkey, |k| map.get(k.as_bytes()).cloned());
        resolve(ancestry, &candidates)
    }
}

impl KeyValueSetter for MemStore {
    fn put(&self, ctx: &dyn StoreContext, tkey: &TKey, value: &[u8]) -> Result<()> {
        let key = ctx.construct_key(tkey);
        let mut map = self.inner.map.write();
        map.insert(key.into_bytes(), value.to_vec());
        if let Some(tomb) = ctx.tombstone_key(tkey) {
            map.remove(tomb.as_bytes());
        }
        Ok(())
    }

    fn delete(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<()> {
        let key = ctx.construct_key(tkey);
        let mut map = self.inner.map.write();
        map.remove(key.as_bytes());
        if let Some(tomb) = ctx.tombstone_key(tkey) {
            map.insert(tomb.into_bytes(), Vec::new());
        }
        Ok(())
    }

    fn raw_put(&self, key: &StoreKey, value: &[u8]) -> Result<()> {
        self.inner
            .map
            .write()
            .insert(key.as_bytes().to_vec(), value.to_vec());
        Ok(())
    }

    fn raw_delete(&self, key: &StoreKey) -> Result<()> {
        self.inner.map.write().remove(key.as_bytes());
        Ok(())
    }
}

impl OrderedKeyValueGetter for MemStore {
    fn get_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
    ) -> Result<Vec<TKeyValue>> {
        Ok(self
            .visible_range(ctx, kstart, kend)?
            .into_iter()
            .map(|(tkey, value)| TKeyValue { tkey, value })
            .collect())
    }

    fn keys_in_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
    ) -> Result<Vec<TKey>> {
        Ok(self
            .visible_range(ctx, kstart, kend)?
            .into_iter()
            .map(|(tkey, _)| tkey)
            .collect())
    }

    fn send_keys_in_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
        ch: SyncSender<TKey>,
    ) -> Result<()> {
        let keys = self.keys_in_range(ctx, kstart, kend)?;
        for tkey in keys {
            if ch.send(tkey).is_err() {
                // Receiver hung up: treat as a natural end of interest.
                return Ok(());
            }
        }
        // Dropping `ch` here closes the channel.
        Ok(())
    }

    fn process_range(
        &self,
        ctx: &dyn StoreContext,
        kstart: &TKey,
        kend: &TKey,
        op: &ChunkOp,
        f: ChunkFunc<'_>,
    ) -> Result<()> {
        let winners = self.visible_range(ctx, kstart, kend)?;
        for (tkey, value) in winners {
            if op.cancel.is_cancelled() {
                return Err(AxonError::Cancelled);
            }
            f(Chunk {
                op: op.op,
                tkey,
                value,
            })?;
        }
        Ok(())
    }

    fn raw_range_query(
        &self,
        kstart: &StoreKey,
        kend: &StoreKey,
        keys_only: bool,
        out: SyncSender<Option<KeyValue>>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(AxonError::Cancelled);
            }
            let batch: Vec<(Vec<u8>, Vec<u8>)> = {
                let map = self.inner.map.read();
                let lower = match &cursor {
                    None => Bound::Included(kstart.as_bytes()),
                    Some(c) => Bound::Excluded(c.as_slice()),
                };
                map.range::<[u8], _>((lower, Bound::Included(kend.as_bytes())))
                    .take(RAW_QUERY_PREFETCH)
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            if keys_only { Vec::new() } else { v.clone() },
                        )
                    })
                    .collect()
            };
            if batch.is_empty() {
                let _ = out.send(None);
                return Ok(());
            }
            if let Some((last, _)) = batch.last() {
                cursor = Some(last.clone());
            }
            for (k, v) in batch {
                if cancel.is_cancelled() {
                    return Err(AxonError::Cancelled);
                }
                let kv = KeyValue {
                    key: StoreKey::from_bytes(k),
                    value: v,
                };
                if out.send(Some(kv)).is_err() {
                    return Ok(());
                }
            }
        }
    }
}

impl OrderedKeyValueSetter for MemStore {
    fn put_range(&self, ctx: &dyn StoreContext, kvs: &[TKeyValue]) -> Result<()> {
        let mut map = self.inner.map.write();
        for kv in kvs {
            map.insert(ctx.construct_key(&kv.tkey).into_bytes(), kv.value.clone());
            if let Some(tomb) = ctx.tombstone_key(&kv.tkey) {
                map.remove(tomb.as_bytes());
            }
        }
        Ok(())
    }

    fn delete_range(&self, ctx: &dyn StoreContext, kstart: &TKey, kend: &TKey) -> Result<()> {
        let keys = self.keys_in_range(ctx, kstart, kend)?;
        let mut map = self.inner.map.write();
        for tkey in keys {
            map.remove(ctx.construct_key(&tkey).as_bytes());
            if let Some(tomb) = ctx.tombstone_key(&tkey) {
                map.insert(tomb.into_bytes(), Vec::new());
            }
        }
        Ok(())
    }

    fn delete_all(&self, ctx: &dyn StoreContext, all_versions: bool) -> Result<()> {
        let instance = ctx
            .instance()
            .ok_or_else(|| AxonError::backend("delete_all requires a data context"))?;
        let mut map = self.inner.map.write();
        if all_versions {
            for range in [
                key::instance_data_range(instance),
                key::instance_tombstone_range(instance),
            ] {
                remove_raw_range(&mut map, range.start.as_bytes(), range.open_end.as_bytes());
            }
        } else {
            let min = TKey::min_of_class(key::TKEY_MIN_CLASS);
            let max = TKey::max_of_class(key::TKEY_MAX_CLASS);
            let from = ctx.construct_key(&min);
            let to = ctx.construct_key(&max);
            remove_raw_range(&mut map, from.as_bytes(), to.as_bytes());
            if let (Some(tfrom), Some(tto)) =
                (ctx.tombstone_key(&min), ctx.tombstone_key(&max))
            {
                remove_raw_range(&mut map, tfrom.as_bytes(), tto.as_bytes());
            }
        }
        Ok(())
    }
}

// ---- Batching ----

enum BatchEntry {
    Put(TKey, Vec<u8>),
    Delete(TKey),
}

struct MemBatch {
    inner: Arc<Inner>,
    ctx: Box<dyn StoreContext>,
    entries: Vec<BatchEntry>,
}

impl Batch for MemBatch {
    fn put(&mut self, tkey: TKey, value: Vec<u8>) {
        self.entries.push(BatchEntry::Put(tkey, value));
    }

    fn delete(&mut self, tkey: TKey) {
        self.entries.push(BatchEntry::Delete(tkey));
    }

    fn commit(self: Box<Self>) -> Result<()> {
        // One write guard for the whole batch makes it atomic to readers.
        let mut map = self.inner.map.write();
        for entry in self.entries {
            match entry {
                BatchEntry::Put(tkey, value) => {
                    map.insert(self.ctx.construct_key(&tkey).into_bytes(), value);
                    if let Some(tomb) = self.ctx.tombstone_key(&tkey) {
                        map.remove(tomb.as_bytes());
                    }
                }
                BatchEntry::Delete(tkey) => {
                    map.remove(self.ctx.construct_key(&tkey).as_bytes());
                    if let Some(tomb) = self.ctx.tombstone_key(&tkey) {
                        map.insert(tomb.into_bytes(), Vec::new());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Batcher for MemStore {
    fn new_batch(&self, ctx: &dyn StoreContext) -> Result<Box<dyn Batch>> {
        Ok(Box::new(MemBatch {
            inner: Arc::clone(&self.inner),
            ctx: ctx.clone_context(),
            entries: Vec::new(),
        }))
    }
}

// ---- Request buffering ----

enum BufferEntry {
    Put(TKey, Vec<u8>),
    Delete(TKey),
    PutCallback(TKey, Vec<u8>, Sender<Result<()>>),
}

struct MemBuffer {
    store: MemStore,
    ctx: Box<dyn StoreContext>,
    entries: Vec<BufferEntry>,
}

impl RequestBuffer for MemBuffer {
    fn put(&mut self, tkey: TKey, value: Vec<u8>) {
        self.entries.push(BufferEntry::Put(tkey, value));
    }

    fn delete(&mut self, tkey: TKey) {
        self.entries.push(BufferEntry::Delete(tkey));
    }

    fn put_callback(&mut self, tkey: TKey, value: Vec<u8>, done: Sender<Result<()>>) {
        self.entries.push(BufferEntry::PutCallback(tkey, value, done));
    }

    fn flush(&mut self) -> Result<()> {
        let mut failure: Option<String> = None;
        for entry in self.entries.drain(..) {
            match entry {
                BufferEntry::Put(tkey, value) => {
                    if let Err(e) = self.store.put(self.ctx.as_ref(), &tkey, &value) {
                        failure.get_or_insert(e.to_string());
                    }
                }
                BufferEntry::Delete(tkey) => {
                    if let Err(e) = self.store.delete(self.ctx.as_ref(), &tkey) {
                        failure.get_or_insert(e.to_string());
                    }
                }
                BufferEntry::PutCallback(tkey, value, done) => {
                    let result = self.store.put(self.ctx.as_ref(), &tkey, &value);
                    if let Err(e) = &result {
                        failure.get_or_insert(e.to_string());
                    }
                    let _ = done.send(result);
                }
            }
        }
        match failure {
            Some(msg) => Err(AxonError::backend(msg)),
            None => Ok(()),
        }
    }
}

impl KeyValueRequester for MemStore {
    fn new_buffer(&self, ctx: &dyn StoreContext) -> Result<Box<dyn RequestBuffer>> {
        Ok(Box::new(MemBuffer {
            store: self.clone(),
            ctx: ctx.clone_context(),
            entries: Vec::new(),
        }))
    }
}

// ---- Transactions ----

impl TransactionDb for MemStore {
    fn lock_key(&self, key: &StoreKey) -> Result<()> {
        let mut backoff = LOCK_INITIAL_BACKOFF;
        for attempt in 0..LOCK_MAX_ATTEMPTS {
            if self.inner.locks.lock().insert(key.as_bytes().to_vec()) {
                return Ok(());
            }
            if attempt + 1 < LOCK_MAX_ATTEMPTS {
                thread::sleep(backoff);
                backoff = (backoff * 2).min(LOCK_MAX_BACKOFF);
            }
        }
        Err(AxonError::backend(format!(
            "gave up acquiring advisory key lock after {LOCK_MAX_ATTEMPTS} attempts"
        )))
    }

    fn unlock_key(&self, key: &StoreKey) -> Result<()> {
        self.inner.locks.lock().remove(key.as_bytes());
        Ok(())
    }

    fn patch(&self, ctx: &dyn StoreContext, tkey: &TKey, f: PatchFunc<'_>) -> Result<()> {
        // The write guard spans read-modify-write: single-key atomicity.
        let mut map = self.inner.map.write();
        let key = ctx.construct_key(tkey);
        let old = map.get(key.as_bytes()).cloned();
        let new = f(old.as_deref())?;
        map.insert(key.into_bytes(), new);
        if let Some(tomb) = ctx.tombstone_key(tkey) {
            map.remove(tomb.as_bytes());
        }
        Ok(())
    }
}

impl KeyValueIngestable for MemStore {
    fn key_value_ingest(&self, ctx: &dyn StoreContext, tkey: &TKey, value: &[u8]) -> Result<()> {
        // An in-memory store has no deferred pipeline; ingest is an
        // immediately-visible put, which the contract permits.
        self.put(ctx, tkey, value)
    }
}

impl SizeViewer for MemStore {
    fn get_approximate_sizes(&self, ranges: &[KeyRange]) -> Result<Vec<u64>> {
        let map = self.inner.map.read();
        Ok(ranges
            .iter()
            .map(|r| {
                map.range::<[u8], _>((
                    Bound::Included(r.start.as_bytes()),
                    Bound::Excluded(r.open_end.as_bytes()),
                ))
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum()
            })
            .collect())
    }
}

impl Engine for MemStore {
    fn name(&self) -> &'static str {
        "memstore"
    }

    fn handles(&self) -> StoreHandles {
        StoreHandles {
            key_value: Some(Arc::new(self.clone())),
            ordered: Some(Arc::new(self.clone())),
            batcher: Some(Arc::new(self.clone())),
            requester: Some(Arc::new(self.clone())),
            transactions: Some(Arc::new(self.clone())),
            ingest: Some(Arc::new(self.clone())),
            size_viewer: Some(Arc::new(self.clone())),
            graph: None,
        }
    }

    fn close(&self) {
        if let Err(e) = self.write_snapshot() {
            error!(error = %e, "failed to write memstore snapshot");
        }
    }
}
