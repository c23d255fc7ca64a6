//! Namespacing contexts attached to every key-value call
//!
//! A context binds a storage call to its namespace and composes the full
//! on-disk keys for it. Two concrete shapes exist:
//!
//! - [`MetadataContext`] addresses the reserved metadata records directly.
//!   It is not versioned and not subject to tombstones.
//! - [`DataContext`] binds a call to `(instance, version, client)` and
//!   carries the precomputed [`VersionAncestry`] of its head version, which
//!   versioned reads resolve against.
//!
//! Backends only see `&dyn StoreContext`; the trait is the namespacing
//! boundary that keeps datatype code unable to escape its instance.

use axon_core::key::{self, StoreKey, TKey};
use axon_core::{AxonError, ClientId, InstanceId, Result, VersionId};
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque namespacing handle attached to every key-value call.
pub trait StoreContext: Send + Sync {
    /// Compose the full key for `tkey` at this context's head version.
    fn construct_key(&self, tkey: &TKey) -> StoreKey;

    /// Compose the full key for `tkey` at an arbitrary version.
    ///
    /// Unversioned contexts ignore `version` and return the same key as
    /// [`StoreContext::construct_key`].
    fn key_at_version(&self, version: VersionId, tkey: &TKey) -> StoreKey;

    /// The tombstone key for `tkey` at the head version, or `None` for
    /// contexts not subject to tombstones.
    fn tombstone_key(&self, tkey: &TKey) -> Option<StoreKey>;

    /// The tombstone key for `tkey` at an arbitrary version.
    fn tombstone_at_version(&self, version: VersionId, tkey: &TKey) -> Option<StoreKey>;

    /// Whether reads through this context resolve against a version DAG.
    fn versioned(&self) -> bool;

    /// Ancestry of the head version; `None` for unversioned contexts.
    fn ancestry(&self) -> Option<&VersionAncestry>;

    /// The data instance this context is bound to, if any.
    fn instance(&self) -> Option<InstanceId>;

    /// Recover the type-specific key from a full key this context produced.
    fn tkey_from_key(&self, key: &StoreKey) -> Result<TKey>;

    /// Owned copy of this context, for batches and buffers that outlive the
    /// borrow handed to the backend.
    fn clone_context(&self) -> Box<dyn StoreContext>;
}

/// Context for the reserved metadata key space.
///
/// Composes keys as `[0x00 | class | body]`: the TKey's class byte is kept
/// and its marker byte elided, so the fixed metadata records keep their
/// compact layout. Range sentinels are meaningless for metadata and must
/// not be passed through this context.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataContext;

impl StoreContext for MetadataContext {
    fn construct_key(&self, tkey: &TKey) -> StoreKey {
        let bytes = tkey.as_bytes();
        let mut out = Vec::with_capacity(1 + bytes.len() - 1);
        out.push(key::KeyClass::Metadata.as_byte());
        out.push(bytes[0]);
        out.extend_from_slice(&bytes[2..]);
        StoreKey::from_bytes(out)
    }

    fn key_at_version(&self, _version: VersionId, tkey: &TKey) -> StoreKey {
        self.construct_key(tkey)
    }

    fn tombstone_key(&self, _tkey: &TKey) -> Option<StoreKey> {
        None
    }

    fn tombstone_at_version(&self, _version: VersionId, _tkey: &TKey) -> Option<StoreKey> {
        None
    }

    fn versioned(&self) -> bool {
        false
    }

    fn ancestry(&self) -> Option<&VersionAncestry> {
        None
    }

    fn instance(&self) -> Option<InstanceId> {
        None
    }

    fn tkey_from_key(&self, key: &StoreKey) -> Result<TKey> {
        let bytes = key.as_bytes();
        if bytes.len() < 2 || bytes[0] != key::KeyClass::Metadata.as_byte() {
            return Err(AxonError::backend(format!(
                "not a metadata key: {:02x?}",
                bytes
            )));
        }
        Ok(TKey::new(bytes[1], &bytes[2..]))
    }

    fn clone_context(&self) -> Box<dyn StoreContext> {
        Box::new(*self)
    }
}

/// Context bound to `(instance, version, client)` for versioned data I/O.
#[derive(Debug, Clone)]
pub struct DataContext {
    instance: InstanceId,
    client: ClientId,
    ancestry: Arc<VersionAncestry>,
}

impl DataContext {
    /// Bind a context to an instance at the version described by `ancestry`.
    ///
    /// The client field is zero; nothing in the core assigns client IDs.
    pub fn new(instance: InstanceId, ancestry: VersionAncestry) -> Self {
        DataContext {
            instance,
            client: ClientId(0),
            ancestry: Arc::new(ancestry),
        }
    }

    /// Bind with an explicit client attribution field.
    pub fn with_client(instance: InstanceId, ancestry: VersionAncestry, client: ClientId) -> Self {
        DataContext {
            instance,
            client,
            ancestry: Arc::new(ancestry),
        }
    }

    /// The head version this context reads and writes at.
    pub fn version(&self) -> VersionId {
        self.ancestry.head()
    }

    /// The client attribution field.
    pub fn client(&self) -> ClientId {
        self.client
    }
}

impl StoreContext for DataContext {
    fn construct_key(&self, tkey: &TKey) -> StoreKey {
        key::data_key(self.instance, self.ancestry.head(), self.client, tkey)
    }

    fn key_at_version(&self, version: VersionId, tkey: &TKey) -> StoreKey {
        key::data_key(self.instance, version, self.client, tkey)
    }

    fn tombstone_key(&self, tkey: &TKey) -> Option<StoreKey> {
        Some(key::tombstone_key(
            self.instance,
            self.ancestry.head(),
            self.client,
            tkey,
        ))
    }

    fn tombstone_at_version(&self, version: VersionId, tkey: &TKey) -> Option<StoreKey> {
        Some(key::tombstone_key(self.instance, version, self.client, tkey))
    }

    fn versioned(&self) -> bool {
        true
    }

    fn ancestry(&self) -> Option<&VersionAncestry> {
        Some(&self.ancestry)
    }

    fn instance(&self) -> Option<InstanceId> {
        Some(self.instance)
    }

    fn tkey_from_key(&self, key: &StoreKey) -> Result<TKey> {
        let parts = key::decode_data_key(key)?;
        Ok(parts.tkey)
    }

    fn clone_context(&self) -> Box<dyn StoreContext> {
        Box::new(self.clone())
    }
}

/// Flat parent chain of one version, precomputed from the DAG.
///
/// Level 0 holds the head itself; level `d` holds every ancestor at graph
/// distance `d`. Within a level, versions are ordered by ascending
/// [`VersionId`] so resolution stays deterministic. A version reachable by
/// several paths keeps its smallest distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionAncestry {
    levels: Vec<Vec<VersionId>>,
    distance: HashMap<VersionId, usize>,
}

impl VersionAncestry {
    /// Build an ancestry from the head version and its deeper levels.
    ///
    /// `ancestors[0]` is distance 1 (the parents), `ancestors[1]` distance 2,
    /// and so on. Levels are re-sorted ascending; a version seen at several
    /// depths keeps the shallowest.
    pub fn new(head: VersionId, ancestors: Vec<Vec<VersionId>>) -> Self {
        let mut levels = Vec::with_capacity(1 + ancestors.len());
        levels.push(vec![head]);
        for level in ancestors {
            let mut level = level;
            level.sort_unstable();
            level.dedup();
            levels.push(level);
        }
        let mut distance = HashMap::new();
        for (d, level) in levels.iter().enumerate() {
            for &v in level {
                distance.entry(v).or_insert(d);
            }
        }
        VersionAncestry { levels, distance }
    }

    /// Ancestry of an unbranched version: just the head.
    pub fn single(head: VersionId) -> Self {
        Self::new(head, Vec::new())
    }

    /// The head version.
    pub fn head(&self) -> VersionId {
        self.levels[0][0]
    }

    /// Whether `version` appears anywhere in the chain.
    pub fn contains(&self, version: VersionId) -> bool {
        self.distance.contains_key(&version)
    }

    /// Graph distance of `version` from the head, if reachable.
    pub fn distance(&self, version: VersionId) -> Option<usize> {
        self.distance.get(&version).copied()
    }

    /// Every version in the chain, nearest first, ascending ID within a
    /// level.
    pub fn versions(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.levels.iter().flatten().copied()
    }

    /// Number of versions in the chain.
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    /// Always false: the head is always present.
    pub fn is_empty(&self) -> bool {
        false
    }
}
