//! Minimal hash-map storage engine
//!
//! `BasicStore` satisfies only the plain get/put/delete capability. It
//! stands in for backends without ordered iteration (remote object stores,
//! simple caches) so the capability-projection machinery and its fail-closed
//! behavior are exercised against a real engine, not a mock.
//!
//! Versioned point reads still work: ancestor resolution only needs point
//! probes, not ordered iteration.

use crate::context::StoreContext;
use crate::engine::{Engine, StoreHandles};
use crate::traits::{KeyValueGetter, KeyValueSetter};
use crate::versioned::{collect_point_candidates, resolve};
use axon_core::{AxonError, Result, StoreKey, TKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Unordered in-memory engine exposing only plain key-value access.
#[derive(Debug, Clone, Default)]
pub struct BasicStore {
    map: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl BasicStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueGetter for BasicStore {
    fn get(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<Option<Vec<u8>>> {
        if !ctx.versioned() {
            let key = ctx.construct_key(tkey);
            return Ok(self.map.read().get(key.as_bytes()).cloned());
        }
        let ancestry = ctx
            .ancestry()
            .ok_or_else(|| AxonError::backend("versioned context without ancestry"))?;
        let map = self.map.read();
        let candidates =
            collect_point_candidates(ctx, tkey, |k| map.get(k.as_bytes()).cloned());
        resolve(ancestry, &candidates)
    }
}

impl KeyValueSetter for BasicStore {
    fn put(&self, ctx: &dyn StoreContext, tkey: &TKey, value: &[u8]) -> Result<()> {
        let key = ctx.construct_key(tkey);
        let mut map = self.map.write();
        map.insert(key.into_bytes(), value.to_vec());
        if let Some(tomb) = ctx.tombstone_key(tkey) {
            map.remove(tomb.as_bytes());
        }
        Ok(())
    }

    fn delete(&self, ctx: &dyn StoreContext, tkey: &TKey) -> Result<()> {
        let key = ctx.construct_key(tkey);
        let mut map = self.map.write();
        map.remove(key.as_bytes());
        if let Some(tomb) = ctx.tombstone_key(tkey) {
            map.insert(tomb.into_bytes(), Vec::new());
        }
        Ok(())
    }

    fn raw_put(&self, key: &StoreKey, value: &[u8]) -> Result<()> {
        self.map
            .write()
            .insert(key.as_bytes().to_vec(), value.to_vec());
        Ok(())
    }

    fn raw_delete(&self, key: &StoreKey) -> Result<()> {
        self.map.write().remove(key.as_bytes());
        Ok(())
    }
}

impl Engine for BasicStore {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn handles(&self) -> StoreHandles {
        StoreHandles {
            key_value: Some(Arc::new(self.clone())),
            ..StoreHandles::default()
        }
    }

    fn close(&self) {}
}
