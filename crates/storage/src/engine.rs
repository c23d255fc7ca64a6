//! Storage engines and capability projection
//!
//! An [`Engine`] is an open backend. Its capability set is projected once,
//! at construction, into a [`StoreHandles`] value: one optional typed handle
//! per capability. Requesting a handle the backend does not satisfy fails
//! closed with `CapabilityMissing` before any I/O happens.
//!
//! Engines are compiled in and selected by alias through [`open_engine`],
//! the way datatypes are compiled in and selected by name.

use crate::basic::BasicStore;
use crate::cancel::CancelToken;
use crate::memstore::MemStore;
use crate::traits::{
    Batcher, GraphStore, KeyValueDb, KeyValueIngestable, KeyValueRequester,
    OrderedKeyValueDb, OrderedKeyValueGetter, SizeViewer, TransactionDb,
};
use axon_core::key::{self, TKEY_MAX_CLASS, TKEY_MIN_CLASS};
use axon_core::{
    AxonError, Capability, ClientId, InstanceId, Result, TKey, VersionId,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::info;

/// An open storage backend.
pub trait Engine: Send + Sync {
    /// The engine's alias, as used in configuration.
    fn name(&self) -> &'static str;

    /// Project the engine's capability set into typed handles.
    fn handles(&self) -> StoreHandles;

    /// Release the backend. Engines with durable state flush it here.
    fn close(&self);
}

impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Engine({})", self.name())
    }
}

/// The capability projection of one engine: a typed handle per capability
/// the engine satisfies, computed once at open.
#[derive(Clone, Default)]
pub struct StoreHandles {
    /// Plain get/put/delete.
    pub key_value: Option<Arc<dyn KeyValueDb>>,
    /// Ordered range reads and writes.
    pub ordered: Option<Arc<dyn OrderedKeyValueDb>>,
    /// Atomic write batches.
    pub batcher: Option<Arc<dyn Batcher>>,
    /// Queued request buffers.
    pub requester: Option<Arc<dyn KeyValueRequester>>,
    /// Advisory locks and single-key patches.
    pub transactions: Option<Arc<dyn TransactionDb>>,
    /// Bulk ingest.
    pub ingest: Option<Arc<dyn KeyValueIngestable>>,
    /// Approximate size queries.
    pub size_viewer: Option<Arc<dyn SizeViewer>>,
    /// Layered graph storage.
    pub graph: Option<Arc<dyn GraphStore>>,
}

impl StoreHandles {
    /// Plain key-value handle, or `CapabilityMissing`.
    pub fn key_value_db(&self) -> Result<Arc<dyn KeyValueDb>> {
        self.key_value
            .clone()
            .ok_or(AxonError::CapabilityMissing {
                capability: Capability::KeyValue,
            })
    }

    /// Ordered key-value handle, or `CapabilityMissing`.
    pub fn ordered_key_value_db(&self) -> Result<Arc<dyn OrderedKeyValueDb>> {
        self.ordered.clone().ok_or(AxonError::CapabilityMissing {
            capability: Capability::OrderedKeyValue,
        })
    }

    /// Batch-write handle, or `CapabilityMissing`.
    pub fn batcher(&self) -> Result<Arc<dyn Batcher>> {
        self.batcher.clone().ok_or(AxonError::CapabilityMissing {
            capability: Capability::Batcher,
        })
    }

    /// Request-buffer handle, or `CapabilityMissing`.
    pub fn requester(&self) -> Result<Arc<dyn KeyValueRequester>> {
        self.requester.clone().ok_or(AxonError::CapabilityMissing {
            capability: Capability::Requester,
        })
    }

    /// Transactional handle, or `CapabilityMissing`.
    pub fn transaction_db(&self) -> Result<Arc<dyn TransactionDb>> {
        self.transactions
            .clone()
            .ok_or(AxonError::CapabilityMissing {
                capability: Capability::Transactions,
            })
    }

    /// Ingest handle, or `CapabilityMissing`.
    pub fn ingestable(&self) -> Result<Arc<dyn KeyValueIngestable>> {
        self.ingest.clone().ok_or(AxonError::CapabilityMissing {
            capability: Capability::Ingest,
        })
    }

    /// Size-query handle, or `CapabilityMissing`.
    pub fn size_viewer(&self) -> Result<Arc<dyn SizeViewer>> {
        self.size_viewer
            .clone()
            .ok_or(AxonError::CapabilityMissing {
                capability: Capability::SizeViewer,
            })
    }

    /// Graph-store handle, or `CapabilityMissing`.
    pub fn graph_store(&self) -> Result<Arc<dyn GraphStore>> {
        self.graph.clone().ok_or(AxonError::CapabilityMissing {
            capability: Capability::Graph,
        })
    }
}

/// Open a compiled-in storage engine by alias.
///
/// - `"memstore"`: ordered in-memory engine with snapshot-on-close
///   persistence under `path`; satisfies every capability except graph.
/// - `"basic"`: unordered in-memory engine with plain key-value access
///   only.
///
/// An unknown alias is an open error.
pub fn open_engine(alias: &str, path: &Path, create: bool) -> Result<Arc<dyn Engine>> {
    let engine: Arc<dyn Engine> = match alias {
        "memstore" => Arc::new(MemStore::open(path, create)?),
        "basic" => Arc::new(BasicStore::new()),
        other => {
            return Err(AxonError::open(format!(
                "unknown storage engine alias {other:?}"
            )))
        }
    };
    info!(engine = alias, path = %path.display(), "opened storage engine");
    Ok(engine)
}

/// Find the smallest instance ID greater than `cur` that has stored data.
///
/// Probes the raw key space the way replication does: a keys-only range
/// query starting just past `cur`, cancelled as soon as the first key
/// arrives.
pub fn next_instance_id(
    db: &dyn OrderedKeyValueGetter,
    cur: InstanceId,
) -> Result<Option<InstanceId>> {
    let beg = key::data_key(
        cur.next(),
        VersionId(0),
        ClientId(0),
        &TKey::min_of_class(TKEY_MIN_CLASS),
    );
    let end = key::data_key(
        InstanceId::MAX,
        VersionId::MAX,
        ClientId::MAX,
        &TKey::max_of_class(TKEY_MAX_CLASS),
    );
    let (tx, rx) = mpsc::sync_channel(16);
    let cancel = CancelToken::new();

    std::thread::scope(|scope| {
        let producer = scope.spawn(|| db.raw_range_query(&beg, &end, true, tx, &cancel));

        let mut found = None;
        let mut decode_err = None;
        for item in rx.iter() {
            match item {
                Some(kv) => {
                    match key::decode_data_key(&kv.key) {
                        Ok(parts) => found = Some(parts.instance),
                        Err(e) => decode_err = Some(AxonError::from(e)),
                    }
                    cancel.cancel();
                    break;
                }
                None => break,
            }
        }
        // Unblocks the producer before we join it
        drop(rx);

        match producer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(AxonError::backend("raw range query panicked")),
        }
        if let Some(e) = decode_err {
            return Err(e);
        }
        Ok(found)
    })
}

/// Approximate stored sizes of the given instances, via the size-viewer
/// capability.
pub fn instance_sizes(
    sv: &dyn SizeViewer,
    instances: &[InstanceId],
) -> Result<HashMap<InstanceId, u64>> {
    let ranges: Vec<_> = instances
        .iter()
        .map(|id| key::instance_data_range(*id))
        .collect();
    let sizes = sv.get_approximate_sizes(&ranges)?;
    if sizes.len() != instances.len() {
        return Err(AxonError::backend(format!(
            "got {} instance sizes for {} requested instances",
            sizes.len(),
            instances.len()
        )));
    }
    Ok(instances.iter().copied().zip(sizes).collect())
}
