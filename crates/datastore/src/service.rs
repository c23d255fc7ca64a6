//! The datastore service
//!
//! A [`Service`] couples one open storage backend with the set of
//! repositories stored in it. It is the only mutation path for registry and
//! repository state, which is what keeps the in-memory structures and the
//! persisted metadata records consistent:
//!
//! - Every mutation takes the per-version mutex (created on first use,
//!   never removed) and/or the registry lock, applies in memory, then
//!   persists the affected records through the metadata context.
//! - When the backend supports batches, the records go out as one atomic
//!   commit. Otherwise they are written sequentially and a persistence
//!   failure rolls the in-memory state back to its pre-mutation snapshot
//!   before the error is returned.
//!
//! The service owns the backend handles exclusively; every exit path from
//! the open flow closes them, including error returns.

use crate::config::DatastoreConfig;
use crate::datatype;
use crate::registry::{RegistryRecord, RepoRegistry};
use crate::repo::{decode_record, encode_record, Repo};
use axon_core::key;
use axon_core::{AxonError, DataConfig, RepoId, Result, TKey, VersionId, VersionUuid};
use axon_storage::{
    open_engine, Batcher, DataContext, Engine, GraphStore, HandlerPool, KeyValueDb,
    KeyValueIngestable, KeyValueRequester, MetadataContext, OrderedKeyValueDb, SizeViewer,
    StoreHandles, TransactionDb,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Version of the datastore metadata layout, reported by `about_json`.
pub const DATASTORE_VERSION: &str = "0.1";

/// How long shutdown waits for in-flight chunk handlers before proceeding.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// One open datastore: backend handles plus the repositories stored in it.
pub struct Service {
    engine: Arc<dyn Engine>,
    handles: StoreHandles,
    /// Instance-name routed engines, each rooted in a subdirectory of the
    /// datastore path named after the instance.
    routed: HashMap<String, (Arc<dyn Engine>, StoreHandles)>,
    registry: RwLock<RepoRegistry>,
    version_mutexes: Mutex<HashMap<VersionId, Arc<Mutex<()>>>>,
    pool: HandlerPool,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").finish_non_exhaustive()
    }
}

impl Service {
    /// Create an empty datastore at the configured path.
    pub fn init(config: &DatastoreConfig) -> Result<()> {
        let engine = open_engine(&config.engine, &config.path, true)?;
        let result = (|| {
            let handles = engine.handles();
            let kv = handles.key_value_db()?;
            let registry = RepoRegistry::new();
            kv.put(
                &MetadataContext,
                &key::registry_tkey(),
                &encode_record(&registry.record())?,
            )
        })();
        engine.close();
        result
    }

    /// Open the datastore at the configured path.
    ///
    /// A missing registry record initializes an empty datastore in place.
    /// Every referenced datatype must be compiled into this executable.
    pub fn open(config: &DatastoreConfig) -> Result<Self> {
        let engine = open_engine(&config.engine, &config.path, true)?;
        match Self::open_with_engine(Arc::clone(&engine), config) {
            Ok(service) => Ok(service),
            Err(e) => {
                engine.close();
                Err(e)
            }
        }
    }

    fn open_with_engine(engine: Arc<dyn Engine>, config: &DatastoreConfig) -> Result<Self> {
        let handles = engine.handles();
        let kv = handles.key_value_db()?;
        let ctx = MetadataContext;

        let registry = match kv.get(&ctx, &key::registry_tkey())? {
            None => {
                info!(path = %config.path.display(), "no registry record; initializing empty datastore");
                let registry = RepoRegistry::new();
                kv.put(&ctx, &key::registry_tkey(), &encode_record(&registry.record())?)?;
                registry
            }
            Some(bytes) => {
                let record: RegistryRecord = decode_record(&bytes)?;
                let mut repos = Vec::with_capacity(record.repo_ids.len());
                for &repo_id in &record.repo_ids {
                    let repo_bytes = kv.get(&ctx, &key::repo_tkey(repo_id))?.ok_or_else(|| {
                        AxonError::registry(format!("missing descriptor record for repo {repo_id}"))
                    })?;
                    let dag_bytes = kv.get(&ctx, &key::dag_tkey(repo_id))?.ok_or_else(|| {
                        AxonError::registry(format!("missing DAG record for repo {repo_id}"))
                    })?;
                    let repo = Repo::from_records(
                        decode_record(&repo_bytes)?,
                        decode_record(&dag_bytes)?,
                    );
                    repo.verify_datatypes()?;
                    repos.push(repo);
                }
                RepoRegistry::from_parts(record, repos)?
            }
        };

        let mut routed: HashMap<String, (Arc<dyn Engine>, StoreHandles)> = HashMap::new();
        for (instance, alias) in &config.instance_engines {
            match open_engine(alias, &config.path.join(instance), true) {
                Ok(e) => {
                    let h = e.handles();
                    routed.insert(instance.clone(), (e, h));
                }
                Err(err) => {
                    for (engine, _) in routed.values() {
                        engine.close();
                    }
                    return Err(err);
                }
            }
        }

        info!(
            path = %config.path.display(),
            engine = engine.name(),
            repos = registry.repos().len(),
            "datastore opened"
        );
        Ok(Service {
            engine,
            handles,
            routed,
            registry: RwLock::new(registry),
            version_mutexes: Mutex::new(HashMap::new()),
            pool: HandlerPool::with_default_size(),
        })
    }

    // ========================================================================
    // Capability accessors
    // ========================================================================

    /// The default engine's alias.
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Plain key-value handle, or `CapabilityMissing`.
    pub fn key_value_db(&self) -> Result<Arc<dyn KeyValueDb>> {
        self.handles.key_value_db()
    }

    /// Ordered key-value handle, or `CapabilityMissing`.
    pub fn ordered_key_value_db(&self) -> Result<Arc<dyn OrderedKeyValueDb>> {
        self.handles.ordered_key_value_db()
    }

    /// Batch-write handle, or `CapabilityMissing`.
    pub fn batcher(&self) -> Result<Arc<dyn Batcher>> {
        self.handles.batcher()
    }

    /// Request-buffer handle, or `CapabilityMissing`.
    pub fn requester(&self) -> Result<Arc<dyn KeyValueRequester>> {
        self.handles.requester()
    }

    /// Transactional handle, or `CapabilityMissing`.
    pub fn transaction_db(&self) -> Result<Arc<dyn TransactionDb>> {
        self.handles.transaction_db()
    }

    /// Ingest handle, or `CapabilityMissing`.
    pub fn ingestable(&self) -> Result<Arc<dyn KeyValueIngestable>> {
        self.handles.ingestable()
    }

    /// Size-query handle, or `CapabilityMissing`.
    pub fn size_viewer(&self) -> Result<Arc<dyn SizeViewer>> {
        self.handles.size_viewer()
    }

    /// Graph-store handle, or `CapabilityMissing`.
    pub fn graph_db(&self) -> Result<Arc<dyn GraphStore>> {
        self.handles.graph_store()
    }

    /// Capability handles serving a particular data instance: the routed
    /// engine if one was configured for the name, the default otherwise.
    pub fn data_store(&self, instance: &str) -> StoreHandles {
        self.routed
            .get(instance)
            .map(|(_, handles)| handles.clone())
            .unwrap_or_else(|| self.handles.clone())
    }

    /// The pool bounding concurrent chunk handlers.
    pub fn handler_pool(&self) -> &HandlerPool {
        &self.pool
    }

    // ========================================================================
    // Resolution and contexts
    // ========================================================================

    /// Resolve a full UUID or unique hex prefix to its identifiers.
    pub fn resolve_uuid(&self, prefix: &str) -> Result<(VersionUuid, RepoId, VersionId)> {
        self.registry.read().resolve_prefix(prefix)
    }

    /// The compact `(RepoId, VersionId)` pair behind a UUID.
    pub fn local_ids(&self, uuid: VersionUuid) -> Result<(RepoId, VersionId)> {
        let registry = self.registry.read();
        let (repo, version) = registry
            .repo_of_uuid(uuid)
            .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
        Ok((repo.repo_id(), version))
    }

    /// The metadata context.
    pub fn metadata_context(&self) -> MetadataContext {
        MetadataContext
    }

    /// Materialize a data context for `(version, instance)`: the namespacing
    /// handle every subsequent storage call for that pair goes through.
    pub fn data_context(&self, uuid: VersionUuid, instance: &str) -> Result<DataContext> {
        let registry = self.registry.read();
        let (repo, version) = registry
            .repo_of_uuid(uuid)
            .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
        let descriptor = repo.data_by_name(instance).ok_or_else(|| {
            AxonError::not_found(format!("data instance {instance:?} in repo {}", repo.alias))
        })?;
        let ancestry = repo.dag().ancestry(version)?;
        Ok(DataContext::new(descriptor.instance_id, ancestry))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a new repository with a fresh unlocked root version.
    pub fn new_repo(
        &self,
        alias: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(VersionUuid, RepoId)> {
        let mut registry = self.registry.write();
        let snapshot = registry.clone();
        let repo_id = registry.alloc_repo_id();
        let root_version = registry.alloc_version_id();
        let root = VersionUuid::new();
        registry.add_repo(Repo::new(repo_id, root, root_version, alias, description));
        if let Err(e) = self.persist_with_registry(&registry, repo_id) {
            *registry = snapshot;
            warn!(error = %e, "rolled back repo creation after persistence failure");
            return Err(e);
        }
        info!(repo = %root.hex(), id = repo_id.value(), "created repo");
        Ok((root, repo_id))
    }

    /// Create a new open child version off a locked parent.
    pub fn new_version(&self, parent: VersionUuid) -> Result<VersionUuid> {
        let (repo_id, parent_version) = self.local_ids(parent)?;
        let mutex = self.version_mutex(parent_version);
        let _guard = mutex.lock();

        let mut registry = self.registry.write();
        let snapshot = registry.clone();
        let child_version = registry.alloc_version_id();
        let repo = registry
            .repo_mut(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        let child = match repo.new_child(parent, child_version) {
            Ok(uuid) => uuid,
            Err(e) => {
                *registry = snapshot;
                return Err(e);
            }
        };
        registry.index_version(child, repo_id, child_version);
        if let Err(e) = self.persist_with_registry(&registry, repo_id) {
            *registry = snapshot;
            warn!(error = %e, "rolled back version creation after persistence failure");
            return Err(e);
        }
        Ok(child)
    }

    /// Create a merge version whose parents are the given locked versions.
    ///
    /// All parents must live in the same repository.
    pub fn merge(&self, parents: &[VersionUuid], note: &str) -> Result<VersionUuid> {
        if parents.is_empty() {
            return Err(AxonError::conflict("a merge requires parent versions"));
        }
        let (repo_id, mut parent_versions) = {
            let registry = self.registry.read();
            let mut repo_id = None;
            let mut versions = Vec::with_capacity(parents.len());
            for &uuid in parents {
                let (repo, version) = registry
                    .repo_of_uuid(uuid)
                    .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
                match repo_id {
                    None => repo_id = Some(repo.repo_id()),
                    Some(id) if id == repo.repo_id() => {}
                    Some(_) => {
                        return Err(AxonError::conflict(
                            "merge parents must belong to one repository",
                        ))
                    }
                }
                versions.push(version);
            }
            let repo_id =
                repo_id.ok_or_else(|| AxonError::conflict("a merge requires parent versions"))?;
            (repo_id, versions)
        };
        // Lock order: ascending version ID, so concurrent merges cannot
        // deadlock on each other.
        parent_versions.sort_unstable();
        parent_versions.dedup();
        let mutexes: Vec<_> = parent_versions
            .iter()
            .map(|&v| self.version_mutex(v))
            .collect();
        let _guards: Vec<_> = mutexes.iter().map(|m| m.lock()).collect();

        let mut registry = self.registry.write();
        let snapshot = registry.clone();
        let child_version = registry.alloc_version_id();
        let repo = registry
            .repo_mut(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        let child = match repo.merge(parents, child_version, note) {
            Ok(uuid) => uuid,
            Err(e) => {
                *registry = snapshot;
                return Err(e);
            }
        };
        registry.index_version(child, repo_id, child_version);
        if let Err(e) = self.persist_with_registry(&registry, repo_id) {
            *registry = snapshot;
            warn!(error = %e, "rolled back merge after persistence failure");
            return Err(e);
        }
        Ok(child)
    }

    /// Lock a version, freezing its data in the versioned view. Idempotent.
    pub fn lock(&self, uuid: VersionUuid) -> Result<()> {
        let (repo_id, version) = self.local_ids(uuid)?;
        let mutex = self.version_mutex(version);
        let _guard = mutex.lock();
        self.mutate_repo(repo_id, |repo| repo.lock(uuid))
    }

    /// Discard an unlocked leaf version and its version-map entry.
    pub fn discard_version(&self, uuid: VersionUuid) -> Result<()> {
        let (repo_id, version) = self.local_ids(uuid)?;
        let mutex = self.version_mutex(version);
        let _guard = mutex.lock();

        let mut registry = self.registry.write();
        let snapshot = registry.clone();
        let repo = registry
            .repo_mut(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        if let Err(e) = repo.discard(uuid) {
            *registry = snapshot;
            return Err(e);
        }
        registry.unindex_version(uuid);
        let repo = registry
            .repo(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        if let Err(e) = self.persist_repo(repo) {
            *registry = snapshot;
            warn!(error = %e, "rolled back version discard after persistence failure");
            return Err(e);
        }
        Ok(())
    }

    /// Create a data instance of a compiled-in datatype in the repository
    /// holding `uuid`.
    pub fn new_data(
        &self,
        uuid: VersionUuid,
        type_name: &str,
        name: &str,
        config: DataConfig,
    ) -> Result<()> {
        let (repo_id, _) = self.local_ids(uuid)?;
        self.mutate_repo(repo_id, |repo| {
            repo.new_data(name, type_name, config.clone()).map(|_| ())
        })
    }

    /// Merge configuration fields into an existing data instance.
    pub fn modify_data(&self, uuid: VersionUuid, name: &str, config: &DataConfig) -> Result<()> {
        let (repo_id, _) = self.local_ids(uuid)?;
        self.mutate_repo(repo_id, |repo| repo.modify_data(name, config))
    }

    /// Force persistence of the repository holding `uuid`.
    pub fn save_repo(&self, uuid: VersionUuid) -> Result<()> {
        let (repo_id, _) = self.local_ids(uuid)?;
        let registry = self.registry.read();
        let repo = registry
            .repo(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        self.persist_repo(repo)
    }

    // ========================================================================
    // JSON surfaces
    // ========================================================================

    /// Registry list: `uuid -> {alias, description, root}`.
    pub fn repos_list_json(&self) -> serde_json::Value {
        self.registry.read().list_json()
    }

    /// Full detail of the repository holding `uuid`.
    pub fn repo_json(&self, uuid: VersionUuid) -> Result<serde_json::Value> {
        let registry = self.registry.read();
        let (repo, _) = registry
            .repo_of_uuid(uuid)
            .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
        Ok(repo.json())
    }

    /// Compiled-in datatypes: `name -> url`.
    pub fn types_json(&self) -> serde_json::Value {
        datatype::types_json()
    }

    /// Component versions and backend identity of this service.
    pub fn about_json(&self) -> serde_json::Value {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        serde_json::json!({
            "Datastore version": DATASTORE_VERSION,
            "Storage engine": self.engine.name(),
            "Cores": cores,
            "Datatypes": datatype::compiled_type_names(),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drain in-flight chunk handlers (bounded wait), then close every
    /// backend handle.
    pub fn shutdown(self) {
        if !self.pool.drain(SHUTDOWN_DRAIN_TIMEOUT) {
            warn!(
                active = self.pool.active(),
                "continuing shutdown with chunk handlers still active"
            );
        }
        for (engine, _) in self.routed.values() {
            engine.close();
        }
        self.engine.close();
        info!("datastore closed");
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// The mutex guarding one version's mutations. Entries are created on
    /// first use and kept for the service's lifetime.
    fn version_mutex(&self, version: VersionId) -> Arc<Mutex<()>> {
        let mut map = self.version_mutexes.lock();
        Arc::clone(
            map.entry(version)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Apply `f` to one repository under the registry write lock, then
    /// persist the repository records, rolling back in memory on failure.
    fn mutate_repo(
        &self,
        repo_id: RepoId,
        f: impl FnOnce(&mut Repo) -> Result<()>,
    ) -> Result<()> {
        let mut registry = self.registry.write();
        let snapshot = registry.clone();
        let repo = registry
            .repo_mut(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        if let Err(e) = f(repo) {
            *registry = snapshot;
            return Err(e);
        }
        let repo = registry
            .repo(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        if let Err(e) = self.persist_repo(repo) {
            *registry = snapshot;
            warn!(error = %e, "rolled back repo mutation after persistence failure");
            return Err(e);
        }
        Ok(())
    }

    /// Persist the registry record plus one repository's records: one
    /// batch when the backend supports it, sequential puts otherwise.
    fn persist_with_registry(&self, registry: &RepoRegistry, repo_id: RepoId) -> Result<()> {
        let repo = registry
            .repo(repo_id)
            .ok_or_else(|| AxonError::backend(format!("registry lost repo {repo_id}")))?;
        let mut writes: Vec<(TKey, Vec<u8>)> = Vec::with_capacity(3);
        writes.push((key::registry_tkey(), encode_record(&registry.record())?));
        writes.push((key::repo_tkey(repo_id), encode_record(&repo.record())?));
        writes.push((key::dag_tkey(repo_id), encode_record(repo.dag())?));
        self.write_metadata(writes)
    }

    /// Persist one repository's descriptor and DAG records.
    fn persist_repo(&self, repo: &Repo) -> Result<()> {
        let writes = vec![
            (key::repo_tkey(repo.repo_id()), encode_record(&repo.record())?),
            (key::dag_tkey(repo.repo_id()), encode_record(repo.dag())?),
        ];
        self.write_metadata(writes)
    }

    fn write_metadata(&self, writes: Vec<(TKey, Vec<u8>)>) -> Result<()> {
        let ctx = MetadataContext;
        if let Ok(batcher) = self.handles.batcher() {
            let mut batch = batcher.new_batch(&ctx)?;
            for (tkey, bytes) in writes {
                batch.put(tkey, bytes);
            }
            batch.commit()
        } else {
            let kv = self.handles.key_value_db()?;
            for (tkey, bytes) in writes {
                kv.put(&ctx, &tkey, &bytes)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (Service, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatastoreConfig::new(dir.path());
        (Service::open(&config).unwrap(), dir)
    }

    #[test]
    fn test_open_bootstraps_empty_datastore() {
        let (service, _dir) = service();
        assert_eq!(service.repos_list_json(), serde_json::json!({}));
        service.shutdown();
    }

    #[test]
    fn test_first_repo_gets_id_one() {
        let (service, _dir) = service();
        let (root, repo_id) = service.new_repo("alpha", "").unwrap();
        assert_eq!(repo_id, RepoId(1));
        assert_eq!(service.local_ids(root).unwrap(), (RepoId(1), VersionId(1)));
        service.shutdown();
    }

    #[test]
    fn test_version_mutex_map_is_stable() {
        let (service, _dir) = service();
        let a = service.version_mutex(VersionId(7));
        let b = service.version_mutex(VersionId(7));
        assert!(Arc::ptr_eq(&a, &b));
        service.shutdown();
    }

    #[test]
    fn test_about_json_shape() {
        let (service, _dir) = service();
        let about = service.about_json();
        assert_eq!(about["Datastore version"], DATASTORE_VERSION);
        assert_eq!(about["Storage engine"], "memstore");
        assert!(about["Cores"].as_u64().unwrap() >= 1);
        service.shutdown();
    }
}
