//! Repositories: data instances plus a version DAG
//!
//! A repository owns a set of named data instances and the DAG of versions
//! their data is organized under. Clients address versions by UUID; the
//! repo maps those onto the compact `VersionId`s that appear in keys.
//!
//! Persistence: the descriptor and the DAG are serialized as separate
//! records (each under its own reserved metadata key) so the DAG can be
//! rewritten without touching instance metadata. Every record starts with
//! a format-version byte ahead of its bincode body.

use crate::dag::VersionDag;
use crate::datatype;
use axon_core::{
    AxonError, DataConfig, InstanceId, RepoId, Result, VersionId, VersionUuid,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Format-version byte leading every persisted metadata record.
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Serialize a metadata record: format-version byte + bincode body.
pub(crate) fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = vec![RECORD_FORMAT_VERSION];
    out.extend(bincode::serialize(value).map_err(|e| AxonError::backend(e.to_string()))?);
    Ok(out)
}

/// Decode a metadata record, rejecting unknown format versions.
pub(crate) fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((&RECORD_FORMAT_VERSION, body)) => {
            bincode::deserialize(body).map_err(|e| AxonError::registry(e.to_string()))
        }
        Some((&other, _)) => Err(AxonError::registry(format!(
            "unsupported metadata record format version {other}"
        ))),
        None => Err(AxonError::registry("empty metadata record")),
    }
}

/// Descriptor of one named data instance within a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInstance {
    /// Instance name, unique within the repository.
    pub name: String,
    /// Datatype name the instance was created with.
    pub type_name: String,
    /// Datatype driver version at creation time.
    pub type_version: String,
    /// Canonical URL of the datatype implementation.
    pub type_url: String,
    /// Compact identifier used in this instance's on-disk keys.
    pub instance_id: InstanceId,
    /// Datatype-interpreted configuration.
    pub config: DataConfig,
}

impl DataInstance {
    /// User-visible JSON for this instance.
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "typename": self.type_name,
            "typeversion": self.type_version,
            "typeurl": self.type_url,
            "config": self.config.to_value(),
        })
    }
}

/// Persisted form of a repository, minus its DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RepoRecord {
    pub repo_id: RepoId,
    pub root: VersionUuid,
    pub alias: String,
    pub description: String,
    pub properties: BTreeMap<String, String>,
    pub version_map: HashMap<VersionUuid, VersionId>,
    pub instances: BTreeMap<String, DataInstance>,
    pub next_instance: InstanceId,
}

/// A repository: named data instances plus the version DAG.
#[derive(Debug, Clone, PartialEq)]
pub struct Repo {
    repo_id: RepoId,
    root: VersionUuid,
    /// Human-friendly repository alias.
    pub alias: String,
    /// Free-form description.
    pub description: String,
    /// Arbitrary string properties attached to the repository.
    pub properties: BTreeMap<String, String>,
    version_map: HashMap<VersionUuid, VersionId>,
    instances: BTreeMap<String, DataInstance>,
    next_instance: InstanceId,
    dag: VersionDag,
}

impl Repo {
    /// Create a repository with a fresh unlocked root version.
    pub fn new(
        repo_id: RepoId,
        root: VersionUuid,
        root_version: VersionId,
        alias: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut version_map = HashMap::new();
        version_map.insert(root, root_version);
        Repo {
            repo_id,
            root,
            alias: alias.into(),
            description: description.into(),
            properties: BTreeMap::new(),
            version_map,
            instances: BTreeMap::new(),
            next_instance: InstanceId(1),
            dag: VersionDag::new(root, root_version),
        }
    }

    /// The repository's compact identifier.
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }

    /// The root version's UUID.
    pub fn root(&self) -> VersionUuid {
        self.root
    }

    /// The version DAG.
    pub fn dag(&self) -> &VersionDag {
        &self.dag
    }

    /// Resolve a UUID to its compact version ID within this repository.
    pub fn version_id_of(&self, uuid: VersionUuid) -> Option<VersionId> {
        self.version_map.get(&uuid).copied()
    }

    /// Every `(uuid, version_id)` pair in this repository.
    pub fn versions(&self) -> impl Iterator<Item = (VersionUuid, VersionId)> + '_ {
        self.version_map.iter().map(|(u, v)| (*u, *v))
    }

    /// Look up a data instance by name.
    pub fn data_by_name(&self, name: &str) -> Option<&DataInstance> {
        self.instances.get(name)
    }

    /// Look up a data instance by its compact identifier.
    pub fn data_by_instance_id(&self, id: InstanceId) -> Option<&DataInstance> {
        self.instances.values().find(|d| d.instance_id == id)
    }

    /// Iterate over data instances in name order.
    pub fn data_instances(&self) -> impl Iterator<Item = &DataInstance> {
        self.instances.values()
    }

    /// Create a new data instance of a compiled-in datatype.
    pub fn new_data(
        &mut self,
        name: &str,
        type_name: &str,
        config: DataConfig,
    ) -> Result<&DataInstance> {
        if self.instances.contains_key(name) {
            return Err(AxonError::conflict(format!(
                "data instance {name:?} already exists"
            )));
        }
        let service = datatype::type_by_name(type_name)
            .ok_or_else(|| AxonError::datatype_unavailable(type_name, "any"))?;
        let instance_id = self.next_instance;
        self.next_instance = instance_id.next();
        let instance = DataInstance {
            name: name.to_string(),
            type_name: service.type_name().to_string(),
            type_version: service.type_version().to_string(),
            type_url: service.type_url().to_string(),
            instance_id,
            config,
        };
        self.instances.insert(name.to_string(), instance);
        Ok(&self.instances[name])
    }

    /// Merge configuration fields into an existing instance.
    ///
    /// The instance's type can never change.
    pub fn modify_data(&mut self, name: &str, config: &DataConfig) -> Result<()> {
        let instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| AxonError::not_found(format!("data instance {name:?}")))?;
        instance.config.merge(config);
        Ok(())
    }

    /// Append an open child version under a locked parent.
    pub fn new_child(&mut self, parent: VersionUuid, child_id: VersionId) -> Result<VersionUuid> {
        let parent_id = self
            .version_id_of(parent)
            .ok_or_else(|| AxonError::not_found(format!("version {parent}")))?;
        let child_uuid = VersionUuid::new();
        self.dag.new_child(parent_id, child_id, child_uuid)?;
        self.version_map.insert(child_uuid, child_id);
        Ok(child_uuid)
    }

    /// Lock a version by UUID. Idempotent.
    pub fn lock(&mut self, uuid: VersionUuid) -> Result<()> {
        let id = self
            .version_id_of(uuid)
            .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
        self.dag.lock(id)
    }

    /// Create a merge child of the given locked parents.
    pub fn merge(
        &mut self,
        parents: &[VersionUuid],
        child_id: VersionId,
        note: &str,
    ) -> Result<VersionUuid> {
        let mut parent_ids = Vec::with_capacity(parents.len());
        for &uuid in parents {
            parent_ids.push(
                self.version_id_of(uuid)
                    .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?,
            );
        }
        let child_uuid = VersionUuid::new();
        self.dag.merge(&parent_ids, child_id, child_uuid, note)?;
        self.version_map.insert(child_uuid, child_id);
        Ok(child_uuid)
    }

    /// Discard an unlocked leaf version.
    pub fn discard(&mut self, uuid: VersionUuid) -> Result<()> {
        let id = self
            .version_id_of(uuid)
            .ok_or_else(|| AxonError::not_found(format!("version {uuid}")))?;
        self.dag.discard_leaf(id)?;
        self.version_map.remove(&uuid);
        Ok(())
    }

    /// User-visible JSON for the repository detail surface.
    pub fn json(&self) -> serde_json::Value {
        let mut data_instances = serde_json::Map::new();
        for instance in self.instances.values() {
            data_instances.insert(instance.name.clone(), instance.json());
        }
        serde_json::json!({
            "Root": self.root.hex(),
            "Alias": self.alias,
            "Description": self.description,
            "Properties": self.properties,
            "DAG": self.dag.json_nodes(),
            "DataInstances": serde_json::Value::Object(data_instances),
        })
    }

    /// The persisted descriptor record (DAG excluded).
    pub(crate) fn record(&self) -> RepoRecord {
        RepoRecord {
            repo_id: self.repo_id,
            root: self.root,
            alias: self.alias.clone(),
            description: self.description.clone(),
            properties: self.properties.clone(),
            version_map: self.version_map.clone(),
            instances: self.instances.clone(),
            next_instance: self.next_instance,
        }
    }

    /// Reassemble a repository from its descriptor and DAG records.
    pub(crate) fn from_records(record: RepoRecord, dag: VersionDag) -> Self {
        Repo {
            repo_id: record.repo_id,
            root: record.root,
            alias: record.alias,
            description: record.description,
            properties: record.properties,
            version_map: record.version_map,
            instances: record.instances,
            next_instance: record.next_instance,
            dag,
        }
    }

    /// Verify every referenced datatype is compiled into this executable.
    pub fn verify_datatypes(&self) -> Result<()> {
        for instance in self.instances.values() {
            datatype::verify_available(&instance.type_name, &instance.type_version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::ErrorKind;

    fn repo() -> Repo {
        Repo::new(RepoId(1), VersionUuid::new(), VersionId(1), "test", "")
    }

    // ========================================
    // Data instances
    // ========================================

    #[test]
    fn test_new_data_allocates_instance_ids() {
        let mut repo = repo();
        let a = repo
            .new_data("grayscale", "keyvalue", DataConfig::new())
            .unwrap()
            .instance_id;
        let b = repo
            .new_data("segmentation", "keyvalue", DataConfig::new())
            .unwrap()
            .instance_id;
        assert_eq!(a, InstanceId(1));
        assert_eq!(b, InstanceId(2));
        assert_eq!(repo.data_by_name("grayscale").unwrap().type_name, "keyvalue");
        assert_eq!(repo.data_by_instance_id(b).unwrap().name, "segmentation");
    }

    #[test]
    fn test_new_data_rejects_duplicate_name() {
        let mut repo = repo();
        repo.new_data("d1", "keyvalue", DataConfig::new()).unwrap();
        let err = repo.new_data("d1", "keyvalue", DataConfig::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_new_data_rejects_unknown_type() {
        let mut repo = repo();
        let err = repo
            .new_data("d1", "unheard-of-type", DataConfig::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DatatypeUnavailable);
    }

    #[test]
    fn test_modify_data_merges_config() {
        let mut repo = repo();
        let mut config = DataConfig::new();
        config.set("block_size", serde_json::json!(32));
        repo.new_data("d1", "keyvalue", config).unwrap();

        let mut update = DataConfig::new();
        update.set("compression", serde_json::json!("lz4"));
        repo.modify_data("d1", &update).unwrap();

        let instance = repo.data_by_name("d1").unwrap();
        assert_eq!(instance.config.get("block_size"), Some(&serde_json::json!(32)));
        assert_eq!(
            instance.config.get("compression"),
            Some(&serde_json::json!("lz4"))
        );
        // Type identity is untouched by config merges
        assert_eq!(instance.type_name, "keyvalue");
    }

    #[test]
    fn test_modify_missing_data() {
        let mut repo = repo();
        let err = repo.modify_data("ghost", &DataConfig::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // ========================================
    // Versions
    // ========================================

    #[test]
    fn test_branching_updates_version_map() {
        let mut repo = repo();
        let root = repo.root();
        assert_eq!(repo.version_id_of(root), Some(VersionId(1)));

        repo.lock(root).unwrap();
        let child = repo.new_child(root, VersionId(2)).unwrap();
        assert_eq!(repo.version_id_of(child), Some(VersionId(2)));
        assert_ne!(child, root);
    }

    #[test]
    fn test_child_of_unlocked_root_fails() {
        let mut repo = repo();
        let root = repo.root();
        let err = repo.new_child(root, VersionId(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockViolation);
    }

    #[test]
    fn test_merge_through_repo() {
        let mut repo = repo();
        let root = repo.root();
        repo.lock(root).unwrap();
        let left = repo.new_child(root, VersionId(2)).unwrap();
        let right = repo.new_child(root, VersionId(3)).unwrap();
        repo.lock(left).unwrap();
        repo.lock(right).unwrap();

        let merged = repo.merge(&[left, right], VersionId(4), "weekly merge").unwrap();
        assert_eq!(repo.version_id_of(merged), Some(VersionId(4)));
        let node = repo.dag().node(VersionId(4)).unwrap();
        assert_eq!(node.parents, vec![VersionId(2), VersionId(3)]);
    }

    #[test]
    fn test_discard_removes_mapping() {
        let mut repo = repo();
        let root = repo.root();
        repo.lock(root).unwrap();
        let child = repo.new_child(root, VersionId(2)).unwrap();
        repo.discard(child).unwrap();
        assert_eq!(repo.version_id_of(child), None);
        assert!(repo.dag().node(VersionId(2)).is_none());
    }

    // ========================================
    // Records and JSON
    // ========================================

    #[test]
    fn test_record_round_trip() {
        let mut repo = repo();
        let root = repo.root();
        repo.lock(root).unwrap();
        repo.new_child(root, VersionId(2)).unwrap();
        repo.new_data("d1", "keyvalue", DataConfig::new()).unwrap();
        repo.properties.insert("lab".into(), "flyem".into());

        let record_bytes = encode_record(&repo.record()).unwrap();
        let dag_bytes = encode_record(repo.dag()).unwrap();
        let restored = Repo::from_records(
            decode_record(&record_bytes).unwrap(),
            decode_record(&dag_bytes).unwrap(),
        );
        assert_eq!(repo, restored);
    }

    #[test]
    fn test_decode_rejects_unknown_format_version() {
        let mut bytes = encode_record(&repo().record()).unwrap();
        bytes[0] = 0x7F;
        let err = decode_record::<RepoRecord>(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registry);
    }

    #[test]
    fn test_json_surface_field_names() {
        let mut repo = repo();
        let mut config = DataConfig::new();
        config.set("versioned", serde_json::json!(true));
        repo.new_data("grayscale", "keyvalue", config).unwrap();

        let json = repo.json();
        assert_eq!(json["Root"], repo.root().hex());
        assert_eq!(json["Alias"], "test");
        assert!(json["DAG"]["nodes"].is_array());
        let instance = &json["DataInstances"]["grayscale"];
        assert_eq!(instance["typename"], "keyvalue");
        assert_eq!(instance["typeversion"], "0.1");
        assert!(instance["typeurl"].as_str().unwrap().contains("keyvalue"));
        assert_eq!(instance["config"]["versioned"], true);
    }

    #[test]
    fn test_verify_datatypes() {
        let mut repo = repo();
        repo.new_data("d1", "keyvalue", DataConfig::new()).unwrap();
        assert!(repo.verify_datatypes().is_ok());
    }
}
