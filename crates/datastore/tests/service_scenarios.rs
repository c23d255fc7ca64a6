//! End-to-end service scenarios: create/lock/branch, tombstones, prefix
//! resolution, datatype verification, and capability projection.

use axon_core::{DataConfig, ErrorKind, RepoId, TKey, VersionUuid};
use axon_datastore::{register_type, DatastoreConfig, Service, TypeService};
use axon_storage::{KeyValueGetter, KeyValueSetter};
use std::sync::Arc;

const KV_CLASS: u8 = 0x20;

fn tk(body: &[u8]) -> TKey {
    TKey::new(KV_CLASS, body)
}

fn open_service(dir: &tempfile::TempDir) -> Service {
    Service::open(&DatastoreConfig::new(dir.path())).unwrap()
}

// ============================================================================
// Create / lock / branch
// ============================================================================

#[test]
fn test_create_lock_branch_and_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);

    let (uuid_a, repo_id) = service.new_repo("scenario-1", "").unwrap();
    assert_eq!(repo_id, RepoId(1));
    service
        .new_data(uuid_a, "keyvalue", "d1", DataConfig::new())
        .unwrap();

    let kv = service.key_value_db().unwrap();
    let ctx_a = service.data_context(uuid_a, "d1").unwrap();
    kv.put(&ctx_a, &tk(b"foo"), &[0x01]).unwrap();

    service.lock(uuid_a).unwrap();
    let uuid_b = service.new_version(uuid_a).unwrap();
    assert_ne!(uuid_a, uuid_b);

    let ctx_b = service.data_context(uuid_b, "d1").unwrap();
    // The child inherits the parent's value until it writes its own
    assert_eq!(kv.get(&ctx_b, &tk(b"foo")).unwrap(), Some(vec![0x01]));

    kv.put(&ctx_b, &tk(b"foo"), &[0x02]).unwrap();
    assert_eq!(kv.get(&ctx_a, &tk(b"foo")).unwrap(), Some(vec![0x01]));
    assert_eq!(kv.get(&ctx_b, &tk(b"foo")).unwrap(), Some(vec![0x02]));

    service.shutdown();
}

#[test]
fn test_tombstone_hides_key_in_child_only() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);

    let (uuid_a, _) = service.new_repo("scenario-2", "").unwrap();
    service
        .new_data(uuid_a, "keyvalue", "d1", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();
    let ctx_a = service.data_context(uuid_a, "d1").unwrap();
    kv.put(&ctx_a, &tk(b"foo"), &[0x01]).unwrap();

    service.lock(uuid_a).unwrap();
    let uuid_b = service.new_version(uuid_a).unwrap();
    let ctx_b = service.data_context(uuid_b, "d1").unwrap();

    kv.delete(&ctx_b, &tk(b"foo")).unwrap();

    assert_eq!(kv.get(&ctx_b, &tk(b"foo")).unwrap(), None);
    assert_eq!(kv.get(&ctx_a, &tk(b"foo")).unwrap(), Some(vec![0x01]));

    service.shutdown();
}

#[test]
fn test_new_version_requires_locked_parent() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);

    let (root, _) = service.new_repo("unlocked", "").unwrap();
    let err = service.new_version(root).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);

    service.lock(root).unwrap();
    assert!(service.new_version(root).is_ok());

    service.shutdown();
}

#[test]
fn test_lock_is_idempotent_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let (root, _) = service.new_repo("relock", "").unwrap();
    service.lock(root).unwrap();
    service.lock(root).unwrap();
    service.shutdown();
}

// ============================================================================
// Merge
// ============================================================================

#[test]
fn test_merge_reads_and_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);

    let (root, _) = service.new_repo("merge", "").unwrap();
    service
        .new_data(root, "keyvalue", "d1", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();

    let root_ctx = service.data_context(root, "d1").unwrap();
    kv.put(&root_ctx, &tk(b"shared"), &[0x00]).unwrap();
    service.lock(root).unwrap();

    let left = service.new_version(root).unwrap();
    let right = service.new_version(root).unwrap();
    let left_ctx = service.data_context(left, "d1").unwrap();
    let right_ctx = service.data_context(right, "d1").unwrap();
    kv.put(&left_ctx, &tk(b"divergent"), b"L").unwrap();
    kv.put(&right_ctx, &tk(b"divergent"), b"R").unwrap();
    service.lock(left).unwrap();
    service.lock(right).unwrap();

    let merged = service.merge(&[left, right], "weekly merge").unwrap();
    let merged_ctx = service.data_context(merged, "d1").unwrap();

    // Inherited from the common ancestor: no conflict
    assert_eq!(kv.get(&merged_ctx, &tk(b"shared")).unwrap(), Some(vec![0x00]));

    // Contradictory parents without a merge-level write: Conflict
    let err = kv.get(&merged_ctx, &tk(b"divergent")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // An explicit write at the merge node resolves it
    kv.put(&merged_ctx, &tk(b"divergent"), b"resolved").unwrap();
    assert_eq!(
        kv.get(&merged_ctx, &tk(b"divergent")).unwrap(),
        Some(b"resolved".to_vec())
    );

    service.shutdown();
}

#[test]
fn test_merge_requires_locked_parents() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let (root, _) = service.new_repo("merge-locks", "").unwrap();
    service.lock(root).unwrap();
    let left = service.new_version(root).unwrap();
    let right = service.new_version(root).unwrap();
    service.lock(left).unwrap();

    let err = service.merge(&[left, right], "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    service.shutdown();
}

// ============================================================================
// UUID prefix resolution
// ============================================================================

#[test]
fn test_prefix_resolution_and_ambiguity() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);

    // Create repos until two roots share their first hex character; with 16
    // possible digits this needs at most 17 repos.
    let mut roots: Vec<VersionUuid> = Vec::new();
    let (mut a, mut b) = (None, None);
    for i in 0..32 {
        let (root, _) = service.new_repo(format!("repo-{i}"), "").unwrap();
        if let Some(&prev) = roots
            .iter()
            .find(|r| r.hex().as_bytes()[0] == root.hex().as_bytes()[0])
        {
            a = Some(prev);
            b = Some(root);
            break;
        }
        roots.push(root);
    }
    let (a, b) = (a.expect("two shared-prefix roots"), b.unwrap());

    // The shared prefix is ambiguous
    let shared: String = a
        .hex()
        .chars()
        .zip(b.hex().chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect();
    let err = service.resolve_uuid(&shared).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousUuid);

    // One character past the shared prefix resolves uniquely
    let a_hex = a.hex();
    let (resolved, _, _) = service.resolve_uuid(&a_hex[..shared.len() + 1]).unwrap();
    assert_eq!(resolved, a);

    // Full UUIDs always resolve
    let (resolved, _, _) = service.resolve_uuid(&b.hex()).unwrap();
    assert_eq!(resolved, b);

    service.shutdown();
}

#[test]
fn test_resolution_miss_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let err = service.resolve_uuid("ffffffffffffffff").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    service.shutdown();
}

// ============================================================================
// Persistence across open/close
// ============================================================================

#[test]
fn test_datastore_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (uuid_a, uuid_b) = {
        let service = open_service(&dir);
        let (uuid_a, _) = service.new_repo("durable", "reopened").unwrap();
        service
            .new_data(uuid_a, "keyvalue", "d1", DataConfig::new())
            .unwrap();
        let kv = service.key_value_db().unwrap();
        let ctx = service.data_context(uuid_a, "d1").unwrap();
        kv.put(&ctx, &tk(b"foo"), &[0x01]).unwrap();
        service.lock(uuid_a).unwrap();
        let uuid_b = service.new_version(uuid_a).unwrap();
        service.shutdown();
        (uuid_a, uuid_b)
    };

    let service = open_service(&dir);
    // Registry, repo, DAG, and data all came back
    let (_, repo_id, _) = service.resolve_uuid(&uuid_a.hex()).unwrap();
    assert_eq!(repo_id, RepoId(1));
    let kv = service.key_value_db().unwrap();
    let ctx_b = service.data_context(uuid_b, "d1").unwrap();
    assert_eq!(kv.get(&ctx_b, &tk(b"foo")).unwrap(), Some(vec![0x01]));
    // Lock state survived: the still-open child cannot spawn children
    assert_eq!(
        service.new_version(uuid_b).unwrap_err().kind(),
        ErrorKind::LockViolation
    );
    service.shutdown();
}

// ============================================================================
// Datatype availability
// ============================================================================

struct VersionedFake {
    version: &'static str,
}

impl TypeService for VersionedFake {
    fn type_name(&self) -> &str {
        "ramp-dt"
    }
    fn type_version(&self) -> &str {
        self.version
    }
    fn type_url(&self) -> &str {
        "example.com/ramp-dt"
    }
}

#[test]
fn test_open_fails_when_datatype_version_is_missing() {
    let dir = tempfile::tempdir().unwrap();

    register_type(Arc::new(VersionedFake { version: "3" }));
    {
        let service = open_service(&dir);
        let (root, _) = service.new_repo("typed", "").unwrap();
        service
            .new_data(root, "ramp-dt", "volume", DataConfig::new())
            .unwrap();
        service.shutdown();
    }

    // The executable now links only version 2 of the datatype
    register_type(Arc::new(VersionedFake { version: "2" }));
    let err = Service::open(&DatastoreConfig::new(dir.path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DatatypeUnavailable);
    let msg = err.to_string();
    assert!(msg.contains("ramp-dt"), "error must name the type: {msg}");
    assert!(msg.contains('3'), "error must name the referenced version: {msg}");

    // Put version 3 back so other tests in this process are unaffected by
    // the shared registry.
    register_type(Arc::new(VersionedFake { version: "3" }));
}

#[test]
fn test_new_data_rejects_unknown_type_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let (root, _) = service.new_repo("untyped", "").unwrap();
    let err = service
        .new_data(root, "imaginary", "d1", DataConfig::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DatatypeUnavailable);
    service.shutdown();
}

// ============================================================================
// Capability projection
// ============================================================================

#[test]
fn test_basic_engine_serves_kv_but_fails_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatastoreConfig::new(dir.path()).with_engine("basic");
    let service = Service::open(&config).unwrap();

    // Plain get/put work end to end
    let (root, _) = service.new_repo("minimal", "").unwrap();
    service
        .new_data(root, "keyvalue", "d1", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();
    let ctx = service.data_context(root, "d1").unwrap();
    kv.put(&ctx, &tk(b"k"), &[1]).unwrap();
    assert_eq!(kv.get(&ctx, &tk(b"k")).unwrap(), Some(vec![1]));

    // Ordered capability fails closed at handle-request time
    let err = service.ordered_key_value_db().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);
    let err = service.size_viewer().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);
    let err = service.graph_db().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);

    service.shutdown();
}

#[test]
fn test_instance_store_routing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DatastoreConfig::new(dir.path());
    config
        .instance_engines
        .insert("fastlane".to_string(), "basic".to_string());
    let service = Service::open(&config).unwrap();

    let routed = service.data_store("fastlane");
    assert!(routed.ordered.is_none(), "routed basic engine has no ordered capability");
    let default = service.data_store("anything-else");
    assert!(default.ordered.is_some());

    service.shutdown();
}

// ============================================================================
// Repository operations through the service
// ============================================================================

#[test]
fn test_modify_data_merges_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let root = {
        let service = open_service(&dir);
        let (root, _) = service.new_repo("configured", "").unwrap();
        let mut config = DataConfig::new();
        config.set("block_size", serde_json::json!(32));
        service.new_data(root, "keyvalue", "d1", config).unwrap();

        let mut update = DataConfig::new();
        update.set("compression", serde_json::json!("lz4"));
        service.modify_data(root, "d1", &update).unwrap();
        service.shutdown();
        root
    };

    let service = open_service(&dir);
    let json = service.repo_json(root).unwrap();
    let config = &json["DataInstances"]["d1"]["config"];
    assert_eq!(config["block_size"], 32);
    assert_eq!(config["compression"], "lz4");
    service.shutdown();
}

#[test]
fn test_discard_unlocked_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let (root, _) = service.new_repo("discard", "").unwrap();
    service.lock(root).unwrap();
    let child = service.new_version(root).unwrap();

    service.discard_version(child).unwrap();
    assert_eq!(
        service.local_ids(child).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    // Locked versions are never discardable
    let err = service.discard_version(root).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    service.shutdown();
}

#[test]
fn test_json_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let service = open_service(&dir);
    let (root, _) = service.new_repo("json", "surface check").unwrap();
    service
        .new_data(root, "keyvalue", "d1", DataConfig::new())
        .unwrap();
    service.lock(root).unwrap();
    let child = service.new_version(root).unwrap();

    let list = service.repos_list_json();
    assert_eq!(list[root.hex()]["alias"], "json");

    let detail = service.repo_json(child).unwrap();
    assert_eq!(detail["Root"], root.hex());
    let nodes = detail["DAG"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["locked"], true);
    assert_eq!(nodes[1]["locked"], false);
    assert_eq!(detail["DataInstances"]["d1"]["typename"], "keyvalue");

    let types = service.types_json();
    assert!(types["keyvalue"].is_string());

    service.shutdown();
}

#[test]
fn test_save_repo_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let root = {
        let service = open_service(&dir);
        let (root, _) = service.new_repo("saved", "").unwrap();
        service.save_repo(root).unwrap();
        service.shutdown();
        root
    };
    let service = open_service(&dir);
    assert!(service.repo_json(root).is_ok());
    service.shutdown();
}
