//! Per-repository version DAG
//!
//! Every repository carries a directed acyclic graph of versions. A node is
//! born open (mutable); locking it is the only state transition and is
//! terminal. Only locked nodes may spawn children, which is what makes a
//! version's data immutable once history builds on it.
//!
//! Structural invariants maintained here:
//! - Exactly one root (the only node with no parents).
//! - Children lists mirror parent lists exactly.
//! - Merge parents are stored in canonical ascending `VersionId` order.
//! - Locked nodes are never removed.

use axon_core::{AxonError, Result, VersionId, VersionUuid};
use axon_storage::VersionAncestry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// One version node in a repository's DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionNode {
    /// Global identifier clients address this version by.
    pub uuid: VersionUuid,
    /// Compact local identifier used in on-disk keys.
    pub version_id: VersionId,
    /// Parent versions (empty only for the root).
    pub parents: Vec<VersionId>,
    /// Child versions.
    pub children: Vec<VersionId>,
    /// Whether the node has been locked. Terminal once set.
    pub locked: bool,
    /// Creation time, microseconds since the Unix epoch.
    pub created: u64,
    /// Last update time, microseconds since the Unix epoch.
    pub updated: u64,
    /// Free-form note attached at creation (merge annotations etc.).
    pub note: String,
    /// Append-only log of lifecycle events.
    pub log: Vec<String>,
}

impl VersionNode {
    fn new(uuid: VersionUuid, version_id: VersionId, parents: Vec<VersionId>, note: &str) -> Self {
        let now = unix_micros();
        VersionNode {
            uuid,
            version_id,
            parents,
            children: Vec::new(),
            locked: false,
            created: now,
            updated: now,
            note: note.to_string(),
            log: Vec::new(),
        }
    }
}

/// A repository's directed acyclic graph of versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDag {
    root: VersionId,
    nodes: HashMap<VersionId, VersionNode>,
}

impl VersionDag {
    /// A new DAG with a single unlocked root node.
    pub fn new(root_uuid: VersionUuid, root_id: VersionId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root_id, VersionNode::new(root_uuid, root_id, Vec::new(), ""));
        VersionDag {
            root: root_id,
            nodes,
        }
    }

    /// The root version.
    pub fn root(&self) -> VersionId {
        self.root
    }

    /// Look up a node.
    pub fn node(&self, id: VersionId) -> Option<&VersionNode> {
        self.nodes.get(&id)
    }

    /// Number of versions in the DAG.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the DAG is empty (never true: the root always exists).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &VersionNode> {
        self.nodes.values()
    }

    fn node_mut(&mut self, id: VersionId) -> Result<&mut VersionNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| AxonError::not_found(format!("version id {id}")))
    }

    fn require(&self, id: VersionId) -> Result<&VersionNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| AxonError::not_found(format!("version id {id}")))
    }

    /// Lock a version, making its data immutable in the versioned view.
    ///
    /// Locking an already-locked node is a no-op returning success.
    pub fn lock(&mut self, id: VersionId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.locked {
            return Ok(());
        }
        node.locked = true;
        node.updated = unix_micros();
        let stamp = node.updated;
        node.log.push(format!("locked at t={stamp}"));
        Ok(())
    }

    /// Append a new open child under a locked parent.
    pub fn new_child(
        &mut self,
        parent: VersionId,
        child_id: VersionId,
        child_uuid: VersionUuid,
    ) -> Result<()> {
        let parent_node = self.require(parent)?;
        if !parent_node.locked {
            return Err(AxonError::lock_violation(
                parent_node.uuid,
                "new children require a locked parent",
            ));
        }
        self.nodes.insert(
            child_id,
            VersionNode::new(child_uuid, child_id, vec![parent], ""),
        );
        self.node_mut(parent)?.children.push(child_id);
        Ok(())
    }

    /// Append a merge child under several locked parents.
    ///
    /// The parent set is stored sorted by ascending `VersionId`.
    pub fn merge(
        &mut self,
        parents: &[VersionId],
        child_id: VersionId,
        child_uuid: VersionUuid,
        note: &str,
    ) -> Result<()> {
        if parents.len() < 2 {
            return Err(AxonError::conflict(
                "a merge requires at least two parent versions",
            ));
        }
        let mut canonical: Vec<VersionId> = parents.to_vec();
        canonical.sort_unstable();
        canonical.dedup();
        for &parent in &canonical {
            let node = self.require(parent)?;
            if !node.locked {
                return Err(AxonError::lock_violation(
                    node.uuid,
                    "merge parents must be locked",
                ));
            }
        }
        self.nodes.insert(
            child_id,
            VersionNode::new(child_uuid, child_id, canonical.clone(), note),
        );
        for parent in canonical {
            self.node_mut(parent)?.children.push(child_id);
        }
        Ok(())
    }

    /// Discard an unlocked leaf.
    ///
    /// Locked nodes, nodes with children, and the root cannot be discarded.
    pub fn discard_leaf(&mut self, id: VersionId) -> Result<()> {
        let node = self.require(id)?;
        if node.locked {
            return Err(AxonError::lock_violation(
                node.uuid,
                "locked versions cannot be discarded",
            ));
        }
        if !node.children.is_empty() {
            return Err(AxonError::lock_violation(
                node.uuid,
                "only leaf versions can be discarded",
            ));
        }
        if id == self.root {
            return Err(AxonError::lock_violation(
                node.uuid,
                "the root version cannot be discarded",
            ));
        }
        let parents = node.parents.clone();
        self.nodes.remove(&id);
        for parent in parents {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|&c| c != id);
            }
        }
        Ok(())
    }

    /// The flat parent chain of `id`: breadth-first levels from the node
    /// toward the root, ascending `VersionId` within a level.
    pub fn ancestry(&self, id: VersionId) -> Result<VersionAncestry> {
        self.require(id)?;
        let mut visited: HashSet<VersionId> = HashSet::new();
        visited.insert(id);
        let mut levels: Vec<Vec<VersionId>> = Vec::new();
        let mut frontier = vec![id];
        loop {
            let mut next: Vec<VersionId> = Vec::new();
            for &v in &frontier {
                if let Some(node) = self.nodes.get(&v) {
                    for &parent in &node.parents {
                        if visited.insert(parent) {
                            next.push(parent);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            levels.push(next.clone());
            frontier = next;
        }
        Ok(VersionAncestry::new(id, levels))
    }

    /// JSON rendering of the DAG: `{"nodes": [...]}` with parents and
    /// children given as UUIDs, ordered by `VersionId`.
    pub fn json_nodes(&self) -> serde_json::Value {
        let uuid_of = |id: &VersionId| {
            self.nodes
                .get(id)
                .map(|n| n.uuid.hex())
                .unwrap_or_default()
        };
        let mut ordered: Vec<&VersionNode> = self.nodes.values().collect();
        ordered.sort_by_key(|n| n.version_id);
        let nodes: Vec<serde_json::Value> = ordered
            .iter()
            .map(|n| {
                serde_json::json!({
                    "uuid": n.uuid.hex(),
                    "parents": n.parents.iter().map(uuid_of).collect::<Vec<_>>(),
                    "children": n.children.iter().map(uuid_of).collect::<Vec<_>>(),
                    "locked": n.locked,
                    "created": n.created,
                    "updated": n.updated,
                    "note": n.note,
                })
            })
            .collect();
        serde_json::json!({ "nodes": nodes })
    }
}
