//! Datastore-wide repository registry
//!
//! The registry owns the ordered list of repositories, the UUID index used
//! for (prefix) resolution, and the allocation counters for `RepoId` and
//! `VersionId`, both datastore-wide. It is a plain data structure; the
//! service wraps it in a lock and persists it under the reserved registry
//! metadata key.

use crate::repo::{Repo, RepoRecord};
use axon_core::{AxonError, RepoId, Result, VersionId, VersionUuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted form of the registry: counters plus the repo ID list. The
/// repositories themselves live under their own metadata keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegistryRecord {
    pub next_repo: RepoId,
    pub next_version: VersionId,
    pub repo_ids: Vec<RepoId>,
}

/// The set of repositories open in one datastore.
#[derive(Debug, Clone)]
pub struct RepoRegistry {
    repos: Vec<Repo>,
    /// Hex UUID -> (repo, version) index; ordered for prefix scans.
    uuid_index: BTreeMap<String, (RepoId, VersionId)>,
    next_repo: RepoId,
    next_version: VersionId,
}

impl RepoRegistry {
    /// An empty registry with counters starting at 1.
    pub fn new() -> Self {
        RepoRegistry {
            repos: Vec::new(),
            uuid_index: BTreeMap::new(),
            next_repo: RepoId(1),
            next_version: VersionId(1),
        }
    }

    /// Allocate a fresh repository ID.
    pub fn alloc_repo_id(&mut self) -> RepoId {
        let id = self.next_repo;
        self.next_repo = id.next();
        id
    }

    /// Allocate a fresh version ID (datastore-wide).
    pub fn alloc_version_id(&mut self) -> VersionId {
        let id = self.next_version;
        self.next_version = id.next();
        id
    }

    /// Add a repository and index its versions.
    pub fn add_repo(&mut self, repo: Repo) {
        for (uuid, version) in repo.versions() {
            self.uuid_index
                .insert(uuid.hex(), (repo.repo_id(), version));
        }
        self.repos.push(repo);
    }

    /// Index one newly created version of an existing repository.
    pub fn index_version(&mut self, uuid: VersionUuid, repo: RepoId, version: VersionId) {
        self.uuid_index.insert(uuid.hex(), (repo, version));
    }

    /// Drop one version from the UUID index.
    pub fn unindex_version(&mut self, uuid: VersionUuid) {
        self.uuid_index.remove(&uuid.hex());
    }

    /// Repositories in creation order.
    pub fn repos(&self) -> &[Repo] {
        &self.repos
    }

    /// Look up a repository by ID.
    pub fn repo(&self, id: RepoId) -> Option<&Repo> {
        self.repos.iter().find(|r| r.repo_id() == id)
    }

    /// Mutable lookup by ID.
    pub fn repo_mut(&mut self, id: RepoId) -> Option<&mut Repo> {
        self.repos.iter_mut().find(|r| r.repo_id() == id)
    }

    /// The repository containing `uuid`, plus its compact version ID.
    pub fn repo_of_uuid(&self, uuid: VersionUuid) -> Option<(&Repo, VersionId)> {
        let (repo_id, version) = *self.uuid_index.get(&uuid.hex())?;
        self.repo(repo_id).map(|r| (r, version))
    }

    /// Resolve a full UUID or unique hex prefix.
    ///
    /// - no match: `NotFound`
    /// - several matches: `AmbiguousUUID`
    pub fn resolve_prefix(&self, prefix: &str) -> Result<(VersionUuid, RepoId, VersionId)> {
        let needle = prefix.to_ascii_lowercase();
        if needle.is_empty() || !needle.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AxonError::not_found(format!("version matching {prefix:?}")));
        }
        let mut matches = self
            .uuid_index
            .range(needle.clone()..)
            .take_while(|(hex, _)| hex.starts_with(&needle));
        let Some((hex, &(repo_id, version))) = matches.next() else {
            return Err(AxonError::not_found(format!("version matching {prefix:?}")));
        };
        if matches.next().is_some() {
            return Err(AxonError::ambiguous_uuid(prefix));
        }
        let uuid = VersionUuid::parse(hex)
            .ok_or_else(|| AxonError::registry(format!("corrupt uuid index entry {hex:?}")))?;
        Ok((uuid, repo_id, version))
    }

    /// The persisted registry record.
    pub(crate) fn record(&self) -> RegistryRecord {
        RegistryRecord {
            next_repo: self.next_repo,
            next_version: self.next_version,
            repo_ids: self.repos.iter().map(|r| r.repo_id()).collect(),
        }
    }

    /// Rebuild the registry from its record and the loaded repositories.
    ///
    /// `repos` must arrive in the record's ID order.
    pub(crate) fn from_parts(record: RegistryRecord, repos: Vec<Repo>) -> Result<Self> {
        if record.repo_ids.len() != repos.len() {
            return Err(AxonError::registry(format!(
                "registry lists {} repos but {} were loaded",
                record.repo_ids.len(),
                repos.len()
            )));
        }
        let mut registry = RepoRegistry {
            repos: Vec::with_capacity(repos.len()),
            uuid_index: BTreeMap::new(),
            next_repo: record.next_repo,
            next_version: record.next_version,
        };
        for (expected, repo) in record.repo_ids.iter().zip(repos) {
            if repo.repo_id() != *expected {
                return Err(AxonError::registry(format!(
                    "repo record {} loaded where {} was expected",
                    repo.repo_id(),
                    expected
                )));
            }
            registry.add_repo(repo);
        }
        Ok(registry)
    }

    /// Registry list JSON: `uuid -> {alias, description, root}`.
    pub fn list_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for repo in &self.repos {
            out.insert(
                repo.root().hex(),
                serde_json::json!({
                    "alias": repo.alias,
                    "description": repo.description,
                    "root": repo.root().hex(),
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

impl Default for RepoRegistry {
    fn default() -> Self {
        Self::new()
    }
}
