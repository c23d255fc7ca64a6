//! Ancestor resolution for versioned reads
//!
//! A versioned read collects every record written for a TKey along the
//! ancestry of the requested version, then picks the single visible record:
//!
//! - The record at the smallest graph distance wins.
//! - A tombstone at the winning distance means the key is deleted.
//! - Equally-distant records with identical values resolve deterministically
//!   to the smallest `VersionId`.
//! - Equally-distant records that contradict each other (differing values,
//!   or a value against a tombstone) surface `Conflict`. A merge commit
//!   that wrote the key explicitly always sits at distance 0 and wins
//!   before this can trigger.

use crate::context::{StoreContext, VersionAncestry};
use axon_core::{AxonError, Result, TKey, VersionId};
use std::collections::BTreeMap;

/// One record found for a TKey at one ancestor version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Version the record was written at.
    pub version: VersionId,
    /// Whether the record is a tombstone.
    pub tombstone: bool,
    /// Value bytes (empty for tombstones).
    pub value: Vec<u8>,
}

impl Candidate {
    /// A value record.
    pub fn value(version: VersionId, value: Vec<u8>) -> Self {
        Candidate {
            version,
            tombstone: false,
            value,
        }
    }

    /// A tombstone record.
    pub fn tombstone(version: VersionId) -> Self {
        Candidate {
            version,
            tombstone: true,
            value: Vec::new(),
        }
    }
}

/// Resolve the visible record for one TKey from its candidates.
///
/// Returns `Ok(None)` when the key is absent or tombstoned at this version,
/// `Ok(Some(value))` for the winning record, and `Conflict` when equally
/// distant ancestors contradict each other.
pub fn resolve(ancestry: &VersionAncestry, candidates: &[Candidate]) -> Result<Option<Vec<u8>>> {
    // Nearest distance that has any record
    let mut nearest: Option<usize> = None;
    for c in candidates {
        if let Some(d) = ancestry.distance(c.version) {
            nearest = Some(nearest.map_or(d, |n| n.min(d)));
        }
    }
    let Some(nearest) = nearest else {
        return Ok(None);
    };

    // Per version at the nearest distance, a tombstone shadows a value
    // record left behind by raw writes.
    let mut per_version: BTreeMap<VersionId, &Candidate> = BTreeMap::new();
    for c in candidates {
        if ancestry.distance(c.version) != Some(nearest) {
            continue;
        }
        per_version
            .entry(c.version)
            .and_modify(|cur| {
                if c.tombstone {
                    *cur = c;
                }
            })
            .or_insert(c);
    }

    let mut winners = per_version.values();
    let Some(&first) = winners.next() else {
        return Ok(None);
    };
    for other in winners {
        if other.tombstone != first.tombstone || other.value != first.value {
            return Err(AxonError::conflict(format!(
                "versions {} and {} disagree at equal ancestry distance",
                first.version, other.version
            )));
        }
    }

    // Identical records: the smallest version ID (BTreeMap order) stands in
    if first.tombstone {
        Ok(None)
    } else {
        Ok(Some(first.value.clone()))
    }
}

/// TKey-ordered table of candidates gathered from a range read.
///
/// Backends fill one table per range call, then resolve every TKey group to
/// at most one visible record, preserving lex order.
#[derive(Debug, Default)]
pub struct CandidateTable {
    groups: BTreeMap<TKey, Vec<Candidate>>,
}

impl CandidateTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate for `tkey`.
    pub fn insert(&mut self, tkey: TKey, candidate: Candidate) {
        self.groups.entry(tkey).or_default().push(candidate);
    }

    /// Number of distinct TKeys gathered.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no candidates were gathered.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Resolve every TKey group, yielding the surviving records in TKey lex
    /// order. Tombstoned TKeys are omitted.
    pub fn resolve_all(self, ancestry: &VersionAncestry) -> Result<Vec<(TKey, Vec<u8>)>> {
        let mut out = Vec::with_capacity(self.groups.len());
        for (tkey, candidates) in self.groups {
            if let Some(value) = resolve(ancestry, &candidates)? {
                out.push((tkey, value));
            }
        }
        Ok(out)
    }
}

/// Gather the point-read candidates for one TKey by probing every ancestor
/// version through `lookup`.
///
/// `lookup` receives each candidate full key and returns the stored bytes if
/// present. Shared by engines that support only point reads as well as the
/// ordered engine's `get`.
pub fn collect_point_candidates(
    ctx: &dyn StoreContext,
    tkey: &TKey,
    mut lookup: impl FnMut(&axon_core::StoreKey) -> Option<Vec<u8>>,
) -> Vec<Candidate> {
    let Some(ancestry) = ctx.ancestry() else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    for version in ancestry.versions() {
        if let Some(tomb) = ctx.tombstone_at_version(version, tkey) {
            if lookup(&tomb).is_some() {
                candidates.push(Candidate::tombstone(version));
            }
        }
        let data = ctx.key_at_version(version, tkey);
        if let Some(value) = lookup(&data) {
            candidates.push(Candidate::value(version, value));
        }
    }
    candidates
}
