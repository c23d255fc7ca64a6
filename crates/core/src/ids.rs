//! Compact identifiers for the axon datastore
//!
//! Two identifier families coexist:
//!
//! - **Local IDs** ([`InstanceId`], [`RepoId`], [`VersionId`], [`ClientId`])
//!   are 32-bit unsigned integers meaningful only within one datastore. Each
//!   encodes to exactly four big-endian bytes and appears verbatim inside
//!   on-disk keys, so the width is a compatibility contract.
//! - [`VersionUuid`] is the opaque 128-bit identifier clients use to address
//!   versions globally. It renders as 32 lowercase hex characters without
//!   hyphens.
//!
//! The largest local ID value is reserved as a sentinel for range-bound
//! construction and is never allocated to a real entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Encoded width of every local ID, in bytes.
pub const LOCAL_ID_SIZE: usize = 4;

macro_rules! local_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
            Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Largest representable value, reserved as a range-bound
            /// sentinel. Never handed out by an allocator.
            pub const MAX: $name = $name(u32::MAX);

            /// Encode as exactly four big-endian bytes.
            pub fn to_bytes(self) -> [u8; LOCAL_ID_SIZE] {
                self.0.to_be_bytes()
            }

            /// Decode from the first four bytes of `b`.
            ///
            /// Returns `None` if fewer than four bytes are available.
            pub fn from_bytes(b: &[u8]) -> Option<Self> {
                if b.len() < LOCAL_ID_SIZE {
                    return None;
                }
                let mut buf = [0u8; LOCAL_ID_SIZE];
                buf.copy_from_slice(&b[..LOCAL_ID_SIZE]);
                Some($name(u32::from_be_bytes(buf)))
            }

            /// Successor ID, used by allocation counters and range ends.
            pub fn next(self) -> $name {
                $name(self.0.wrapping_add(1))
            }

            /// Raw integer value.
            pub fn value(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

local_id!(
    /// Identifier for a data instance, unique within one repository.
    ///
    /// All key/values of one instance are contiguous on disk, so range
    /// queries over an instance reduce to a single key range.
    InstanceId
);

local_id!(
    /// Identifier for a repository, unique within one datastore.
    RepoId
);

local_id!(
    /// Identifier for a version (DAG node), unique within one datastore.
    ///
    /// Version IDs are datastore-wide rather than per-repo so that merged
    /// histories keep compact keys without renumbering.
    VersionId
);

local_id!(
    /// Identifier reserving key space for multi-tenant attribution.
    ///
    /// May be zero; nothing in the core assigns client IDs.
    ClientId
);

/// Opaque 128-bit global identifier for a version.
///
/// Rendered as 32 lowercase hex characters without hyphens. Unlike local
/// IDs, a `VersionUuid` is unique across datastores and is the only form
/// clients use to address versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionUuid(Uuid);

impl VersionUuid {
    /// Create a fresh random UUID (v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from a full string representation (with or without hyphens).
    ///
    /// Returns `None` if the string is not a valid UUID. Partial prefixes
    /// are resolved at the registry level, not here.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// The canonical lowercase hex rendering without hyphens.
    pub fn hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// Whether this UUID's hex rendering starts with `prefix`
    /// (case-insensitive).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.hex().starts_with(&prefix.to_ascii_lowercase())
    }

    /// Raw bytes of the UUID.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for VersionUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}
