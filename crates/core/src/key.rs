//! On-disk key layout for the axon datastore
//!
//! Every key stored in a backend begins with a one-byte key class
//! discriminator. The reserved classes are:
//!
//! | Byte   | Class     | Body |
//! |--------|-----------|------|
//! | `0x00` | metadata  | `[class(1) | body...]` with simple big-endian IDs |
//! | `0x10` | data      | `[InstanceId(4) | VersionId(4) | ClientId(4) | TKey]` |
//! | `0x11` | tombstone | same body as a data key |
//!
//! Ordering is pure lexicographic comparison of raw bytes: no shortlex, no
//! collation, no comparator shims. All range semantics and iteration depend
//! on this, so `StoreKey` derives its ordering straight from `Vec<u8>`.
//! Digits precede uppercase letters, which precede lowercase ones (ASCII):
//! `composer < computer`, `house < household`, `Household < house`,
//! `H2O < HOTEL`.

use crate::ids::{ClientId, InstanceId, RepoId, VersionId, LOCAL_ID_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker byte of a standard (addressable) type-specific key.
pub const TKEY_STANDARD_BYTE: u8 = 0x01;
/// Marker byte reserved for class-minimum sentinels.
pub const TKEY_MIN_BYTE: u8 = 0x00;
/// Marker byte reserved for class-maximum sentinels.
pub const TKEY_MAX_BYTE: u8 = 0xFF;

/// Smallest type-specific key class.
pub const TKEY_MIN_CLASS: TKeyClass = 0x00;
/// Largest type-specific key class.
pub const TKEY_MAX_CLASS: TKeyClass = 0xFF;

/// Top-level key class discriminator, the first byte of every stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyClass {
    /// Reserved metadata records (registry, repo descriptors, DAGs).
    Metadata = 0x00,
    /// Versioned data written by data instances.
    Data = 0x10,
    /// Deletion marker: version V removed a logical TKey.
    Tombstone = 0x11,
}

impl KeyClass {
    /// The discriminator byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a discriminator byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(KeyClass::Metadata),
            0x10 => Some(KeyClass::Data),
            0x11 => Some(KeyClass::Tombstone),
            _ => None,
        }
    }
}

/// Second byte of a metadata key, selecting the record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetadataClass {
    /// The datastore-wide registry record (no body).
    Registry = 0x01,
    /// A repository descriptor record (body: `RepoId` big-endian).
    Repo = 0x02,
    /// A repository's version DAG record (body: `RepoId` big-endian).
    Dag = 0x03,
}

impl MetadataClass {
    /// The class byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Malformed-key errors raised while decoding stored keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key has fewer bytes than its class requires.
    #[error("key too short: need at least {needed} bytes, have {have}")]
    TooShort {
        /// Minimum byte count for the key class.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// The leading byte is not a reserved key class.
    #[error("unknown key class byte {0:#04x}")]
    UnknownClass(u8),

    /// The key's class does not match what the caller expected.
    #[error("wrong key class: expected {expected:?}, got {actual:?}")]
    WrongClass {
        /// Class the caller expected.
        expected: KeyClass,
        /// Class found in the key.
        actual: KeyClass,
    },

    /// A type-specific key must carry at least class and marker bytes.
    #[error("type-specific key too short: {0} bytes")]
    TKeyTooShort(usize),

    /// The TKey class byte does not match what the datatype expected.
    #[error("bad type-specific key: expected class {expected:#04x}, got {actual:#04x}")]
    TKeyClassMismatch {
        /// Expected TKey class.
        expected: TKeyClass,
        /// Actual TKey class.
        actual: TKeyClass,
    },
}

/// A full storage key: the byte string actually stored in a backend.
///
/// Ordering is derived from `Vec<u8>`, i.e. raw lexicographic byte order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        StoreKey(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key, yielding its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Byte length of the key.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty (never true for well-formed keys).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key class, if the leading byte is a reserved discriminator.
    pub fn class(&self) -> Result<KeyClass, KeyError> {
        let byte = *self.0.first().ok_or(KeyError::TooShort { needed: 1, have: 0 })?;
        KeyClass::from_byte(byte).ok_or(KeyError::UnknownClass(byte))
    }
}

impl AsRef<[u8]> for StoreKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A range of full keys, closed at the start and open at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Range includes this key.
    pub start: StoreKey,
    /// Range extends to but does not include this key.
    pub open_end: StoreKey,
}

/// Partition of the TKey space into at most 256 classes.
pub type TKeyClass = u8;

/// The type-specific component of a data key, supplied by a datatype.
///
/// Layout: `[class(1) | marker(1) | body]`. The marker is
/// [`TKEY_STANDARD_BYTE`] for addressable keys; [`TKEY_MIN_BYTE`] and
/// [`TKEY_MAX_BYTE`] are reserved for the class-minimum and class-maximum
/// sentinels used to bound range queries.
///
/// Within one class, all bodies must either have identical length or be
/// prefix-free (trivially achieved by terminating variable-length bodies
/// with a byte such as `0x00` that never occurs inside them). That is the
/// datatype's obligation; the core does not police it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TKey(Vec<u8>);

impl TKey {
    /// Build a standard type-specific key from a class and body.
    pub fn new(class: TKeyClass, body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(2 + body.len());
        bytes.push(class);
        bytes.push(TKEY_STANDARD_BYTE);
        bytes.extend_from_slice(body);
        TKey(bytes)
    }

    /// The lexicographically smallest TKey of `class`.
    pub fn min_of_class(class: TKeyClass) -> Self {
        TKey(vec![class, TKEY_MIN_BYTE])
    }

    /// The lexicographically largest TKey of `class`.
    pub fn max_of_class(class: TKeyClass) -> Self {
        TKey(vec![class, TKEY_MAX_BYTE])
    }

    /// Reconstruct a TKey from raw bytes (e.g. recovered from a full key).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, KeyError> {
        if bytes.len() < 2 {
            return Err(KeyError::TKeyTooShort(bytes.len()));
        }
        Ok(TKey(bytes))
    }

    /// The TKey class.
    pub fn class(&self) -> TKeyClass {
        self.0[0]
    }

    /// Whether this is a standard (addressable) key rather than a sentinel.
    pub fn is_standard(&self) -> bool {
        self.0[1] == TKEY_STANDARD_BYTE
    }

    /// The body bytes, checked against the class the datatype expects.
    pub fn body(&self, class: TKeyClass) -> Result<&[u8], KeyError> {
        if self.0[0] != class {
            return Err(KeyError::TKeyClassMismatch {
                expected: class,
                actual: self.0[0],
            });
        }
        Ok(&self.0[2..])
    }

    /// The raw TKey bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// ---- Metadata keys ----

/// The key holding the datastore-wide registry record.
pub fn registry_key() -> StoreKey {
    StoreKey(vec![KeyClass::Metadata.as_byte(), MetadataClass::Registry.as_byte()])
}

/// The key holding the descriptor record of repository `id`.
pub fn repo_key(id: RepoId) -> StoreKey {
    metadata_key(MetadataClass::Repo, &id.to_bytes())
}

/// The key holding the version DAG record of repository `id`.
pub fn dag_key(id: RepoId) -> StoreKey {
    metadata_key(MetadataClass::Dag, &id.to_bytes())
}

/// Compose a metadata key: `[0x00 | class | body]`.
pub fn metadata_key(class: MetadataClass, body: &[u8]) -> StoreKey {
    let mut bytes = Vec::with_capacity(2 + body.len());
    bytes.push(KeyClass::Metadata.as_byte());
    bytes.push(class.as_byte());
    bytes.extend_from_slice(body);
    StoreKey(bytes)
}

/// The registry record addressed as a type-specific key.
///
/// Metadata contexts elide the marker byte when composing the full key, so
/// this projects onto exactly [`registry_key`].
pub fn registry_tkey() -> TKey {
    TKey::new(MetadataClass::Registry.as_byte(), &[])
}

/// The repo descriptor record of `id`, addressed as a type-specific key.
pub fn repo_tkey(id: RepoId) -> TKey {
    TKey::new(MetadataClass::Repo.as_byte(), &id.to_bytes())
}

/// The DAG record of `id`, addressed as a type-specific key.
pub fn dag_tkey(id: RepoId) -> TKey {
    TKey::new(MetadataClass::Dag.as_byte(), &id.to_bytes())
}

// ---- Data and tombstone keys ----

fn composite_key(
    class: KeyClass,
    instance: InstanceId,
    version: VersionId,
    client: ClientId,
    tkey: &TKey,
) -> StoreKey {
    let tkey_bytes = tkey.as_bytes();
    let mut bytes = Vec::with_capacity(1 + 3 * LOCAL_ID_SIZE + tkey_bytes.len());
    bytes.push(class.as_byte());
    bytes.extend_from_slice(&instance.to_bytes());
    bytes.extend_from_slice(&version.to_bytes());
    bytes.extend_from_slice(&client.to_bytes());
    bytes.extend_from_slice(tkey_bytes);
    StoreKey(bytes)
}

/// Compose a data key:
/// `[0x10 | InstanceId(4) | VersionId(4) | ClientId(4) | TKey]`.
pub fn data_key(
    instance: InstanceId,
    version: VersionId,
    client: ClientId,
    tkey: &TKey,
) -> StoreKey {
    composite_key(KeyClass::Data, instance, version, client, tkey)
}

/// Compose a tombstone key: the data key layout under class `0x11`.
pub fn tombstone_key(
    instance: InstanceId,
    version: VersionId,
    client: ClientId,
    tkey: &TKey,
) -> StoreKey {
    composite_key(KeyClass::Tombstone, instance, version, client, tkey)
}

/// The decoded components of a data or tombstone key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataKeyParts {
    /// Data instance the key belongs to.
    pub instance: InstanceId,
    /// Version the record was written at.
    pub version: VersionId,
    /// Client attribution field (zero unless assigned).
    pub client: ClientId,
    /// The type-specific key component.
    pub tkey: TKey,
    /// Whether the key is a tombstone rather than a value record.
    pub tombstone: bool,
}

/// Decode a data or tombstone key back into its components.
pub fn decode_data_key(key: &StoreKey) -> Result<DataKeyParts, KeyError> {
    let bytes = key.as_bytes();
    // class + three IDs + minimal TKey (class + marker)
    let needed = 1 + 3 * LOCAL_ID_SIZE + 2;
    if bytes.len() < needed {
        return Err(KeyError::TooShort {
            needed,
            have: bytes.len(),
        });
    }
    let class = key.class()?;
    let tombstone = match class {
        KeyClass::Data => false,
        KeyClass::Tombstone => true,
        KeyClass::Metadata => {
            return Err(KeyError::WrongClass {
                expected: KeyClass::Data,
                actual: class,
            })
        }
    };
    let short = || KeyError::TooShort {
        needed,
        have: bytes.len(),
    };
    let mut offset = 1;
    let instance = InstanceId::from_bytes(&bytes[offset..]).ok_or_else(short)?;
    offset += LOCAL_ID_SIZE;
    let version = VersionId::from_bytes(&bytes[offset..]).ok_or_else(short)?;
    offset += LOCAL_ID_SIZE;
    let client = ClientId::from_bytes(&bytes[offset..]).ok_or_else(short)?;
    offset += LOCAL_ID_SIZE;
    let tkey = TKey::from_bytes(bytes[offset..].to_vec())?;
    Ok(DataKeyParts {
        instance,
        version,
        client,
        tkey,
        tombstone,
    })
}

/// The full data-key range of one instance across every version and class.
///
/// Used for instance enumeration and approximate-size queries.
pub fn instance_data_range(instance: InstanceId) -> KeyRange {
    let min = TKey::min_of_class(TKEY_MIN_CLASS);
    KeyRange {
        start: data_key(instance, VersionId(0), ClientId(0), &min),
        open_end: data_key(instance.next(), VersionId(0), ClientId(0), &min),
    }
}

/// The full tombstone-key range of one instance across every version.
pub fn instance_tombstone_range(instance: InstanceId) -> KeyRange {
    let min = TKey::min_of_class(TKEY_MIN_CLASS);
    KeyRange {
        start: tombstone_key(instance, VersionId(0), ClientId(0), &min),
        open_end: tombstone_key(instance.next(), VersionId(0), ClientId(0), &min),
    }
}
