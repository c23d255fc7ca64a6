//! Error types for the axon datastore
//!
//! [`AxonError`] is the unified error type for all axon APIs. Every variant
//! maps to one of the ten frozen [`ErrorKind`] wire names, which are the
//! stable representation surfaced to clients:
//!
//! | Kind | Meaning |
//! |------|---------|
//! | OpenError | Backend could not be opened |
//! | RegistryError | Registry could not be read or parsed |
//! | DatatypeUnavailable | A referenced type is not linked in this build |
//! | CapabilityMissing | Backend does not implement a required capability |
//! | NotFound | UUID, instance name, or key does not exist (or is tombstoned) |
//! | AmbiguousUUID | A prefix matches multiple UUIDs |
//! | LockViolation | Mutation on a locked node, or child from an unlocked parent |
//! | Conflict | Contradictory state without a resolver entry |
//! | Cancelled | Operation cancelled by the caller |
//! | BackendError | Wrapped underlying I/O failure |
//!
//! Errors encode to JSON as `{"error": <message>, "kind": <kind>}`.
//!
//! The core surfaces errors verbatim with their kind and never retries
//! backend I/O; retries are the backend's responsibility.

use crate::ids::VersionUuid;
use crate::key::KeyError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for axon operations.
pub type Result<T> = std::result::Result<T, AxonError>;

/// Canonical wire error kinds, frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Backend could not be opened.
    Open,
    /// Registry could not be read or parsed.
    Registry,
    /// A referenced datatype is not linked into this executable.
    DatatypeUnavailable,
    /// Backend does not implement a required capability.
    CapabilityMissing,
    /// UUID, instance name, or key does not exist.
    NotFound,
    /// A UUID prefix matches more than one UUID.
    AmbiguousUuid,
    /// Lock-state rule violated.
    LockViolation,
    /// Contradictory state without a resolver entry.
    Conflict,
    /// Operation cancelled by the caller.
    Cancelled,
    /// Wrapped underlying I/O failure.
    Backend,
}

impl ErrorKind {
    /// The canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Open => "OpenError",
            ErrorKind::Registry => "RegistryError",
            ErrorKind::DatatypeUnavailable => "DatatypeUnavailable",
            ErrorKind::CapabilityMissing => "CapabilityMissing",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AmbiguousUuid => "AmbiguousUUID",
            ErrorKind::LockViolation => "LockViolation",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Backend => "BackendError",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OpenError" => Some(ErrorKind::Open),
            "RegistryError" => Some(ErrorKind::Registry),
            "DatatypeUnavailable" => Some(ErrorKind::DatatypeUnavailable),
            "CapabilityMissing" => Some(ErrorKind::CapabilityMissing),
            "NotFound" => Some(ErrorKind::NotFound),
            "AmbiguousUUID" => Some(ErrorKind::AmbiguousUuid),
            "LockViolation" => Some(ErrorKind::LockViolation),
            "Conflict" => Some(ErrorKind::Conflict),
            "Cancelled" => Some(ErrorKind::Cancelled),
            "BackendError" => Some(ErrorKind::Backend),
            _ => None,
        }
    }

    /// Process exit code for a fatal error of this kind.
    ///
    /// `0` is reserved for clean shutdown; open-time failures exit `1`,
    /// missing datatypes exit `2`, and fatal backend errors during a run
    /// exit `3`. Kinds that are not process-fatal fall back to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::DatatypeUnavailable => 2,
            ErrorKind::Backend => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An optional backend capability, named for `CapabilityMissing` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Plain get/put/delete key-value access.
    KeyValue,
    /// Ordered range reads and writes.
    OrderedKeyValue,
    /// Atomic write batches.
    Batcher,
    /// Queued request buffers.
    Requester,
    /// Advisory locks and single-key patches.
    Transactions,
    /// Bulk ingest without immediate read-visibility.
    Ingest,
    /// Approximate size queries over key ranges.
    SizeViewer,
    /// Layered graph storage.
    Graph,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::KeyValue => "key-value",
            Capability::OrderedKeyValue => "ordered key-value",
            Capability::Batcher => "batch writes",
            Capability::Requester => "request buffers",
            Capability::Transactions => "transactions",
            Capability::Ingest => "ingest",
            Capability::SizeViewer => "size queries",
            Capability::Graph => "graph storage",
        };
        write!(f, "{}", name)
    }
}

/// Unified error type for all axon operations.
#[derive(Debug, Error)]
pub enum AxonError {
    /// Backend could not be opened.
    #[error("open failed: {message}")]
    Open {
        /// What went wrong during open.
        message: String,
    },

    /// The registry could not be read or parsed.
    #[error("registry unreadable: {message}")]
    Registry {
        /// What went wrong while loading the registry.
        message: String,
    },

    /// A referenced datatype is not compiled into this executable.
    #[error("datatype {name} version {version} is not available in this build")]
    DatatypeUnavailable {
        /// Name of the missing datatype.
        name: String,
        /// Version the stored data references.
        version: String,
    },

    /// The backend does not implement a required capability.
    ///
    /// Raised at handle-request time, before any I/O occurs.
    #[error("backend does not support {capability}")]
    CapabilityMissing {
        /// The capability that was requested.
        capability: Capability,
    },

    /// UUID, instance name, or key does not exist (or is tombstoned at the
    /// requested version).
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A UUID prefix matches more than one UUID in the registry.
    #[error("uuid prefix {prefix:?} matches more than one version")]
    AmbiguousUuid {
        /// The offending prefix.
        prefix: String,
    },

    /// A lock-state rule was violated: mutation of a locked node, or a
    /// child requested from an unlocked parent.
    #[error("lock violation on {uuid}: {reason}")]
    LockViolation {
        /// The node whose lock state forbids the operation.
        uuid: VersionUuid,
        /// Which rule was violated.
        reason: String,
    },

    /// Contradictory state without a resolver entry, e.g. merge ancestry
    /// supplying conflicting records for one key.
    #[error("conflict: {reason}")]
    Conflict {
        /// Description of the contradiction.
        reason: String,
    },

    /// The operation was cancelled by the caller.
    ///
    /// Distinct from an error: cancellation is a status. Timeouts are
    /// modeled as cancellation scheduled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Wrapped underlying storage failure.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// The underlying error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AxonError {
    /// Create an `Open` error.
    pub fn open(message: impl Into<String>) -> Self {
        AxonError::Open {
            message: message.into(),
        }
    }

    /// Create a `Registry` error.
    pub fn registry(message: impl Into<String>) -> Self {
        AxonError::Registry {
            message: message.into(),
        }
    }

    /// Create a `DatatypeUnavailable` error.
    pub fn datatype_unavailable(name: impl Into<String>, version: impl Into<String>) -> Self {
        AxonError::DatatypeUnavailable {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Create a `CapabilityMissing` error.
    pub fn capability_missing(capability: Capability) -> Self {
        AxonError::CapabilityMissing { capability }
    }

    /// Create a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        AxonError::NotFound { what: what.into() }
    }

    /// Create an `AmbiguousUuid` error.
    pub fn ambiguous_uuid(prefix: impl Into<String>) -> Self {
        AxonError::AmbiguousUuid {
            prefix: prefix.into(),
        }
    }

    /// Create a `LockViolation` error.
    pub fn lock_violation(uuid: VersionUuid, reason: impl Into<String>) -> Self {
        AxonError::LockViolation {
            uuid,
            reason: reason.into(),
        }
    }

    /// Create a `Conflict` error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        AxonError::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a `Backend` error without an underlying source.
    pub fn backend(message: impl Into<String>) -> Self {
        AxonError::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Backend` error wrapping an underlying failure.
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AxonError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The frozen wire kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AxonError::Open { .. } => ErrorKind::Open,
            AxonError::Registry { .. } => ErrorKind::Registry,
            AxonError::DatatypeUnavailable { .. } => ErrorKind::DatatypeUnavailable,
            AxonError::CapabilityMissing { .. } => ErrorKind::CapabilityMissing,
            AxonError::NotFound { .. } => ErrorKind::NotFound,
            AxonError::AmbiguousUuid { .. } => ErrorKind::AmbiguousUuid,
            AxonError::LockViolation { .. } => ErrorKind::LockViolation,
            AxonError::Conflict { .. } => ErrorKind::Conflict,
            AxonError::Cancelled => ErrorKind::Cancelled,
            AxonError::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Whether this is a not-found result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AxonError::NotFound { .. })
    }

    /// Whether this is a cancellation status rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AxonError::Cancelled)
    }

    /// The JSON wire encoding: `{"error": <message>, "kind": <kind>}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind().as_str(),
        })
    }

    /// Process exit code for this error, per [`ErrorKind::exit_code`].
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

impl From<io::Error> for AxonError {
    fn from(e: io::Error) -> Self {
        AxonError::backend_with_source("I/O failure", e)
    }
}

impl From<KeyError> for AxonError {
    fn from(e: KeyError) -> Self {
        AxonError::backend_with_source("malformed storage key", e)
    }
}
