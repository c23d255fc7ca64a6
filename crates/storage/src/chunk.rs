//! Chunk types passed to range-iteration handlers
//!
//! Range iteration hands each surviving record to a user-supplied handler as
//! a [`Chunk`]. The [`ChunkOp`] describes the operation being performed and
//! carries the cancellation token the iterator honors between invocations.

use crate::cancel::CancelToken;
use axon_core::{Result, TKey};

/// Single key-value operation kinds used by iteration and batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    /// Read operation.
    #[default]
    Get,
    /// Write operation.
    Put,
    /// Delete operation.
    Delete,
    /// Batch commit marker.
    Commit,
}

/// Descriptor attached to a range-processing call.
#[derive(Debug, Clone, Default)]
pub struct ChunkOp {
    /// The operation the handler is being driven for.
    pub op: Op,
    /// Cancellation signal checked between chunk invocations.
    pub cancel: CancelToken,
}

impl ChunkOp {
    /// A chunk descriptor with a fresh (uncancellable) token.
    pub fn new(op: Op) -> Self {
        ChunkOp {
            op,
            cancel: CancelToken::new(),
        }
    }

    /// A chunk descriptor honoring the given cancellation token.
    pub fn with_cancel(op: Op, cancel: CancelToken) -> Self {
        ChunkOp { op, cancel }
    }
}

/// The unit passed to chunk handlers: one type-specific record plus the
/// operation it is being processed under.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Operation kind from the originating [`ChunkOp`].
    pub op: Op,
    /// The record's type-specific key.
    pub tkey: TKey,
    /// The record's value bytes.
    pub value: Vec<u8>,
}

/// Handler invoked once per surviving chunk, in TKey lex order.
///
/// Returning an error terminates iteration immediately and propagates.
pub type ChunkFunc<'a> = &'a mut dyn FnMut(Chunk) -> Result<()>;
