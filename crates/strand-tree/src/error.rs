//! Error types for ordered-map operations.

use strand_store::{ChunkKind, StoreError};
use strand_types::Address;

/// Errors that can occur while reading or rewriting an ordered map.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A node referenced by the tree is absent from the store.
    #[error("missing tree node {0}")]
    MissingNode(Address),

    /// A node has a different flavour than the map it belongs to.
    #[error("node {address} is a {actual} node inside a {expected} map")]
    KindMismatch {
        address: Address,
        expected: ChunkKind,
        actual: ChunkKind,
    },

    /// An edit provider yielded keys out of ascending order.
    #[error("edits out of order at key {0:?}")]
    UnsortedEdits(Vec<u8>),

    /// Entries handed to a bulk build were not strictly ascending.
    #[error("entries out of order at key {0:?}")]
    UnsortedEntries(Vec<u8>),

    /// A worker in the edit pipeline panicked.
    #[error("edit worker panicked")]
    WorkerPanic,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;
