//! Error types for the commit graph.

use strand_store::{ChunkKind, StoreError};
use strand_tree::TreeError;
use strand_types::Address;

/// Errors that can occur while writing or walking commit history.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A commit is absent from the store it was resolved against.
    #[error("commit {0} is not reachable in this store")]
    UnreachableCommit(Address),

    /// The address names a chunk that is not a commit.
    #[error("{address} is a {kind} chunk, not a commit")]
    NotACommit { address: Address, kind: ChunkKind },

    /// A tag is absent from the store.
    #[error("tag {0} is not reachable in this store")]
    UnreachableTag(Address),

    /// The address names a chunk that is not a tag.
    #[error("{address} is a {kind} chunk, not a tag")]
    NotATag { address: Address, kind: ChunkKind },

    /// A commit records a parent closure whose chunk is missing.
    #[error("dangling parent closure {closure} for commit {commit}")]
    DanglingClosure { closure: Address, commit: Address },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
}

/// Convenience alias for commit-graph results.
pub type GraphResult<T> = Result<T, GraphError>;
