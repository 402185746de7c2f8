//! Error types for the puller.

use strand_pack::PackError;
use strand_store::StoreError;
use strand_types::Address;

/// Errors that end a pull.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    /// A reachable chunk was archived as a ghost in the source.
    #[error("ghost chunk requested: {0}")]
    GhostChunkRequested(Address),

    /// The source lacks a chunk that the pulled graph references.
    #[error("source is missing reachable chunk {0}")]
    MissingChunk(Address),

    /// Fetched bytes do not hash to the address they were requested by.
    #[error("fetched chunk {address} is corrupt")]
    Corrupt { address: Address },

    #[error("pull cancelled")]
    Cancelled,

    /// The configuration is unusable.
    #[error("invalid puller configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("pack error: {0}")]
    Pack(#[from] PackError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fetch, staging or ingest task panicked or vanished.
    #[error("pull worker failed")]
    WorkerPanic,
}

impl From<tokio::task::JoinError> for PullError {
    fn from(_: tokio::task::JoinError) -> Self {
        Self::WorkerPanic
    }
}

/// Convenience alias for pull results.
pub type PullResult<T> = Result<T, PullError>;
