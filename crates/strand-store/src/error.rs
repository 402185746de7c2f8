use strand_types::{Address, TypeError};

/// Errors from chunk store operations.
///
/// A plain miss is not an error: `get` and `has` report absence through
/// `Option` and `bool`. Everything here means the store could not give a
/// trustworthy answer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The chunk was deliberately archived and recorded as a ghost.
    #[error("ghost chunk requested: {0}")]
    GhostChunk(Address),

    /// Stored bytes do not hash to the address they are filed under.
    #[error("hash mismatch for {address}: computed {computed}")]
    HashMismatch { address: Address, computed: Address },

    /// The chunk bytes are malformed or decode to the wrong kind.
    #[error("corrupt chunk {address}: {reason}")]
    CorruptChunk { address: Address, reason: String },

    /// The leading type tag is not one this store understands.
    #[error("unknown chunk file id {0:?}")]
    UnknownFileId([u8; 4]),

    /// Attempted to store or address the reserved empty address.
    #[error("the empty address cannot be stored")]
    EmptyAddress,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl StoreError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
