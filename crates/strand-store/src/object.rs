use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strand_types::{Address, ADDRESS_LEN};

use crate::chunk::{Chunk, ChunkKind};
use crate::error::{StoreError, StoreResult};

fn encode<T: Serialize>(kind: ChunkKind, value: &T) -> StoreResult<Chunk> {
    let payload = bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(Chunk::new(kind, &payload))
}

fn decode<T: DeserializeOwned>(chunk: &Chunk, expected: ChunkKind) -> StoreResult<T> {
    if chunk.kind() != expected {
        return Err(StoreError::CorruptChunk {
            address: chunk.address(),
            reason: format!("expected {expected}, got {}", chunk.kind()),
        });
    }
    bincode::deserialize(chunk.payload()).map_err(|e| StoreError::CorruptChunk {
        address: chunk.address(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Author metadata recorded on a commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub name: String,
    pub email: String,
    pub description: String,
    /// Wall-clock time the commit was written, in Unix milliseconds.
    pub timestamp_millis: i64,
    /// Time the user asked to record, in Unix milliseconds.
    pub user_timestamp_millis: i64,
}

/// Payload of a [`ChunkKind::Commit`] chunk.
///
/// Parents and the closure address sit in the commit chunk itself; the
/// committed value is a separate chunk, so history can be walked without
/// loading any values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    pub height: u64,
    pub parents: Vec<Address>,
    /// Absent for roots and for commits written before closures existed.
    pub parent_closure: Option<Address>,
    pub value: Address,
    pub meta: Option<CommitMeta>,
}

impl CommitObject {
    pub fn to_chunk(&self) -> StoreResult<Chunk> {
        encode(ChunkKind::Commit, self)
    }

    pub fn from_chunk(chunk: &Chunk) -> StoreResult<Self> {
        decode(chunk, ChunkKind::Commit)
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMeta {
    pub name: String,
    pub email: String,
    pub description: String,
    pub timestamp_millis: i64,
    pub user_timestamp_millis: i64,
}

/// Payload of a [`ChunkKind::Tag`] chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagObject {
    pub commit: Address,
    pub meta: Option<TagMeta>,
}

impl TagObject {
    pub fn to_chunk(&self) -> StoreResult<Chunk> {
        encode(ChunkKind::Tag, self)
    }

    pub fn from_chunk(chunk: &Chunk) -> StoreResult<Self> {
        decode(chunk, ChunkKind::Tag)
    }
}

// ---------------------------------------------------------------------------
// Ordered map nodes
// ---------------------------------------------------------------------------

/// Payload of an ordered-map node (closure, map or address-map flavour).
///
/// Leaves (`level == 0`) pair each key with a value. Internal nodes pair
/// each child address with the greatest key found beneath it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeObject {
    pub level: u8,
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
    pub children: Vec<Address>,
}

impl NodeObject {
    pub fn leaf(keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Self {
        Self {
            level: 0,
            keys,
            values,
            children: Vec::new(),
        }
    }

    pub fn internal(level: u8, keys: Vec<Vec<u8>>, children: Vec<Address>) -> Self {
        Self {
            level,
            keys,
            values: Vec::new(),
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Encode as a chunk of the given tree flavour.
    pub fn to_chunk(&self, kind: ChunkKind) -> StoreResult<Chunk> {
        if !kind.is_tree_node() {
            return Err(StoreError::Serialization(format!(
                "{kind} is not an ordered-map kind"
            )));
        }
        encode(kind, self)
    }

    /// Decode any tree-flavoured chunk, checking arity.
    pub fn from_chunk(chunk: &Chunk) -> StoreResult<Self> {
        if !chunk.kind().is_tree_node() {
            return Err(StoreError::CorruptChunk {
                address: chunk.address(),
                reason: format!("expected ordered-map node, got {}", chunk.kind()),
            });
        }
        let node: Self = decode(chunk, chunk.kind())?;
        let arity_ok = if node.is_leaf() {
            node.values.len() == node.keys.len() && node.children.is_empty()
        } else {
            node.children.len() == node.keys.len() && node.values.is_empty()
        };
        if !arity_ok {
            return Err(StoreError::CorruptChunk {
                address: chunk.address(),
                reason: "node keys do not line up with values or children".into(),
            });
        }
        Ok(node)
    }
}

// ---------------------------------------------------------------------------
// Closure keys
// ---------------------------------------------------------------------------

/// Encoded width of a [`ClosureKey`].
pub const CLOSURE_KEY_LEN: usize = 8 + ADDRESS_LEN;

/// Key of a parent-closure entry.
///
/// Encoded as the big-endian height followed by the commit address, so the
/// bytewise key order equals `(height, address)` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureKey {
    pub height: u64,
    pub address: Address,
}

impl ClosureKey {
    pub fn new(height: u64, address: Address) -> Self {
        Self { height, address }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLOSURE_KEY_LEN);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(self.address.as_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() != CLOSURE_KEY_LEN {
            return Err(StoreError::Serialization(format!(
                "closure key must be {CLOSURE_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut height = [0u8; 8];
        height.copy_from_slice(&bytes[..8]);
        Ok(Self {
            height: u64::from_be_bytes(height),
            address: Address::from_slice(&bytes[8..])?,
        })
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Opaque bytes stored verbatim after the file id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn to_chunk(&self) -> Chunk {
        Chunk::new(ChunkKind::Blob, &self.data)
    }

    pub fn from_chunk(chunk: &Chunk) -> StoreResult<Self> {
        if chunk.kind() != ChunkKind::Blob {
            return Err(StoreError::CorruptChunk {
                address: chunk.address(),
                reason: format!("expected blob, got {}", chunk.kind()),
            });
        }
        Ok(Self::new(chunk.payload()))
    }
}
