use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use strand_types::Address;

use crate::error::{StoreError, StoreResult};

/// Length of the leading type tag on every chunk.
pub const FILE_ID_LEN: usize = 4;

/// The schema of a chunk, identified by its leading file id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkKind {
    /// A commit: value, parents, height and optional closure.
    Commit,
    /// An immutable named pointer at a commit.
    Tag,
    /// A node of a commit's parent closure.
    Closure,
    /// A node of an ordered map with opaque values.
    Map,
    /// A node of an ordered map whose values are chunk addresses.
    AddressMap,
    /// Opaque bytes.
    Blob,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 6] = [
        Self::Commit,
        Self::Tag,
        Self::Closure,
        Self::Map,
        Self::AddressMap,
        Self::Blob,
    ];

    /// The 4-byte ASCII tag written at the front of the chunk.
    pub const fn file_id(&self) -> &'static [u8; FILE_ID_LEN] {
        match self {
            Self::Commit => b"SCMT",
            Self::Tag => b"STAG",
            Self::Closure => b"SCCL",
            Self::Map => b"SMAP",
            Self::AddressMap => b"SADR",
            Self::Blob => b"SBLB",
        }
    }

    /// Identify a kind from the leading bytes of a chunk.
    pub fn from_file_id(bytes: &[u8]) -> Option<Self> {
        let tag = bytes.get(..FILE_ID_LEN)?;
        Self::ALL.into_iter().find(|k| k.file_id() == tag)
    }

    /// Whether chunks of this kind are ordered-map nodes.
    pub fn is_tree_node(&self) -> bool {
        matches!(self, Self::Closure | Self::Map | Self::AddressMap)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Tag => write!(f, "tag"),
            Self::Closure => write!(f, "closure"),
            Self::Map => write!(f, "map"),
            Self::AddressMap => write!(f, "address-map"),
            Self::Blob => write!(f, "blob"),
        }
    }
}

/// An immutable, content-addressed chunk.
///
/// The serialized form is the file id followed by the kind-specific payload.
/// The address is the hash of the whole serialized form, so a chunk can be
/// checked against its address without decoding anything. Cloning shares
/// the underlying buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    kind: ChunkKind,
    data: Bytes,
}

impl Chunk {
    /// Build a chunk from a kind and its encoded payload.
    pub fn new(kind: ChunkKind, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(FILE_ID_LEN + payload.len());
        buf.put_slice(kind.file_id());
        buf.put_slice(payload);
        let data = buf.freeze();
        Self {
            address: Address::of(&data),
            kind,
            data,
        }
    }

    /// Parse serialized chunk bytes, computing the address.
    pub fn from_bytes(data: impl Into<Bytes>) -> StoreResult<Self> {
        let data = data.into();
        let kind = ChunkKind::from_file_id(&data).ok_or_else(|| unknown_file_id(&data))?;
        Ok(Self {
            address: Address::of(&data),
            kind,
            data,
        })
    }

    /// Parse bytes that were filed under `expected`, rejecting corruption.
    pub fn verified(expected: Address, data: impl Into<Bytes>) -> StoreResult<Self> {
        let chunk = Self::from_bytes(data)?;
        if chunk.address != expected {
            return Err(StoreError::HashMismatch {
                address: expected,
                computed: chunk.address,
            });
        }
        Ok(chunk)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Full serialized bytes, file id included.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The payload following the file id.
    pub fn payload(&self) -> &[u8] {
        &self.data[FILE_ID_LEN..]
    }

    /// Serialized size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == FILE_ID_LEN
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}

fn unknown_file_id(data: &[u8]) -> StoreError {
    let mut tag = [0u8; FILE_ID_LEN];
    let n = data.len().min(FILE_ID_LEN);
    tag[..n].copy_from_slice(&data[..n]);
    StoreError::UnknownFileId(tag)
}
