use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use strand_store::Chunk;
use strand_types::Address;

use crate::entry::kind_from_type_byte;
use crate::error::{PackError, PackResult};
use crate::index::{read_u32, PackIndex};
use crate::writer::{decode_varint, CHECKSUM_LEN, HEADER_LEN, PACK_MAGIC, PACK_VERSION};

/// Backing bytes of an open pack.
#[derive(Debug)]
enum PackData {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for PackData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v.as_slice(),
            Self::Mapped(m) => &m[..],
        }
    }
}

/// Reads chunks from a pack using its index for random access.
///
/// Opening a pack verifies its header and trailing checksum; reading a
/// chunk verifies its CRC and that the bytes hash to the indexed address.
#[derive(Debug)]
pub struct PackReader {
    data: PackData,
    index: PackIndex,
}

impl PackReader {
    /// Open from raw bytes.
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        Self::validate(PackData::Owned(pack_data), index)
    }

    /// Open a `.pack` file and its sibling `.idx`, memory-mapping the pack.
    pub fn open(pack_path: &Path) -> PackResult<Self> {
        let index = PackIndex::from_bytes(&std::fs::read(pack_path.with_extension("idx"))?)?;
        let file = File::open(pack_path)?;
        // SAFETY: packs are sealed before they are opened and never modified
        // afterwards; the mapping is read-only.
        let map = unsafe { Mmap::map(&file)? };
        Self::validate(PackData::Mapped(map), index)
    }

    fn validate(data: PackData, index: PackIndex) -> PackResult<Self> {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "pack data too short".into(),
            });
        }
        if &data[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(&data, 4);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        if read_u32(&data, 8) as usize != index.chunk_count() {
            return Err(PackError::IndexCorrupted(
                "index chunk count disagrees with pack header".into(),
            ));
        }
        let body_end = data.len() - CHECKSUM_LEN;
        let computed = blake3::hash(&data[..body_end]);
        if computed.as_bytes() != &data[body_end..] || computed.as_bytes() != &index.pack_checksum
        {
            return Err(PackError::ChecksumMismatch);
        }
        Ok(Self { data, index })
    }

    /// Read a chunk by address.
    pub fn read_chunk(&self, address: &Address) -> PackResult<Option<Chunk>> {
        match self.index.lookup(address) {
            Some((offset, crc)) => self.read_at(*address, offset, crc).map(Some),
            None => Ok(None),
        }
    }

    /// Every chunk in the pack, in address order.
    pub fn chunks(&self) -> impl Iterator<Item = PackResult<Chunk>> + '_ {
        self.index
            .addresses
            .iter()
            .zip(self.index.offsets.iter().zip(&self.index.crc32s))
            .map(|(addr, (offset, crc))| self.read_at(*addr, *offset, *crc))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains(address)
    }

    pub fn chunk_count(&self) -> usize {
        self.index.chunk_count()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.index.addresses
    }

    fn read_at(&self, address: Address, offset: u64, expected_crc: u32) -> PackResult<Chunk> {
        let body_end = self.data.len() - CHECKSUM_LEN;
        let data = &self.data[..body_end];
        let mut pos = offset as usize;
        if pos < HEADER_LEN || pos >= data.len() {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "offset outside pack body".into(),
            });
        }

        let type_byte = data[pos];
        pos += 1;
        let kind = kind_from_type_byte(type_byte).ok_or_else(|| PackError::CorruptEntry {
            offset,
            reason: format!("unknown type byte: {type_byte}"),
        })?;

        let (raw_size, consumed) = decode_varint(&data[pos..], offset)?;
        pos += consumed;
        let (compressed_size, consumed) = decode_varint(&data[pos..], offset)?;
        pos += consumed;

        let end = pos
            .checked_add(compressed_size as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| PackError::CorruptEntry {
                offset,
                reason: "compressed data extends beyond pack".into(),
            })?;
        let compressed = &data[pos..end];

        if crc32fast::hash(compressed) != expected_crc {
            return Err(PackError::CrcMismatch { address });
        }

        let raw = zstd::decode_all(compressed)
            .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;
        if raw.len() as u64 != raw_size {
            return Err(PackError::CorruptEntry {
                offset,
                reason: format!("size mismatch: expected {raw_size}, got {}", raw.len()),
            });
        }

        let chunk = Chunk::verified(address, raw)?;
        if chunk.kind() != kind {
            return Err(PackError::CorruptEntry {
                offset,
                reason: format!("type byte says {kind}, chunk is {}", chunk.kind()),
            });
        }
        Ok(chunk)
    }
}
