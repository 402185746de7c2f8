use std::collections::HashSet;
use std::path::{Path, PathBuf};

use strand_store::Chunk;
use strand_types::Address;
use tracing::debug;

use crate::entry::type_byte;
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

pub(crate) const PACK_MAGIC: &[u8; 4] = b"STRP";
pub(crate) const PACK_VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 12;
pub(crate) const CHECKSUM_LEN: usize = 32;

const ZSTD_LEVEL: i32 = 3;

/// Result of writing a pack file.
#[derive(Clone, Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub chunk_count: usize,
    /// Sum of the uncompressed chunk sizes.
    pub raw_bytes: u64,
    pub checksum: [u8; 32],
}

/// Streams chunks into an in-memory pack body.
///
/// Each chunk is compressed as it is added, so the writer's footprint tracks
/// the packed size. Duplicate addresses are dropped.
pub struct PackWriter {
    path: PathBuf,
    body: Vec<u8>,
    index_entries: Vec<(Address, u32, u64)>,
    seen: HashSet<Address>,
    raw_bytes: u64,
}

impl PackWriter {
    /// Create a writer whose `finish` targets `path` with `.pack`/`.idx` extensions.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            body: Vec::new(),
            index_entries: Vec::new(),
            seen: HashSet::new(),
            raw_bytes: 0,
        }
    }

    /// Add a chunk. Returns `false` if it was already in this pack.
    pub fn add_chunk(&mut self, chunk: &Chunk) -> PackResult<bool> {
        let address = chunk.address();
        if !self.seen.insert(address) {
            return Ok(false);
        }
        let offset = (HEADER_LEN + self.body.len()) as u64;

        let compressed = zstd::encode_all(chunk.data().as_ref(), ZSTD_LEVEL)
            .map_err(|e| PackError::CompressionFailed(e.to_string()))?;

        self.body.push(type_byte(chunk.kind()));
        encode_varint(&mut self.body, chunk.len() as u64);
        encode_varint(&mut self.body, compressed.len() as u64);
        let crc = crc32fast::hash(&compressed);
        self.body.extend_from_slice(&compressed);

        self.index_entries.push((address, crc, offset));
        self.raw_bytes += chunk.len() as u64;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.index_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_entries.is_empty()
    }

    /// Uncompressed bytes added so far.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    /// Size the pack body occupies so far.
    pub fn packed_bytes(&self) -> usize {
        HEADER_LEN + self.body.len() + CHECKSUM_LEN
    }

    /// Write the pack and index to disk.
    pub fn finish(self) -> PackResult<PackFile> {
        let pack_path = self.path.with_extension("pack");
        let index_path = self.path.with_extension("idx");
        let raw_bytes = self.raw_bytes;

        let (pack_data, index) = self.finish_to_bytes()?;
        std::fs::write(&pack_path, &pack_data)?;
        std::fs::write(&index_path, index.to_bytes())?;
        debug!(
            path = %pack_path.display(),
            chunks = index.chunk_count(),
            bytes = pack_data.len(),
            "sealed pack"
        );

        Ok(PackFile {
            pack_path,
            index_path,
            chunk_count: index.chunk_count(),
            raw_bytes,
            checksum: index.pack_checksum,
        })
    }

    /// Build pack bytes and index in memory.
    pub fn finish_to_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let mut pack = Vec::with_capacity(HEADER_LEN + self.body.len() + CHECKSUM_LEN);
        pack.extend_from_slice(PACK_MAGIC);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.index_entries.len() as u32).to_be_bytes());
        pack.extend_from_slice(&self.body);

        let checksum = *blake3::hash(&pack).as_bytes();
        pack.extend_from_slice(&checksum);

        Ok((pack, PackIndex::build(self.index_entries, checksum)))
    }
}

pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Returns (value, bytes consumed).
pub(crate) fn decode_varint(data: &[u8], offset: u64) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "varint overflow".into(),
            });
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(PackError::CorruptEntry {
        offset,
        reason: "truncated varint".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_store::Blob;

    #[test]
    fn varint_edges() {
        for value in [0u64, 42, 127, 128, 1_000_000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            assert_eq!(decode_varint(&buf, 0).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn varint_truncated() {
        let err = decode_varint(&[0x80], 7).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { offset: 7, .. }));
    }

    #[test]
    fn duplicate_chunks_are_dropped() {
        let mut writer = PackWriter::new(Path::new("unused"));
        let chunk = Blob::new(b"once".to_vec()).to_chunk();
        assert!(writer.add_chunk(&chunk).unwrap());
        assert!(!writer.add_chunk(&chunk).unwrap());
        assert_eq!(writer.len(), 1);
        assert_eq!(writer.raw_bytes(), chunk.len() as u64);
    }

    #[test]
    fn packed_bytes_grows_with_content() {
        let mut writer = PackWriter::new(Path::new("unused"));
        let empty = writer.packed_bytes();
        writer
            .add_chunk(&Blob::new(vec![1u8; 512]).to_chunk())
            .unwrap();
        assert!(writer.packed_bytes() > empty);
    }
}
