use strand_types::Address;

use crate::error::{PackError, PackResult};

const INDEX_MAGIC: &[u8; 4] = b"STRI";
const INDEX_VERSION: u32 = 1;

/// Pack index for random-access lookups.
///
/// Layout:
/// - Fan-out table: 256 entries counting chunks with first byte <= index
/// - Sorted address array
/// - CRC32 array (parallel)
/// - Offset array (parallel)
/// - Pack checksum
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub fan_out: [u32; 256],
    pub addresses: Vec<Address>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub pack_checksum: [u8; 32],
}

impl PackIndex {
    /// Build an index from (address, crc32, offset) entries and a pack checksum.
    pub fn build(mut entries: Vec<(Address, u32, u64)>, pack_checksum: [u8; 32]) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fan_out = [0u32; 256];
        let mut addresses = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (address, crc, offset) in entries {
            fan_out[address.as_bytes()[0] as usize] += 1;
            addresses.push(address);
            crc32s.push(crc);
            offsets.push(offset);
        }
        for slot in 1..256 {
            fan_out[slot] += fan_out[slot - 1];
        }

        Self {
            fan_out,
            addresses,
            crc32s,
            offsets,
            pack_checksum,
        }
    }

    /// Look up a chunk's (offset, crc32).
    pub fn lookup(&self, address: &Address) -> Option<(u64, u32)> {
        let first = address.as_bytes()[0] as usize;
        let start = if first == 0 {
            0
        } else {
            self.fan_out[first - 1] as usize
        };
        let end = self.fan_out[first] as usize;
        let pos = self.addresses.get(start..end)?.binary_search(address).ok()?;
        Some((self.offsets[start + pos], self.crc32s[start + pos]))
    }

    pub fn chunk_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.lookup(address).is_some()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.addresses.len();
        let mut buf = Vec::with_capacity(8 + 256 * 4 + n * 44 + 32);
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for address in &self.addresses {
            buf.extend_from_slice(address.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        for &offset in &self.offsets {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        buf.extend_from_slice(&self.pack_checksum);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 8 {
            return Err(PackError::IndexCorrupted("too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(data, 4);
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut pos = 8;
        if data.len() < pos + 256 * 4 {
            return Err(PackError::IndexCorrupted("fan-out truncated".into()));
        }
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = read_u32(data, pos);
            pos += 4;
        }

        let count = fan_out[255] as usize;
        if data.len() != pos + count * (32 + 4 + 8) + 32 {
            return Err(PackError::IndexCorrupted("length does not match fan-out".into()));
        }

        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            addresses.push(Address::from_slice(&data[pos..pos + 32]).map_err(|e| {
                PackError::IndexCorrupted(e.to_string())
            })?);
            pos += 32;
        }
        if addresses.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PackError::IndexCorrupted("addresses not sorted".into()));
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(read_u32(data, pos));
            pos += 4;
        }

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[pos..pos + 8]);
            offsets.push(u64::from_be_bytes(raw));
            pos += 8;
        }

        let mut pack_checksum = [0u8; 32];
        pack_checksum.copy_from_slice(&data[pos..pos + 32]);

        Ok(Self {
            fan_out,
            addresses,
            crc32s,
            offsets,
            pack_checksum,
        })
    }
}

/// Caller guarantees `data` holds at least `pos + 4` bytes.
pub(crate) fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[pos..pos + 4]);
    u32::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_addresses(n: usize) -> Vec<Address> {
        (0..n)
            .map(|i| {
                let mut raw = [0u8; 32];
                raw[0] = (i % 256) as u8;
                raw[1] = (i / 256) as u8;
                Address::from_hash(raw)
            })
            .collect()
    }

    #[test]
    fn empty_index() {
        let idx = PackIndex::build(vec![], [0u8; 32]);
        assert_eq!(idx.chunk_count(), 0);
        assert!(idx.fan_out.iter().all(|&c| c == 0));
        assert!(!idx.contains(&Address::of(b"x")));
    }

    #[test]
    fn lookup_finds_every_entry() {
        let addrs = spread_addresses(600);
        let entries = addrs
            .iter()
            .enumerate()
            .map(|(i, a)| (*a, i as u32, (i * 10) as u64))
            .collect();
        let idx = PackIndex::build(entries, [0u8; 32]);
        assert_eq!(idx.fan_out[255], 600);
        for (i, a) in addrs.iter().enumerate() {
            assert_eq!(idx.lookup(a), Some(((i * 10) as u64, i as u32)));
        }
        assert!(idx.lookup(&Address::from_hash([0xEE; 32])).is_none());
    }

    #[test]
    fn bytes_roundtrip() {
        let addrs = spread_addresses(5);
        let entries = addrs.iter().map(|a| (*a, 7, 50)).collect();
        let idx = PackIndex::build(entries, [0xAB; 32]);
        let back = PackIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(back.pack_checksum, [0xAB; 32]);
        assert_eq!(back.addresses, idx.addresses);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            PackIndex::from_bytes(b"BADMxxxxxxxx"),
            Err(PackError::InvalidMagic { .. })
        ));
        let mut data = b"STRI".to_vec();
        data.extend_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            PackIndex::from_bytes(&data),
            Err(PackError::UnsupportedVersion(9))
        ));
        assert!(matches!(
            PackIndex::from_bytes(b"STRI"),
            Err(PackError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn truncated_body_is_corrupt() {
        let idx = PackIndex::build(vec![(Address::of(b"a"), 1, 12)], [0u8; 32]);
        let mut bytes = idx.to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            PackIndex::from_bytes(&bytes),
            Err(PackError::IndexCorrupted(_))
        ));
    }
}
