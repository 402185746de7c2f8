use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use strand_types::Address;

use crate::chunk::Chunk;
use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// In-memory, HashMap-based chunk store.
///
/// Intended for tests and embedding. Chunks share their buffers, so reads
/// and writes only bump reference counts.
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<Address, Chunk>>,
    writes: AtomicU64,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of chunks currently stored.
    pub fn len(&self) -> usize {
        self.chunks.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().expect("lock poisoned").is_empty()
    }

    /// Total serialized bytes across all chunks.
    pub fn total_bytes(&self) -> u64 {
        self.chunks
            .read()
            .expect("lock poisoned")
            .values()
            .map(|c| c.len() as u64)
            .sum()
    }

    /// Physical writes performed so far; duplicate puts do not count.
    pub fn put_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Sorted list of every stored address.
    pub fn all_addresses(&self) -> Vec<Address> {
        let map = self.chunks.read().expect("lock poisoned");
        let mut addrs: Vec<Address> = map.keys().copied().collect();
        addrs.sort();
        addrs
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryChunkStore {
    fn get(&self, address: &Address) -> StoreResult<Option<Chunk>> {
        Ok(self.chunks.read().expect("lock poisoned").get(address).cloned())
    }

    fn put(&self, chunk: &Chunk) -> StoreResult<Address> {
        let address = chunk.address();
        if address.is_empty() {
            return Err(StoreError::EmptyAddress);
        }
        let mut map = self.chunks.write().expect("lock poisoned");
        map.entry(address).or_insert_with(|| {
            self.writes.fetch_add(1, Ordering::Relaxed);
            chunk.clone()
        });
        Ok(address)
    }

    fn has(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.chunks.read().expect("lock poisoned").contains_key(address))
    }

    fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
        let map = self.chunks.read().expect("lock poisoned");
        Ok(addresses
            .iter()
            .filter_map(|a| map.get(a).map(|c| (*a, c.clone())))
            .collect())
    }

    fn has_many(&self, addresses: &[Address]) -> StoreResult<HashSet<Address>> {
        let map = self.chunks.read().expect("lock poisoned");
        Ok(addresses
            .iter()
            .filter(|a| map.contains_key(*a))
            .copied()
            .collect())
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore")
            .field("chunk_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;
    use crate::object::Blob;

    fn blob(content: &[u8]) -> Chunk {
        Blob::new(content).to_chunk()
    }

    // -----------------------------------------------------------------------
    // Core get/put/has
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get() {
        let store = InMemoryChunkStore::new();
        let chunk = blob(b"hello");
        let addr = store.put(&chunk).unwrap();
        assert_eq!(addr, chunk.address());
        assert_eq!(store.get(&addr).unwrap(), Some(chunk));
        assert!(store.has(&addr).unwrap());
    }

    #[test]
    fn missing_is_none_not_error() {
        let store = InMemoryChunkStore::new();
        let addr = Address::of(b"nothing");
        assert!(store.get(&addr).unwrap().is_none());
        assert!(!store.has(&addr).unwrap());
    }

    #[test]
    fn put_is_idempotent() {
        let store = InMemoryChunkStore::new();
        let a = store.put(&blob(b"same")).unwrap();
        let b = store.put(&blob(b"same")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    #[test]
    fn batch_operations_skip_missing() {
        let store = InMemoryChunkStore::new();
        let chunks = vec![blob(b"1"), blob(b"2"), Chunk::new(ChunkKind::Map, b"3")];
        let addrs = store.put_many(&chunks).unwrap();
        let missing = Address::of(b"missing");

        let mut query = addrs.clone();
        query.push(missing);
        let got = store.get_many(&query).unwrap();
        assert_eq!(got.len(), 3);
        assert!(!got.contains_key(&missing));

        let present = store.has_many(&query).unwrap();
        assert_eq!(present.len(), 3);
        assert!(!present.contains(&missing));
        assert_eq!(store.all_addresses().len(), 3);
        assert!(store.total_bytes() > 0);
    }

    #[test]
    fn concurrent_puts_dedupe() {
        let store = std::sync::Arc::new(InMemoryChunkStore::new());
        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..50u32 {
                        store.put(&blob(&i.to_be_bytes())).unwrap();
                    }
                });
            }
        });
        assert_eq!(store.len(), 50);
        assert_eq!(store.put_count(), 50);
    }
}
