use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strand_types::Address;

use crate::chunk::Chunk;
use crate::error::StoreResult;

/// Content-addressed chunk store.
///
/// All implementations must satisfy these invariants:
/// - `put` is idempotent: identical bytes map to the same address and are
///   written at most once.
/// - A chunk is durable (or the store documents its flush boundary) once
///   `put` returns.
/// - Concurrent reads and writes are safe.
/// - A miss is `Ok(None)` / `Ok(false)`. Errors are reserved for I/O
///   failure, corruption and ghost chunks.
/// - Stores never retry internally.
pub trait ContentStore: Send + Sync {
    /// Read a chunk by address.
    fn get(&self, address: &Address) -> StoreResult<Option<Chunk>>;

    /// Write a chunk and return its address.
    fn put(&self, chunk: &Chunk) -> StoreResult<Address>;

    /// Check whether a chunk is present.
    fn has(&self, address: &Address) -> StoreResult<bool>;

    /// Read many chunks. Absent addresses are missing from the result.
    fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
        let mut found = HashMap::with_capacity(addresses.len());
        for address in addresses {
            if let Some(chunk) = self.get(address)? {
                found.insert(*address, chunk);
            }
        }
        Ok(found)
    }

    /// The subset of `addresses` that is present.
    fn has_many(&self, addresses: &[Address]) -> StoreResult<HashSet<Address>> {
        let mut present = HashSet::new();
        for address in addresses {
            if self.has(address)? {
                present.insert(*address);
            }
        }
        Ok(present)
    }

    /// Write many chunks in slice order and return their addresses. A
    /// failure part way through leaves a prefix of `chunks` written.
    fn put_many(&self, chunks: &[Chunk]) -> StoreResult<Vec<Address>> {
        chunks.iter().map(|chunk| self.put(chunk)).collect()
    }
}

impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    fn get(&self, address: &Address) -> StoreResult<Option<Chunk>> {
        (**self).get(address)
    }

    fn put(&self, chunk: &Chunk) -> StoreResult<Address> {
        (**self).put(chunk)
    }

    fn has(&self, address: &Address) -> StoreResult<bool> {
        (**self).has(address)
    }

    fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
        (**self).get_many(addresses)
    }

    fn has_many(&self, addresses: &[Address]) -> StoreResult<HashSet<Address>> {
        (**self).has_many(addresses)
    }

    fn put_many(&self, chunks: &[Chunk]) -> StoreResult<Vec<Address>> {
        (**self).put_many(chunks)
    }
}
