use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use strand_types::Address;
use tracing::debug;

use crate::chunk::Chunk;
use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// A store wrapper that knows which chunks were deliberately archived.
///
/// Ghost addresses count as present for `has`, since the store vouches that
/// they existed, but reading one fails with [`StoreError::GhostChunk`]
/// instead of silently returning nothing. The ghost set can be backed by a
/// file of hex addresses, one per line.
pub struct GhostChunkStore<S> {
    inner: S,
    ghosts: RwLock<HashSet<Address>>,
    ghost_file: Option<PathBuf>,
}

impl<S: ContentStore> GhostChunkStore<S> {
    /// Wrap a store with an in-memory ghost set.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ghosts: RwLock::new(HashSet::new()),
            ghost_file: None,
        }
    }

    /// Wrap a store, loading and persisting ghosts through `path`.
    pub fn open(inner: S, path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ghosts = HashSet::new();
        match fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    ghosts.insert(Address::from_hex(line)?);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        Ok(Self {
            inner,
            ghosts: RwLock::new(ghosts),
            ghost_file: Some(path),
        })
    }

    /// Record addresses as ghosts.
    pub fn persist_ghosts(&self, addresses: &[Address]) -> StoreResult<()> {
        let mut ghosts = self.ghosts.write().expect("lock poisoned");
        let fresh: Vec<Address> = addresses
            .iter()
            .filter(|a| ghosts.insert(**a))
            .copied()
            .collect();
        if let (Some(path), false) = (&self.ghost_file, fresh.is_empty()) {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for addr in &fresh {
                writeln!(file, "{addr}")?;
            }
            file.sync_all()?;
        }
        debug!(count = fresh.len(), "recorded ghost chunks");
        Ok(())
    }

    pub fn is_ghost(&self, address: &Address) -> bool {
        self.ghosts.read().expect("lock poisoned").contains(address)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ContentStore> ContentStore for GhostChunkStore<S> {
    fn get(&self, address: &Address) -> StoreResult<Option<Chunk>> {
        if self.is_ghost(address) {
            return Err(StoreError::GhostChunk(*address));
        }
        self.inner.get(address)
    }

    fn put(&self, chunk: &Chunk) -> StoreResult<Address> {
        self.inner.put(chunk)
    }

    fn has(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.is_ghost(address) || self.inner.has(address)?)
    }

    fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
        if let Some(ghost) = addresses.iter().find(|a| self.is_ghost(a)) {
            return Err(StoreError::GhostChunk(*ghost));
        }
        self.inner.get_many(addresses)
    }

    fn has_many(&self, addresses: &[Address]) -> StoreResult<HashSet<Address>> {
        let mut present = self.inner.has_many(addresses)?;
        let ghosts = self.ghosts.read().expect("lock poisoned");
        present.extend(addresses.iter().filter(|a| ghosts.contains(*a)));
        Ok(present)
    }

    fn put_many(&self, chunks: &[Chunk]) -> StoreResult<Vec<Address>> {
        self.inner.put_many(chunks)
    }
}

impl<S> std::fmt::Debug for GhostChunkStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostChunkStore")
            .field("ghosts", &self.ghosts.read().map(|g| g.len()).unwrap_or(0))
            .field("ghost_file", &self.ghost_file)
            .finish()
    }
}
