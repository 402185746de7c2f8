use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use strand_types::Address;
use tracing::debug;

use crate::chunk::Chunk;
use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// Loose-file chunk store.
///
/// Each chunk lives at `root/<first two hex chars>/<remaining hex>`. Writes
/// go to a temporary file in the target directory, are synced, then renamed
/// into place, so a chunk is durable and fully formed before `put` returns.
/// Reads verify the bytes against the address they are filed under.
#[derive(Debug, Clone)]
pub struct FileChunkStore {
    root: PathBuf,
}

impl FileChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, address: &Address) -> PathBuf {
        let hex = address.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Every stored address, sorted.
    pub fn all_addresses(&self) -> StoreResult<Vec<Address>> {
        let mut out = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                // Skips in-flight temp files.
                if let Ok(addr) = Address::from_hex(&format!("{prefix}{name}")) {
                    out.push(addr);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl ContentStore for FileChunkStore {
    fn get(&self, address: &Address) -> StoreResult<Option<Chunk>> {
        match fs::read(self.chunk_path(address)) {
            Ok(data) => Chunk::verified(*address, data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn put(&self, chunk: &Chunk) -> StoreResult<Address> {
        let address = chunk.address();
        if address.is_empty() {
            return Err(StoreError::EmptyAddress);
        }
        let path = self.chunk_path(&address);
        if path.exists() {
            return Ok(address);
        }
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(std::io::Error::other("chunk path has no parent")))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(chunk.data())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!(address = %address.short_hex(), kind = %chunk.kind(), "wrote chunk file");
        Ok(address)
    }

    fn has(&self, address: &Address) -> StoreResult<bool> {
        Ok(self.chunk_path(address).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Blob;

    #[test]
    fn put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Blob::new(b"persisted".to_vec()).to_chunk();
        let addr = {
            let store = FileChunkStore::open(dir.path()).unwrap();
            store.put(&chunk).unwrap()
        };
        let store = FileChunkStore::open(dir.path()).unwrap();
        assert!(store.has(&addr).unwrap());
        assert_eq!(store.get(&addr).unwrap(), Some(chunk));
        assert_eq!(store.all_addresses().unwrap(), vec![addr]);
    }

    #[test]
    fn missing_chunk_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(dir.path()).unwrap();
        assert!(store.get(&Address::of(b"absent")).unwrap().is_none());
        assert!(!store.has(&Address::of(b"absent")).unwrap());
    }

    #[test]
    fn tampered_file_is_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(dir.path()).unwrap();
        let addr = store.put(&Blob::new(b"original".to_vec()).to_chunk()).unwrap();
        fs::write(store.chunk_path(&addr), b"SBLBtampered").unwrap();
        let err = store.get(&addr).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }

    #[test]
    fn duplicate_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(dir.path()).unwrap();
        let chunk = Blob::new(b"dup".to_vec()).to_chunk();
        store.put(&chunk).unwrap();
        store.put(&chunk).unwrap();
        assert_eq!(store.all_addresses().unwrap().len(), 1);
    }
}
