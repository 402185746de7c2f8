//! Content-defined node boundaries.
//!
//! A node ends after an entry whose key hashes under a level-salted
//! threshold, once the node holds at least [`MIN_NODE_ENTRIES`], or when it
//! reaches [`MAX_NODE_ENTRIES`]. Boundaries depend only on the entry
//! sequence, so a map's shape (and root address) depends only on its
//! contents, not on the edits that produced it.

use strand_store::{ChunkKind, ContentStore, NodeObject};
use strand_types::Address;

use crate::error::TreeResult;

/// Average entries per node.
pub const TARGET_NODE_ENTRIES: u32 = 32;
/// Nodes hold at least this many entries, except the last node of a level.
pub const MIN_NODE_ENTRIES: usize = 2;
/// Nodes never exceed this many entries.
pub const MAX_NODE_ENTRIES: usize = 256;

const BOUNDARY_DOMAIN: &[u8] = b"strand-boundary-v1:";

/// Whether `key` closes a node that currently holds `count` entries.
pub fn is_boundary(level: u8, key: &[u8], count: usize) -> bool {
    if count >= MAX_NODE_ENTRIES {
        return true;
    }
    if count < MIN_NODE_ENTRIES {
        return false;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(BOUNDARY_DOMAIN);
    hasher.update(&[level]);
    hasher.update(key);
    let digest = hasher.finalize();
    let mut head = [0u8; 4];
    head.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_be_bytes(head) < u32::MAX / TARGET_NODE_ENTRIES
}

/// A written node, as seen from its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRef {
    /// Greatest key stored beneath the node.
    pub last_key: Vec<u8>,
    pub address: Address,
}

/// Accumulates one level's entries and writes a node at each boundary.
pub(crate) struct NodeChunker<'a> {
    store: &'a dyn ContentStore,
    kind: ChunkKind,
    level: u8,
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
    children: Vec<Address>,
    written: Vec<NodeRef>,
}

impl<'a> NodeChunker<'a> {
    pub(crate) fn new(store: &'a dyn ContentStore, kind: ChunkKind, level: u8) -> Self {
        Self {
            store,
            kind,
            level,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            written: Vec::new(),
        }
    }

    /// Append a leaf entry.
    pub(crate) fn push_entry(&mut self, key: Vec<u8>, value: Vec<u8>) -> TreeResult<()> {
        debug_assert_eq!(self.level, 0);
        self.values.push(value);
        self.push_key(key)
    }

    /// Append a child reference.
    pub(crate) fn push_child(&mut self, child: NodeRef) -> TreeResult<()> {
        debug_assert!(self.level > 0);
        self.children.push(child.address);
        self.push_key(child.last_key)
    }

    fn push_key(&mut self, key: Vec<u8>) -> TreeResult<()> {
        let boundary = is_boundary(self.level, &key, self.keys.len() + 1);
        self.keys.push(key);
        if boundary {
            self.flush()?;
        }
        Ok(())
    }

    /// Whether entries are waiting for a boundary.
    pub(crate) fn is_open(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Adopt an already written node. Only valid between nodes.
    pub(crate) fn push_written(&mut self, node: NodeRef) {
        debug_assert!(!self.is_open());
        self.written.push(node);
    }

    fn flush(&mut self) -> TreeResult<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let keys = std::mem::take(&mut self.keys);
        let last_key = keys[keys.len() - 1].clone();
        let node = if self.level == 0 {
            NodeObject::leaf(keys, std::mem::take(&mut self.values))
        } else {
            NodeObject::internal(self.level, keys, std::mem::take(&mut self.children))
        };
        let address = self.store.put(&node.to_chunk(self.kind)?)?;
        self.written.push(NodeRef { last_key, address });
        Ok(())
    }

    /// Close the trailing node and return every node of the level.
    pub(crate) fn finish(mut self) -> TreeResult<Vec<NodeRef>> {
        self.flush()?;
        Ok(self.written)
    }
}

/// Build internal levels over `nodes` until one root remains.
///
/// Returns the empty address for an empty level.
pub(crate) fn build_root(
    store: &dyn ContentStore,
    kind: ChunkKind,
    mut nodes: Vec<NodeRef>,
) -> TreeResult<Address> {
    let mut level = 0u8;
    loop {
        match nodes.len() {
            0 => return Ok(Address::empty()),
            1 => return Ok(nodes[0].address),
            _ => {}
        }
        level += 1;
        let mut chunker = NodeChunker::new(store, kind, level);
        for node in nodes {
            chunker.push_child(node)?;
        }
        nodes = chunker.finish()?;
    }
}
