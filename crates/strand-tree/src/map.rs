//! The ordered map handle and its read paths.

use strand_store::{ChunkKind, ContentStore, NodeObject};
use strand_types::Address;
use tracing::debug;

use crate::chunker::{build_root, NodeChunker, NodeRef};
use crate::error::{TreeError, TreeResult};

/// A persistent, content-addressed ordered map.
///
/// The handle is just the root address plus the node flavour; all nodes
/// live in a [`ContentStore`] that every operation takes explicitly. The
/// empty map has the empty root address and no chunk at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OrderedMap {
    kind: ChunkKind,
    root: Address,
}

impl OrderedMap {
    pub fn empty(kind: ChunkKind) -> Self {
        Self {
            kind,
            root: Address::empty(),
        }
    }

    /// Wrap a root address, taking the flavour from the root chunk.
    pub fn load(store: &dyn ContentStore, root: Address) -> TreeResult<Self> {
        let chunk = store.get(&root)?.ok_or(TreeError::MissingNode(root))?;
        NodeObject::from_chunk(&chunk)?;
        Ok(Self {
            kind: chunk.kind(),
            root,
        })
    }

    /// Wrap a root address of known flavour without reading it.
    pub fn from_root(kind: ChunkKind, root: Address) -> Self {
        Self { kind, root }
    }

    /// Build a map from strictly ascending entries.
    pub fn from_sorted_entries<I>(store: &dyn ContentStore, kind: ChunkKind, entries: I) -> TreeResult<Self>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut chunker = NodeChunker::new(store, kind, 0);
        let mut prev: Option<Vec<u8>> = None;
        for (key, value) in entries {
            if prev.as_ref().is_some_and(|p| *p >= key) {
                return Err(TreeError::UnsortedEntries(key));
            }
            prev = Some(key.clone());
            chunker.push_entry(key, value)?;
        }
        let root = build_root(store, kind, chunker.finish()?)?;
        debug!(root = %root.short_hex(), %kind, "built ordered map");
        Ok(Self { kind, root })
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Root address; empty for the empty map.
    pub fn root(&self) -> Address {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up a single key.
    pub fn get(&self, store: &dyn ContentStore, key: &[u8]) -> TreeResult<Option<Vec<u8>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut node = self.load_node(store, &self.root)?;
        loop {
            let idx = node.keys.partition_point(|k| k.as_slice() < key);
            if idx == node.keys.len() {
                return Ok(None);
            }
            if node.is_leaf() {
                return Ok((node.keys[idx] == key).then(|| node.values.swap_remove(idx)));
            }
            let child = node.children[idx];
            node = self.load_node(store, &child)?;
        }
    }

    pub fn contains_key(&self, store: &dyn ContentStore, key: &[u8]) -> TreeResult<bool> {
        Ok(self.get(store, key)?.is_some())
    }

    /// Entries in ascending key order.
    pub fn iter<'a>(&self, store: &'a dyn ContentStore) -> MapIter<'a> {
        MapIter::new(store, *self, false)
    }

    /// Entries in descending key order.
    pub fn iter_rev<'a>(&self, store: &'a dyn ContentStore) -> MapIter<'a> {
        MapIter::new(store, *self, true)
    }

    /// Number of entries. Reads every leaf.
    pub fn len(&self, store: &dyn ContentStore) -> TreeResult<usize> {
        self.leaf_refs(store)?
            .iter()
            .map(|leaf| self.load_node(store, &leaf.address).map(|n| n.len()))
            .sum()
    }

    /// The leaf level, left to right, without reading any leaf.
    pub fn leaf_refs(&self, store: &dyn ContentStore) -> TreeResult<Vec<NodeRef>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.load_node(store, &self.root)?;
        if root.is_leaf() {
            let last_key = root.keys.last().cloned().unwrap_or_default();
            return Ok(vec![NodeRef {
                last_key,
                address: self.root,
            }]);
        }
        let mut level = vec![root];
        while level[0].level > 1 {
            let mut next = Vec::new();
            for node in &level {
                for child in &node.children {
                    next.push(self.load_node(store, child)?);
                }
            }
            level = next;
        }
        Ok(level
            .into_iter()
            .flat_map(|n| n.keys.into_iter().zip(n.children))
            .map(|(last_key, address)| NodeRef { last_key, address })
            .collect())
    }

    /// Read one node of this map, checking its flavour.
    pub fn load_node(&self, store: &dyn ContentStore, address: &Address) -> TreeResult<NodeObject> {
        load_node(store, self.kind, address)
    }
}

pub(crate) fn load_node(
    store: &dyn ContentStore,
    kind: ChunkKind,
    address: &Address,
) -> TreeResult<NodeObject> {
    let chunk = store.get(address)?.ok_or(TreeError::MissingNode(*address))?;
    if chunk.kind() != kind {
        return Err(TreeError::KindMismatch {
            address: *address,
            expected: kind,
            actual: chunk.kind(),
        });
    }
    Ok(NodeObject::from_chunk(&chunk)?)
}

/// Streaming iterator over a map's entries.
///
/// Holds one node per tree level, so memory stays proportional to depth
/// rather than to the number of entries.
pub struct MapIter<'a> {
    store: &'a dyn ContentStore,
    map: OrderedMap,
    reverse: bool,
    /// (node, entries already consumed from it)
    stack: Vec<(NodeObject, usize)>,
    started: bool,
    failed: bool,
}

impl<'a> MapIter<'a> {
    fn new(store: &'a dyn ContentStore, map: OrderedMap, reverse: bool) -> Self {
        Self {
            store,
            map,
            reverse,
            stack: Vec::new(),
            started: false,
            failed: false,
        }
    }

    fn step(&mut self) -> TreeResult<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.started {
            self.started = true;
            if !self.map.is_empty() {
                let root = self.map.load_node(self.store, &self.map.root)?;
                self.stack.push((root, 0));
            }
        }
        loop {
            let Some((node, consumed)) = self.stack.last_mut() else {
                return Ok(None);
            };
            if *consumed == node.len() {
                self.stack.pop();
                continue;
            }
            let idx = if self.reverse {
                node.len() - 1 - *consumed
            } else {
                *consumed
            };
            *consumed += 1;
            if node.is_leaf() {
                return Ok(Some((node.keys[idx].clone(), node.values[idx].clone())));
            }
            let child = node.children[idx];
            let child = self.map.load_node(self.store, &child)?;
            self.stack.push((child, 0));
        }
    }
}

impl Iterator for MapIter<'_> {
    type Item = TreeResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
