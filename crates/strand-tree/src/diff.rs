//! Map-level diff: compare two ordered maps and produce their changes.
//!
//! Identical subtrees share an address, so the walk drops every node the two
//! sides have in common before descending. Only the leaves that actually
//! differ are read, which keeps the cost proportional to the change rather
//! than to the size of either map.

use std::cmp::Ordering;
use std::collections::HashSet;

use strand_store::ContentStore;
use strand_types::Address;

use crate::error::TreeResult;
use crate::map::{load_node, OrderedMap};

/// The result of comparing two maps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapDiff {
    /// Changes in ascending key order.
    pub changes: Vec<MapChange>,
}

impl MapDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Entries present only on the new side.
    pub fn added(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.changes.iter().filter_map(|c| match c {
            MapChange::Added { key, value } => Some((key.as_slice(), value.as_slice())),
            _ => None,
        })
    }
}

/// A single change between two maps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapChange {
    Added { key: Vec<u8>, value: Vec<u8> },
    Deleted { key: Vec<u8>, old: Vec<u8> },
    Modified { key: Vec<u8>, old: Vec<u8>, new: Vec<u8> },
}

impl MapChange {
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Added { key, .. } | Self::Deleted { key, .. } | Self::Modified { key, .. } => key,
        }
    }
}

/// One side of the walk: the nodes still in play at a single level.
struct Frontier {
    map: OrderedMap,
    level: u8,
    nodes: Vec<Address>,
}

impl Frontier {
    fn new(store: &dyn ContentStore, map: OrderedMap) -> TreeResult<Self> {
        if map.is_empty() {
            return Ok(Self {
                map,
                level: 0,
                nodes: Vec::new(),
            });
        }
        let root = map.load_node(store, &map.root())?;
        Ok(Self {
            map,
            level: root.level,
            nodes: vec![map.root()],
        })
    }

    fn descend(&mut self, store: &dyn ContentStore) -> TreeResult<()> {
        let mut next = Vec::new();
        for addr in &self.nodes {
            next.extend(load_node(store, self.map.kind(), addr)?.children);
        }
        self.nodes = next;
        self.level -= 1;
        Ok(())
    }

    fn entries(&self, store: &dyn ContentStore) -> TreeResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for addr in &self.nodes {
            let leaf = load_node(store, self.map.kind(), addr)?;
            out.extend(leaf.keys.into_iter().zip(leaf.values));
        }
        Ok(out)
    }
}

fn drop_shared(a: &mut Frontier, b: &mut Frontier) {
    let in_a: HashSet<Address> = a.nodes.iter().copied().collect();
    let shared: HashSet<Address> = b.nodes.iter().filter(|n| in_a.contains(*n)).copied().collect();
    if !shared.is_empty() {
        a.nodes.retain(|n| !shared.contains(n));
        b.nodes.retain(|n| !shared.contains(n));
    }
}

/// Compare `from` against `to`. `Added` entries exist only in `to`.
pub fn diff_maps(store: &dyn ContentStore, from: &OrderedMap, to: &OrderedMap) -> TreeResult<MapDiff> {
    if from.root() == to.root() {
        return Ok(MapDiff::default());
    }
    let mut a = Frontier::new(store, *from)?;
    let mut b = Frontier::new(store, *to)?;

    loop {
        drop_shared(&mut a, &mut b);
        if a.nodes.is_empty() && b.nodes.is_empty() {
            return Ok(MapDiff::default());
        }
        let a_deeper = !a.nodes.is_empty() && a.level > 0 && (b.nodes.is_empty() || a.level >= b.level);
        let b_deeper = !b.nodes.is_empty() && b.level > 0 && (a.nodes.is_empty() || b.level >= a.level);
        if !a_deeper && !b_deeper {
            break;
        }
        if a_deeper {
            a.descend(store)?;
        }
        if b_deeper {
            b.descend(store)?;
        }
    }

    Ok(merge_entries(a.entries(store)?, b.entries(store)?))
}

fn merge_entries(old: Vec<(Vec<u8>, Vec<u8>)>, new: Vec<(Vec<u8>, Vec<u8>)>) -> MapDiff {
    let mut changes = Vec::new();
    let mut old = old.into_iter().peekable();
    let mut new = new.into_iter().peekable();
    loop {
        let order = match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((ok, _)), Some((nk, _))) => ok.cmp(nk),
        };
        match order {
            Ordering::Less => {
                if let Some((key, old)) = old.next() {
                    changes.push(MapChange::Deleted { key, old });
                }
            }
            Ordering::Greater => {
                if let Some((key, value)) = new.next() {
                    changes.push(MapChange::Added { key, value });
                }
            }
            Ordering::Equal => {
                if let (Some((key, o)), Some((_, n))) = (old.next(), new.next()) {
                    if o != n {
                        changes.push(MapChange::Modified { key, old: o, new: n });
                    }
                }
            }
        }
    }
    MapDiff { changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strand_store::{ChunkKind, InMemoryChunkStore};

    fn build(store: &dyn ContentStore, m: &BTreeMap<Vec<u8>, Vec<u8>>) -> OrderedMap {
        OrderedMap::from_sorted_entries(store, ChunkKind::Map, m.clone()).unwrap()
    }

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    #[test]
    fn identical_maps_have_no_diff() {
        let store = InMemoryChunkStore::new();
        let m: BTreeMap<_, _> = (0..500).map(|i| (key(i), b"x".to_vec())).collect();
        let a = build(&store, &m);
        assert!(diff_maps(&store, &a, &a).unwrap().is_empty());
    }

    #[test]
    fn detects_each_change_kind() {
        let store = InMemoryChunkStore::new();
        let old: BTreeMap<_, _> = (0..2_000).map(|i| (key(i), b"x".to_vec())).collect();
        let mut new = old.clone();
        new.remove(&key(10));
        new.insert(key(500), b"y".to_vec());
        new.insert(key(5_000), b"z".to_vec());

        let diff = diff_maps(&store, &build(&store, &old), &build(&store, &new)).unwrap();
        assert_eq!(
            diff.changes,
            vec![
                MapChange::Deleted { key: key(10), old: b"x".to_vec() },
                MapChange::Modified { key: key(500), old: b"x".to_vec(), new: b"y".to_vec() },
                MapChange::Added { key: key(5_000), value: b"z".to_vec() },
            ]
        );
        assert_eq!(diff.added().count(), 1);
    }

    #[test]
    fn diff_against_empty() {
        let store = InMemoryChunkStore::new();
        let m: BTreeMap<_, _> = (0..300).map(|i| (key(i), vec![])).collect();
        let full = build(&store, &m);
        let empty = OrderedMap::empty(ChunkKind::Map);
        let added = diff_maps(&store, &empty, &full).unwrap();
        assert_eq!(added.len(), 300);
        assert!(added.changes.iter().all(|c| matches!(c, MapChange::Added { .. })));
        let deleted = diff_maps(&store, &full, &empty).unwrap();
        assert!(deleted.changes.iter().all(|c| matches!(c, MapChange::Deleted { .. })));
    }

    #[test]
    fn diff_reads_only_changed_leaves() {
        let store = InMemoryChunkStore::new();
        let old: BTreeMap<_, _> = (0..20_000).map(|i| (key(i), b"x".to_vec())).collect();
        let mut new = old.clone();
        new.insert(key(7_777), b"changed".to_vec());
        let a = build(&store, &old);
        let b = build(&store, &new);

        struct Counting<'a> {
            inner: &'a InMemoryChunkStore,
            reads: std::sync::atomic::AtomicUsize,
        }
        impl ContentStore for Counting<'_> {
            fn get(&self, a: &Address) -> strand_store::StoreResult<Option<strand_store::Chunk>> {
                self.reads.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.inner.get(a)
            }
            fn put(&self, c: &strand_store::Chunk) -> strand_store::StoreResult<Address> {
                self.inner.put(c)
            }
            fn has(&self, a: &Address) -> strand_store::StoreResult<bool> {
                self.inner.has(a)
            }
        }
        let counting = Counting {
            inner: &store,
            reads: Default::default(),
        };
        let diff = diff_maps(&counting, &a, &b).unwrap();
        assert_eq!(diff.len(), 1);
        assert!(counting.reads.into_inner() < 40);
    }
}
