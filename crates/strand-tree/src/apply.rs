//! Batched, concurrent application of sorted edits to an ordered map.
//!
//! The pipeline has three stages:
//!
//! 1. The calling thread drains the [`EditProvider`] into batches that grow
//!    geometrically from [`BATCH_SIZE_START`] to [`BATCH_SIZE_MAX`].
//! 2. A fixed pool of [`WORKER_COUNT`] threads locates the leaf each edit
//!    lands in and loads those leaves.
//! 3. A single apply thread takes located batches in submission order,
//!    merges edits into leaf entries, and re-chunks only the touched run of
//!    leaves, reusing every untouched leaf once the chunk boundaries line up
//!    again.
//!
//! Internal levels are rebuilt from the resulting leaf level, so the new root
//! is exactly the root a from-scratch build of the same entries would get.

use crossbeam_channel::{bounded, Receiver, Sender};
use strand_store::{ChunkKind, ContentStore};
use tracing::debug;

use crate::chunker::{build_root, NodeChunker, NodeRef};
use crate::edits::{AppliedEditStats, Edit, EditProvider};
use crate::error::{TreeError, TreeResult};
use crate::map::{load_node, OrderedMap};

pub const WORKER_COUNT: usize = 7;
pub const BATCH_SIZE_START: usize = 10;
pub const BATCH_SIZE_MULT: f64 = 1.25;
pub const BATCH_SIZE_MAX: usize = 5000;

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

struct Work {
    edits: Vec<Edit>,
    result: Sender<TreeResult<LocatedBatch>>,
}

/// A batch's edits grouped by the leaf they fall into.
struct LocatedBatch {
    groups: Vec<LeafEdits>,
}

struct LeafEdits {
    /// Position of the leaf in the old leaf level.
    ordinal: usize,
    /// The leaf's entries as loaded by the worker.
    entries: Entries,
    edits: Vec<Edit>,
}

/// Apply every edit from `provider` to `map`, returning the new map.
///
/// The provider must yield strictly ascending keys; anything else fails with
/// [`TreeError::UnsortedEdits`].
pub fn apply_edits(
    store: &dyn ContentStore,
    map: &OrderedMap,
    provider: &mut dyn EditProvider,
) -> TreeResult<(OrderedMap, AppliedEditStats)> {
    let kind = map.kind();
    let leaves = map.leaf_refs(store)?;

    let (leaf_level, stats) = std::thread::scope(|s| {
        let leaves = &leaves;
        let (work_tx, work_rx) = bounded::<Work>(WORKER_COUNT);
        let (order_tx, order_rx) = bounded(WORKER_COUNT * 2);

        let workers: Vec<_> = (0..WORKER_COUNT)
            .map(|_| {
                let work_rx = work_rx.clone();
                s.spawn(move || run_worker(store, kind, leaves, work_rx))
            })
            .collect();
        drop(work_rx);
        let applier = s.spawn(move || run_applier(store, kind, leaves, order_rx));

        let produced = produce(provider, work_tx, order_tx);
        let applied = applier
            .join()
            .map_err(|_| TreeError::WorkerPanic)
            .and_then(|r| r);
        let panicked = workers
            .into_iter()
            .map(|w| w.join())
            .filter(Result::is_err)
            .count();

        produced?;
        if panicked > 0 {
            return Err(TreeError::WorkerPanic);
        }
        applied
    })?;

    let root = build_root(store, kind, leaf_level)?;
    debug!(root = %root.short_hex(), ?stats, "applied edits");
    Ok((OrderedMap::from_root(kind, root), stats))
}

fn produce(
    provider: &mut dyn EditProvider,
    work_tx: Sender<Work>,
    order_tx: Sender<Receiver<TreeResult<LocatedBatch>>>,
) -> TreeResult<()> {
    let mut batch_size = BATCH_SIZE_START;
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let Some(edit) = provider.next_edit()? else {
                break;
            };
            if last_key.as_ref().is_some_and(|k| *k >= edit.key) {
                return Err(TreeError::UnsortedEdits(edit.key));
            }
            last_key = Some(edit.key.clone());
            batch.push(edit);
        }
        if batch.is_empty() {
            return Ok(());
        }
        let exhausted = batch.len() < batch_size;

        let (result_tx, result_rx) = bounded(1);
        // A closed channel means the apply stage already stopped; its
        // error is the one reported.
        if order_tx.send(result_rx).is_err() {
            return Ok(());
        }
        if work_tx
            .send(Work {
                edits: batch,
                result: result_tx,
            })
            .is_err()
        {
            return Ok(());
        }
        if exhausted {
            return Ok(());
        }
        batch_size = ((batch_size as f64 * BATCH_SIZE_MULT) as usize).min(BATCH_SIZE_MAX);
    }
}

fn run_worker(
    store: &dyn ContentStore,
    kind: ChunkKind,
    leaves: &[NodeRef],
    work_rx: Receiver<Work>,
) {
    for work in work_rx {
        // The apply stage may have hung up after an error.
        let _ = work.result.send(locate(store, kind, leaves, work.edits));
    }
}

fn locate(
    store: &dyn ContentStore,
    kind: ChunkKind,
    leaves: &[NodeRef],
    edits: Vec<Edit>,
) -> TreeResult<LocatedBatch> {
    let mut groups: Vec<LeafEdits> = Vec::new();
    for edit in edits {
        let ordinal = leaves
            .partition_point(|leaf| leaf.last_key < edit.key)
            .min(leaves.len().saturating_sub(1));
        match groups.last_mut() {
            Some(group) if group.ordinal == ordinal => group.edits.push(edit),
            _ => {
                let entries = match leaves.get(ordinal) {
                    Some(leaf) => {
                        let node = load_node(store, kind, &leaf.address)?;
                        node.keys.into_iter().zip(node.values).collect()
                    }
                    None => Vec::new(),
                };
                groups.push(LeafEdits {
                    ordinal,
                    entries,
                    edits: vec![edit],
                });
            }
        }
    }
    Ok(LocatedBatch { groups })
}

fn run_applier(
    store: &dyn ContentStore,
    kind: ChunkKind,
    leaves: &[NodeRef],
    order_rx: Receiver<Receiver<TreeResult<LocatedBatch>>>,
) -> TreeResult<(Vec<NodeRef>, AppliedEditStats)> {
    let mut applier = Applier {
        store,
        kind,
        leaves,
        chunker: NodeChunker::new(store, kind, 0),
        next_old: 0,
        pending: None,
        stats: AppliedEditStats::default(),
    };
    for result_rx in order_rx {
        let batch = result_rx.recv().map_err(|_| TreeError::WorkerPanic)??;
        for group in batch.groups {
            applier.accept(group)?;
        }
    }
    applier.finish()
}

struct Applier<'a> {
    store: &'a dyn ContentStore,
    kind: ChunkKind,
    leaves: &'a [NodeRef],
    chunker: NodeChunker<'a>,
    /// First old leaf not yet re-emitted.
    next_old: usize,
    /// The most recently edited leaf, held back in case the next batch
    /// edits it too.
    pending: Option<(usize, Entries)>,
    stats: AppliedEditStats,
}

impl Applier<'_> {
    fn accept(&mut self, group: LeafEdits) -> TreeResult<()> {
        match &mut self.pending {
            Some((ordinal, entries)) if *ordinal == group.ordinal => {
                merge_edits(entries, group.edits, &mut self.stats);
            }
            _ => {
                self.flush_pending()?;
                let mut entries = group.entries;
                merge_edits(&mut entries, group.edits, &mut self.stats);
                self.pending = Some((group.ordinal, entries));
            }
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> TreeResult<()> {
        if let Some((ordinal, entries)) = self.pending.take() {
            self.advance_to(ordinal)?;
            for (key, value) in entries {
                self.chunker.push_entry(key, value)?;
            }
            self.next_old = ordinal + 1;
        }
        Ok(())
    }

    /// Carry old leaves `next_old..end` into the new level.
    ///
    /// While a node is open the old entries must be re-chunked; once the
    /// chunker sits on a boundary the remaining old leaves are reused as-is.
    fn advance_to(&mut self, end: usize) -> TreeResult<()> {
        while self.next_old < end {
            let leaf = &self.leaves[self.next_old];
            if self.chunker.is_open() {
                let node = load_node(self.store, self.kind, &leaf.address)?;
                for (key, value) in node.keys.into_iter().zip(node.values) {
                    self.chunker.push_entry(key, value)?;
                }
            } else {
                self.chunker.push_written(leaf.clone());
            }
            self.next_old += 1;
        }
        Ok(())
    }

    fn finish(mut self) -> TreeResult<(Vec<NodeRef>, AppliedEditStats)> {
        self.flush_pending()?;
        self.advance_to(self.leaves.len())?;
        Ok((self.chunker.finish()?, self.stats))
    }
}

/// Merge sorted, unique edits into sorted entries.
fn merge_edits(entries: &mut Entries, edits: Vec<Edit>, stats: &mut AppliedEditStats) {
    let mut old = std::mem::take(entries).into_iter().peekable();
    let mut out = Vec::with_capacity(old.len() + edits.len());
    for edit in edits {
        while let Some(entry) = old.next_if(|(k, _)| *k < edit.key) {
            out.push(entry);
        }
        let existing = old.next_if(|(k, _)| *k == edit.key);
        match (existing, edit.value) {
            (Some((key, current)), Some(value)) => {
                if current == value {
                    stats.same_value += 1;
                } else {
                    stats.modifications += 1;
                }
                out.push((key, value));
            }
            (Some(_), None) => stats.deletions += 1,
            (None, Some(value)) => {
                stats.additions += 1;
                out.push((edit.key, value));
            }
            (None, None) => stats.nonexistent_deletes += 1,
        }
    }
    out.extend(old);
    *entries = out;
}
