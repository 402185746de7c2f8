//! Moving sealed staging packs into the sink.
//!
//! Chunks are written only after every chunk they reference that this pull
//! staged. A pull that stops part way through therefore leaves the sink
//! holding complete subgraphs only, which is what pruning by `has` relies on
//! when the pull is restarted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strand_pack::{PackFile, PackReader, PackResult};
use strand_store::{Chunk, ContentStore, RefWalker};
use strand_types::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PullError, PullResult};
use crate::stats::PullProgress;

/// Write every pack received on `packs` into `sink`, deleting each pack
/// afterwards. Runs on a blocking thread.
///
/// `staged` holds every address the pull put into a pack. Once `abort`
/// fires (or a pack fails) the remaining packs are deleted unwritten. The
/// first failure is returned after the channel closes.
pub(crate) fn ingest_packs(
    sink: Arc<dyn ContentStore>,
    walker: Arc<dyn RefWalker>,
    staged: HashSet<Address>,
    mut packs: mpsc::Receiver<PackFile>,
    progress: Arc<PullProgress>,
    abort: CancellationToken,
) -> PullResult<()> {
    let mut order = WriteOrder::new(sink.as_ref(), walker.as_ref(), staged);
    let mut failure = None;
    while let Some(pack) = packs.blocking_recv() {
        if failure.is_none() && !abort.is_cancelled() {
            match order.write_pack(&pack) {
                Ok((chunks, bytes)) => progress.record_written(chunks, bytes),
                Err(e) => {
                    warn!(error = %e, "ingesting staged pack failed");
                    abort.cancel();
                    failure = Some(e);
                }
            }
        }
        discard(&pack);
    }
    if let Some(e) = failure {
        return Err(e);
    }
    if abort.is_cancelled() {
        return Ok(());
    }
    order.finish()
}

/// Holds back chunks until the staged chunks they reference are written.
struct WriteOrder<'a> {
    sink: &'a dyn ContentStore,
    walker: &'a dyn RefWalker,
    /// Staged addresses not yet handed to the sink.
    unwritten: HashSet<Address>,
    /// Blocked chunks and how many unwritten refs each still waits on.
    waiting: HashMap<Address, (Chunk, usize)>,
    /// Unwritten address -> chunks blocked on it.
    dependents: HashMap<Address, Vec<Address>>,
}

impl<'a> WriteOrder<'a> {
    fn new(
        sink: &'a dyn ContentStore,
        walker: &'a dyn RefWalker,
        staged: HashSet<Address>,
    ) -> Self {
        Self {
            sink,
            walker,
            unwritten: staged,
            waiting: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Returns the chunks and bytes written.
    fn write_pack(&mut self, pack: &PackFile) -> PullResult<(u64, u64)> {
        let reader = PackReader::open(&pack.pack_path)?;
        let mut chunks = reader.chunks().collect::<PackResult<Vec<Chunk>>>()?;
        // Later chunks in a pack sit deeper in the graph.
        chunks.reverse();

        let mut batch = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            self.offer(chunk, &mut batch)?;
        }
        self.sink.put_many(&batch)?;
        let bytes = batch.iter().map(|c| c.len() as u64).sum();
        debug!(
            pack = %pack.pack_path.display(),
            written = batch.len(),
            waiting = self.waiting.len(),
            bytes,
            "ingested pack"
        );
        Ok((batch.len() as u64, bytes))
    }

    fn offer(&mut self, chunk: Chunk, batch: &mut Vec<Chunk>) -> PullResult<()> {
        let address = chunk.address();
        if !self.unwritten.contains(&address) || self.waiting.contains_key(&address) {
            return Ok(());
        }
        let blockers: HashSet<Address> = self
            .walker
            .walk_refs(&chunk)?
            .into_iter()
            .filter(|r| self.unwritten.contains(r))
            .collect();
        if blockers.is_empty() {
            self.release(chunk, batch);
        } else {
            for blocker in &blockers {
                self.dependents.entry(*blocker).or_default().push(address);
            }
            self.waiting.insert(address, (chunk, blockers.len()));
        }
        Ok(())
    }

    /// Queue `chunk` and everything that was waiting only on it. `batch` is
    /// written in order, so a chunk may follow its refs in the same batch.
    fn release(&mut self, chunk: Chunk, batch: &mut Vec<Chunk>) {
        let mut ready = vec![chunk];
        while let Some(chunk) = ready.pop() {
            let address = chunk.address();
            self.unwritten.remove(&address);
            batch.push(chunk);
            for dependent in self.dependents.remove(&address).unwrap_or_default() {
                let Some((_, remaining)) = self.waiting.get_mut(&dependent) else {
                    continue;
                };
                *remaining -= 1;
                if *remaining == 0 {
                    if let Some((unblocked, _)) = self.waiting.remove(&dependent) {
                        ready.push(unblocked);
                    }
                }
            }
        }
    }

    /// Every staged chunk must have been written once all packs arrived.
    fn finish(self) -> PullResult<()> {
        match self.dependents.into_keys().next() {
            Some(address) => Err(PullError::MissingChunk(address)),
            None => Ok(()),
        }
    }
}

fn discard(pack: &PackFile) {
    for path in [&pack.pack_path, &pack.index_path] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not remove staged pack");
            }
        }
    }
}
