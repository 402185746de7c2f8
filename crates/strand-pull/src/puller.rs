//! The pull coordinator.
//!
//! ```text
//!  wants ──> frontier ──has_many──> missing ──JoinSet(get_many)──> fetched
//!               ^                                                    │
//!               └──────────── unseen refs (RefWalker) <──────────────┤
//!                                                                    v
//!                                                  PackWriter ──> sealed packs
//!                                                                    │
//!                                 traversal done: newest pack first  v
//!                                                      ingest task ──> sink
//! ```
//!
//! The coordinator task owns the seen-set and the frontier; fetch tasks
//! only read from the source and hand chunks back. Nothing reaches the sink
//! until the traversal has succeeded, and the ingest task then writes every
//! chunk after the chunks it references, so a chunk present in the sink
//! always has its whole subgraph present.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use strand_pack::{PackFile, PackWriter};
use strand_store::{Chunk, ContentStore, RefWalker, StoreError};
use strand_types::Address;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PruneMode, PullerConfig};
use crate::error::{PullError, PullResult};
use crate::ingest::ingest_packs;
use crate::stats::{report_stats, PullProgress, Stats};

/// Sealed packs waiting for ingest.
const PACK_QUEUE_DEPTH: usize = 2;

/// Copies every chunk reachable from a set of wanted addresses from one
/// store into another.
///
/// A chunk the sink already holds is taken to carry its whole subgraph
/// (unless [`PruneMode::Verify`] is set), so re-running a pull after a
/// failure or on an up-to-date sink transfers only what is missing.
pub struct Puller {
    config: PullerConfig,
    source: Arc<dyn ContentStore>,
    sink: Arc<dyn ContentStore>,
    walker: Arc<dyn RefWalker>,
    wants: Vec<Address>,
    stats_tx: mpsc::Sender<Stats>,
    progress: Arc<PullProgress>,
}

impl Puller {
    pub fn new(
        config: PullerConfig,
        source: Arc<dyn ContentStore>,
        sink: Arc<dyn ContentStore>,
        walker: Arc<dyn RefWalker>,
        wants: Vec<Address>,
        stats_tx: mpsc::Sender<Stats>,
    ) -> PullResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sink,
            walker,
            wants,
            stats_tx,
            progress: Arc::new(PullProgress::default()),
        })
    }

    /// Shared progress counters, readable while the pull runs.
    pub fn progress(&self) -> Arc<PullProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the pull to completion and return the final stats.
    ///
    /// Snapshots are sent on the stats channel while the pull runs, then one
    /// final snapshot; the sender is dropped before this returns on every
    /// path. The receiver should be drained concurrently.
    pub async fn pull(self, cancel: &CancellationToken) -> PullResult<Stats> {
        let Puller {
            config,
            source,
            sink,
            walker,
            wants,
            stats_tx,
            progress,
        } = self;
        info!(wants = wants.len(), "starting pull");

        let stop_reporter = CancellationToken::new();
        let reporter = tokio::spawn(report_stats(
            Arc::clone(&progress),
            stats_tx.clone(),
            config.stats_interval(),
            stop_reporter.clone(),
        ));

        let outcome = run_pull(&config, source, sink, walker, wants, &progress, cancel).await;

        stop_reporter.cancel();
        let reported = reporter.await;
        let stats = progress.snapshot();
        // The receiver may be gone; the pull's outcome does not depend on it.
        let _ = stats_tx.send(stats).await;
        drop(stats_tx);
        reported?;

        match &outcome {
            Ok(()) => info!(
                fetched = stats.chunks_fetched,
                skipped = stats.chunks_skipped,
                written = stats.chunks_written,
                packs = stats.packs_staged,
                "pull finished"
            ),
            Err(e) => warn!(error = %e, "pull failed"),
        }
        outcome.map(|()| stats)
    }
}

async fn run_pull(
    config: &PullerConfig,
    source: Arc<dyn ContentStore>,
    sink: Arc<dyn ContentStore>,
    walker: Arc<dyn RefWalker>,
    wants: Vec<Address>,
    progress: &Arc<PullProgress>,
    cancel: &CancellationToken,
) -> PullResult<()> {
    std::fs::create_dir_all(&config.tmp_dir)?;
    // Dropped on every path, taking any leftover staging files with it.
    let staging = tempfile::Builder::new()
        .prefix("strand-pull-")
        .tempdir_in(&config.tmp_dir)?;

    let mut coordinator = Coordinator {
        config,
        source,
        sink: Arc::clone(&sink),
        walker: Arc::clone(&walker),
        progress: Arc::clone(progress),
        staging: staging.path().to_path_buf(),
        seen: HashSet::new(),
        frontier: VecDeque::new(),
        writer: None,
        packs: 0,
        staged: HashSet::new(),
        sealed: Vec::new(),
    };
    coordinator.run(wants, cancel).await?;
    let Coordinator { staged, sealed, .. } = coordinator;

    let abort = CancellationToken::new();
    let (pack_tx, pack_rx) = mpsc::channel(PACK_QUEUE_DEPTH);
    let ingest = {
        let progress = Arc::clone(progress);
        let abort = abort.clone();
        tokio::task::spawn_blocking(move || {
            ingest_packs(sink, walker, staged, pack_rx, progress, abort)
        })
    };
    let published = publish(sealed, cancel, &pack_tx, &abort).await;
    if published.is_err() {
        abort.cancel();
    }
    drop(pack_tx);
    let ingested = ingest.await.map_err(PullError::from).and_then(|r| r);
    published.and(ingested)
}

/// Hand sealed packs to the ingest task, newest first.
///
/// A chunk is staged after the chunk that led the traversal to it, so the
/// newest packs hold the deepest chunks.
async fn publish(
    sealed: Vec<PackFile>,
    cancel: &CancellationToken,
    pack_tx: &mpsc::Sender<PackFile>,
    abort: &CancellationToken,
) -> PullResult<()> {
    for pack in sealed.into_iter().rev() {
        if abort.is_cancelled() {
            // The ingest task reports its own error.
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PullError::Cancelled),
            sent = pack_tx.send(pack) => sent.map_err(|_| PullError::WorkerPanic)?,
        }
    }
    Ok(())
}

/// A chunk fetched from the source together with the addresses it embeds.
struct Fetched {
    address: Address,
    chunk: Chunk,
    refs: Vec<Address>,
}

struct Coordinator<'a> {
    config: &'a PullerConfig,
    source: Arc<dyn ContentStore>,
    sink: Arc<dyn ContentStore>,
    walker: Arc<dyn RefWalker>,
    progress: Arc<PullProgress>,
    staging: PathBuf,
    seen: HashSet<Address>,
    frontier: VecDeque<Address>,
    writer: Option<PackWriter>,
    packs: u64,
    /// Every address written to a staging pack.
    staged: HashSet<Address>,
    sealed: Vec<PackFile>,
}

impl Coordinator<'_> {
    async fn run(
        &mut self,
        wants: Vec<Address>,
        cancel: &CancellationToken,
    ) -> PullResult<()> {
        self.enqueue(wants);
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight: JoinSet<PullResult<Vec<Fetched>>> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                return Err(PullError::Cancelled);
            }

            while !self.frontier.is_empty() {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    break;
                };
                let batch = self.next_batch();
                let missing = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PullError::Cancelled),
                    missing = self.prune(batch) => missing?,
                };
                if missing.is_empty() {
                    continue;
                }
                in_flight.spawn(fetch_batch(
                    Arc::clone(&self.source),
                    Arc::clone(&self.walker),
                    missing,
                    self.config.clone(),
                    Arc::clone(&self.progress),
                    permit,
                ));
            }

            if in_flight.is_empty() {
                break;
            }
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    in_flight.abort_all();
                    return Err(PullError::Cancelled);
                }
                joined = in_flight.join_next() => joined,
            };
            let Some(joined) = joined else {
                continue;
            };
            for fetched in joined?? {
                self.stage(fetched.address, &fetched.chunk).await?;
                self.enqueue(fetched.refs);
            }
        }

        self.seal().await
    }

    fn enqueue(&mut self, addresses: impl IntoIterator<Item = Address>) {
        for address in addresses {
            if !address.is_empty() && self.seen.insert(address) {
                self.frontier.push_back(address);
            }
        }
    }

    fn next_batch(&mut self) -> Vec<Address> {
        let n = self.frontier.len().min(self.config.fetch_batch_size);
        self.frontier.drain(..n).collect()
    }

    /// Drop the addresses the sink already has, returning the rest.
    async fn prune(&mut self, batch: Vec<Address>) -> PullResult<Vec<Address>> {
        let sink = Arc::clone(&self.sink);
        let walker = Arc::clone(&self.walker);
        let mode = self.config.prune_mode;
        let (missing, present_refs, skipped) = tokio::task::spawn_blocking(move || {
            let present = sink.has_many(&batch)?;
            let (present_list, missing): (Vec<Address>, Vec<Address>) =
                batch.into_iter().partition(|a| present.contains(a));
            let mut refs = Vec::new();
            if mode == PruneMode::Verify && !present_list.is_empty() {
                for chunk in sink.get_many(&present_list)?.values() {
                    refs.extend(walker.walk_refs(chunk)?);
                }
            }
            Ok::<_, StoreError>((missing, refs, present_list.len() as u64))
        })
        .await??;
        self.progress.record_skipped(skipped);
        self.enqueue(present_refs);
        Ok(missing)
    }

    async fn stage(&mut self, address: Address, chunk: &Chunk) -> PullResult<()> {
        let packs = &mut self.packs;
        let staging = &self.staging;
        let writer = self.writer.get_or_insert_with(|| {
            *packs += 1;
            PackWriter::new(&staging.join(format!("stage-{:06}", *packs)))
        });
        writer.add_chunk(chunk)?;
        self.staged.insert(address);
        if writer.raw_bytes() >= self.config.batch_size_limit {
            self.seal().await?;
        }
        Ok(())
    }

    async fn seal(&mut self) -> PullResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        if writer.is_empty() {
            return Ok(());
        }
        let pack = tokio::task::spawn_blocking(move || writer.finish()).await??;
        self.progress.record_pack();
        debug!(chunks = pack.chunk_count, bytes = pack.raw_bytes, "staged pack");
        self.sealed.push(pack);
        Ok(())
    }
}

/// Fetch one batch from the source, verify every chunk and extract its refs.
async fn fetch_batch(
    source: Arc<dyn ContentStore>,
    walker: Arc<dyn RefWalker>,
    addresses: Vec<Address>,
    config: PullerConfig,
    progress: Arc<PullProgress>,
    _permit: OwnedSemaphorePermit,
) -> PullResult<Vec<Fetched>> {
    let mut attempt = 0;
    let found = loop {
        let src = Arc::clone(&source);
        let request = addresses.clone();
        match tokio::task::spawn_blocking(move || src.get_many(&request)).await? {
            Ok(found) => break found,
            Err(e) if e.is_transient() && attempt < config.max_fetch_retries => {
                attempt += 1;
                progress.record_retry();
                warn!(attempt, batch = addresses.len(), error = %e, "retrying fetch");
                tokio::time::sleep(config.retry_backoff(attempt)).await;
            }
            Err(StoreError::GhostChunk(address)) => {
                return Err(PullError::GhostChunkRequested(address));
            }
            Err(e) => return Err(e.into()),
        }
    };

    let fetched =
        tokio::task::spawn_blocking(move || verify_and_walk(walker.as_ref(), addresses, found))
            .await??;
    let bytes = fetched.iter().map(|f| f.chunk.len() as u64).sum();
    progress.record_fetch(fetched.len() as u64, bytes);
    Ok(fetched)
}

fn verify_and_walk(
    walker: &dyn RefWalker,
    addresses: Vec<Address>,
    mut found: HashMap<Address, Chunk>,
) -> PullResult<Vec<Fetched>> {
    let mut out = Vec::with_capacity(addresses.len());
    for address in addresses {
        let chunk = found.remove(&address).ok_or(PullError::MissingChunk(address))?;
        let chunk = Chunk::verified(address, chunk.data().clone()).map_err(|e| match e {
            StoreError::HashMismatch { .. } | StoreError::UnknownFileId(_) => {
                PullError::Corrupt { address }
            }
            other => other.into(),
        })?;
        let refs = walker.walk_refs(&chunk)?;
        debug!(address = %address.short_hex(), kind = %chunk.kind(), refs = refs.len(), "fetched chunk");
        out.push(Fetched {
            address,
            chunk,
            refs,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strand_commit::write_commit;
    use strand_store::{ChunkKind, ChunkRefWalker, GhostChunkStore, InMemoryChunkStore, StoreResult};
    use strand_tree::{apply_edits, Edit, OrderedMap, VecEditProvider};

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn row(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn table(store: &dyn ContentStore, rows: std::ops::Range<u32>, tag: &str) -> OrderedMap {
        let entries = rows.map(|i| (row(i), format!("{tag}-{i}").into_bytes()));
        OrderedMap::from_sorted_entries(store, ChunkKind::Map, entries).unwrap()
    }

    fn edit(store: &dyn ContentStore, map: &OrderedMap, edits: Vec<Edit>) -> OrderedMap {
        let mut provider = VecEditProvider::new(edits);
        apply_edits(store, map, &mut provider).unwrap().0
    }

    /// Commit a database root: an address map from table name to table root.
    fn commit_tables(
        store: &dyn ContentStore,
        tables: &BTreeMap<&'static str, OrderedMap>,
        parent: Option<Address>,
    ) -> Address {
        let root = OrderedMap::from_sorted_entries(
            store,
            ChunkKind::AddressMap,
            tables
                .iter()
                .map(|(name, t)| (name.as_bytes().to_vec(), t.root().as_bytes().to_vec())),
        )
        .unwrap();
        let parents: Vec<Address> = parent.into_iter().collect();
        write_commit(store, root.root(), &parents, None).unwrap()
    }

    struct History {
        source: Arc<InMemoryChunkStore>,
        commits: Vec<Address>,
        /// Root of the table added in the fifth commit.
        second_table: Address,
    }

    fn history() -> History {
        let source = Arc::new(InMemoryChunkStore::new());
        let s: &dyn ContentStore = source.as_ref();
        let mut tables = BTreeMap::new();
        let mut commits: Vec<Address> = Vec::new();
        let record = |tables: &BTreeMap<_, _>, commits: &mut Vec<Address>| {
            let c = commit_tables(s, tables, commits.last().copied());
            commits.push(c);
        };

        tables.insert("t1", table(s, 0..100, "v1"));
        record(&tables, &mut commits);

        let adds = (100..150).map(|i| Edit::put(row(i), "added")).collect();
        tables.insert("t1", edit(s, &tables["t1"], adds));
        record(&tables, &mut commits);

        let updates = (0..20).map(|i| Edit::put(row(i), "v2")).collect();
        tables.insert("t1", edit(s, &tables["t1"], updates));
        record(&tables, &mut commits);

        let deletes = (50..80).map(|i| Edit::delete(row(i))).collect();
        tables.insert("t1", edit(s, &tables["t1"], deletes));
        record(&tables, &mut commits);

        let t2 = table(s, 0..40, "t2");
        tables.insert("t2", t2);
        record(&tables, &mut commits);

        tables.remove("t1");
        record(&tables, &mut commits);

        tables.insert("t3", table(s, 0..20_000, "big"));
        record(&tables, &mut commits);

        History {
            source,
            commits,
            second_table: t2.root(),
        }
    }

    /// Walk everything reachable from `root` in `sink`, checking each chunk
    /// matches the source. Returns the number of chunks reached.
    fn assert_copied(source: &dyn ContentStore, sink: &dyn ContentStore, root: Address) -> usize {
        let mut seen = HashSet::from([root]);
        let mut queue = vec![root];
        while let Some(address) = queue.pop() {
            let chunk = sink
                .get(&address)
                .unwrap()
                .unwrap_or_else(|| panic!("sink is missing {address}"));
            assert_eq!(Some(&chunk), source.get(&address).unwrap().as_ref());
            for r in ChunkRefWalker.walk_refs(&chunk).unwrap() {
                if seen.insert(r) {
                    queue.push(r);
                }
            }
        }
        seen.len()
    }

    /// Every chunk in the sink has all of its refs in the sink too.
    fn assert_closed(sink: &InMemoryChunkStore) {
        for address in sink.all_addresses() {
            let chunk = sink.get(&address).unwrap().unwrap();
            for r in ChunkRefWalker.walk_refs(&chunk).unwrap() {
                if !r.is_empty() {
                    assert!(sink.has(&r).unwrap(), "{address} is present without {r}");
                }
            }
        }
    }

    /// Config that stages one chunk per pack and fetches one at a time.
    fn one_at_a_time(dir: &tempfile::TempDir) -> PullerConfig {
        PullerConfig {
            batch_size_limit: 1,
            fetch_batch_size: 1,
            concurrency: 1,
            ..config(dir)
        }
    }

    fn config(dir: &tempfile::TempDir) -> PullerConfig {
        PullerConfig {
            stats_interval_ms: 5,
            ..PullerConfig::with_tmp_dir(dir.path())
        }
    }

    async fn pull_with(
        config: PullerConfig,
        source: Arc<dyn ContentStore>,
        sink: Arc<dyn ContentStore>,
        wants: Vec<Address>,
        cancel: CancellationToken,
    ) -> (PullResult<Stats>, Vec<Stats>) {
        let (tx, mut rx) = mpsc::channel(8);
        let drain = tokio::spawn(async move {
            let mut snapshots = Vec::new();
            while let Some(s) = rx.recv().await {
                snapshots.push(s);
            }
            snapshots
        });
        let puller = Puller::new(config, source, sink, Arc::new(ChunkRefWalker), wants, tx).unwrap();
        let result = puller.pull(&cancel).await;
        // Completes only once the sender side is closed.
        let snapshots = drain.await.unwrap();
        (result, snapshots)
    }

    async fn pull(
        config: PullerConfig,
        source: Arc<dyn ContentStore>,
        sink: Arc<dyn ContentStore>,
        wants: Vec<Address>,
    ) -> (PullResult<Stats>, Vec<Stats>) {
        pull_with(config, source, sink, wants, CancellationToken::new()).await
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn every_historical_root_round_trips() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        for commit in &h.commits {
            let sink = Arc::new(InMemoryChunkStore::new());
            let (result, snapshots) =
                pull(config(&dir), h.source.clone(), sink.clone(), vec![*commit]).await;
            let stats = result.unwrap();

            let reachable = assert_copied(h.source.as_ref(), sink.as_ref(), *commit);
            assert_eq!(stats.chunks_fetched as usize, reachable);
            assert_eq!(stats.chunks_written, stats.chunks_fetched);
            assert_eq!(stats.bytes_written, stats.bytes_fetched);
            assert_eq!(sink.len(), reachable);
            assert_eq!(snapshots.last(), Some(&stats));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn incremental_pulls_fetch_only_new_chunks() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(InMemoryChunkStore::new());
        let mut total = 0;
        for (i, commit) in h.commits.iter().enumerate() {
            let (result, _) = pull(config(&dir), h.source.clone(), sink.clone(), vec![*commit]).await;
            let stats = result.unwrap();
            total += stats.chunks_fetched as usize;
            let reachable = assert_copied(h.source.as_ref(), sink.as_ref(), *commit);
            if i > 0 {
                assert!((stats.chunks_fetched as usize) < reachable);
                assert!(stats.chunks_skipped > 0);
            }
        }
        assert_eq!(sink.len(), total);
    }

    #[tokio::test]
    async fn second_pull_is_a_no_op() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(InMemoryChunkStore::new());
        let tip = *h.commits.last().unwrap();
        pull(config(&dir), h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        let writes = sink.put_count();

        let (result, _) = pull(config(&dir), h.source.clone(), sink.clone(), vec![tip]).await;
        let stats = result.unwrap();
        assert_eq!(stats.chunks_fetched, 0);
        assert_eq!(stats.chunks_skipped, 1);
        assert_eq!(stats.chunks_written, 0);
        assert_eq!(sink.put_count(), writes);
    }

    #[tokio::test]
    async fn small_packs_are_sealed_as_they_fill() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(InMemoryChunkStore::new());
        let config = PullerConfig {
            batch_size_limit: 4 * 1024,
            fetch_batch_size: 16,
            ..config(&dir)
        };
        let tip = *h.commits.last().unwrap();
        let stats = pull(config, h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        assert!(stats.packs_staged > 1);
        assert_copied(h.source.as_ref(), sink.as_ref(), tip);
    }

    #[tokio::test]
    async fn verify_mode_fills_holes_below_present_chunks() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let tip = *h.commits.last().unwrap();

        // The sink has the commit chunk but nothing beneath it.
        let sink = Arc::new(InMemoryChunkStore::new());
        sink.put(&h.source.get(&tip).unwrap().unwrap()).unwrap();

        let trusting = pull(config(&dir), h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        assert_eq!(trusting.chunks_fetched, 0);

        let verifying = PullerConfig {
            prune_mode: PruneMode::Verify,
            ..config(&dir)
        };
        let stats = pull(verifying, h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        assert!(stats.chunks_fetched > 0);
        assert_copied(h.source.as_ref(), sink.as_ref(), tip);
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ghost_chunk_fails_the_pull() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let ghosted = Arc::new(GhostChunkStore::new(h.source.clone()));
        ghosted.persist_ghosts(&[h.second_table]).unwrap();

        let sink = Arc::new(InMemoryChunkStore::new());
        let (result, _) = pull(one_at_a_time(&dir), ghosted, sink.clone(), vec![h.commits[4]]).await;
        assert!(matches!(
            result,
            Err(PullError::GhostChunkRequested(a)) if a == h.second_table
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_closed(&sink);

        let (result, _) = pull(config(&dir), h.source.clone(), sink.clone(), vec![h.commits[4]]).await;
        result.unwrap();
        assert_copied(h.source.as_ref(), sink.as_ref(), h.commits[4]);
    }

    #[tokio::test]
    async fn cancellation_stops_the_pull() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Arc::new(InMemoryChunkStore::new());
        let (result, snapshots) = pull_with(
            config(&dir),
            h.source.clone(),
            sink.clone(),
            vec![*h.commits.last().unwrap()],
            cancel,
        )
        .await;
        assert!(matches!(result, Err(PullError::Cancelled)));
        assert!(!snapshots.is_empty());
        assert!(sink.is_empty());
    }

    /// Serves `healthy_calls` batch reads, then either fails every read or
    /// fires `cancel` and keeps serving.
    struct TrippingStore {
        inner: Arc<InMemoryChunkStore>,
        calls: AtomicU32,
        healthy_calls: u32,
        cancel: Option<CancellationToken>,
    }

    impl TrippingStore {
        fn new(inner: Arc<InMemoryChunkStore>, healthy_calls: u32) -> Self {
            Self {
                inner,
                calls: AtomicU32::new(0),
                healthy_calls,
                cancel: None,
            }
        }
    }

    impl ContentStore for TrippingStore {
        fn get(&self, a: &Address) -> StoreResult<Option<Chunk>> {
            self.inner.get(a)
        }
        fn put(&self, c: &Chunk) -> StoreResult<Address> {
            self.inner.put(c)
        }
        fn has(&self, a: &Address) -> StoreResult<bool> {
            self.inner.has(a)
        }
        fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
                match &self.cancel {
                    Some(cancel) => cancel.cancel(),
                    None => {
                        return Err(StoreError::CorruptChunk {
                            address: addresses[0],
                            reason: "unreadable".into(),
                        })
                    }
                }
            }
            self.inner.get_many(addresses)
        }
    }

    #[tokio::test]
    async fn failed_pull_leaves_nothing_to_skip_over() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let tip = *h.commits.last().unwrap();
        let sink = Arc::new(InMemoryChunkStore::new());

        let failing = Arc::new(TrippingStore::new(h.source.clone(), 2));
        let (result, _) = pull(one_at_a_time(&dir), failing, sink.clone(), vec![tip]).await;
        assert!(matches!(result, Err(PullError::Store(StoreError::CorruptChunk { .. }))));
        assert!(!sink.has(&tip).unwrap());
        assert_closed(&sink);

        let stats = pull(config(&dir), h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        assert!(stats.chunks_fetched > 0);
        assert_copied(h.source.as_ref(), sink.as_ref(), tip);
    }

    #[tokio::test]
    async fn cancelled_mid_traversal_resumes_cleanly() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let tip = *h.commits.last().unwrap();
        let cancel = CancellationToken::new();
        let tripping = Arc::new(TrippingStore {
            cancel: Some(cancel.clone()),
            ..TrippingStore::new(h.source.clone(), 20)
        });
        let sink = Arc::new(InMemoryChunkStore::new());

        let (result, _) = pull_with(one_at_a_time(&dir), tripping, sink.clone(), vec![tip], cancel).await;
        assert!(matches!(result, Err(PullError::Cancelled)));
        assert_closed(&sink);

        pull(config(&dir), h.source.clone(), sink.clone(), vec![tip]).await.0.unwrap();
        assert_copied(h.source.as_ref(), sink.as_ref(), tip);
    }

    /// Fires `cancel` on its first write.
    struct CancellingSink {
        inner: Arc<InMemoryChunkStore>,
        cancel: CancellationToken,
    }

    impl ContentStore for CancellingSink {
        fn get(&self, a: &Address) -> StoreResult<Option<Chunk>> {
            self.inner.get(a)
        }
        fn put(&self, c: &Chunk) -> StoreResult<Address> {
            self.cancel.cancel();
            self.inner.put(c)
        }
        fn has(&self, a: &Address) -> StoreResult<bool> {
            self.inner.has(a)
        }
    }

    #[tokio::test]
    async fn cancelled_during_ingest_keeps_sink_closed() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let tip = *h.commits.last().unwrap();
        let cancel = CancellationToken::new();
        let written = Arc::new(InMemoryChunkStore::new());
        let sink = Arc::new(CancellingSink {
            inner: written.clone(),
            cancel: cancel.clone(),
        });

        let (result, _) = pull_with(one_at_a_time(&dir), h.source.clone(), sink, vec![tip], cancel).await;
        assert!(matches!(result, Err(PullError::Cancelled)));
        assert!(!written.is_empty());
        assert!(!written.has(&tip).unwrap());
        assert_closed(&written);

        pull(config(&dir), h.source.clone(), written.clone(), vec![tip]).await.0.unwrap();
        assert_copied(h.source.as_ref(), written.as_ref(), tip);
    }

    #[tokio::test]
    async fn missing_source_chunk_is_data_loss() {
        let source = Arc::new(InMemoryChunkStore::new());
        let dangling = Address::of(b"never stored");
        let commit = write_commit(source.as_ref(), dangling, &[], None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (result, _) = pull(
            config(&dir),
            source,
            Arc::new(InMemoryChunkStore::new()),
            vec![commit],
        )
        .await;
        assert!(matches!(result, Err(PullError::MissingChunk(a)) if a == dangling));
    }

    /// Serves the wrong bytes for one address.
    struct LyingStore {
        inner: Arc<InMemoryChunkStore>,
        target: Address,
    }

    impl ContentStore for LyingStore {
        fn get(&self, a: &Address) -> StoreResult<Option<Chunk>> {
            self.inner.get(a)
        }
        fn put(&self, c: &Chunk) -> StoreResult<Address> {
            self.inner.put(c)
        }
        fn has(&self, a: &Address) -> StoreResult<bool> {
            self.inner.has(a)
        }
        fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
            let mut found = self.inner.get_many(addresses)?;
            if found.contains_key(&self.target) {
                found.insert(self.target, strand_store::Blob::new(b"forged".to_vec()).to_chunk());
            }
            Ok(found)
        }
    }

    #[tokio::test]
    async fn forged_chunk_is_corrupt() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let lying = Arc::new(LyingStore {
            inner: h.source.clone(),
            target: h.second_table,
        });
        let (result, _) = pull(
            config(&dir),
            lying,
            Arc::new(InMemoryChunkStore::new()),
            vec![h.commits[4]],
        )
        .await;
        assert!(matches!(result, Err(PullError::Corrupt { address }) if address == h.second_table));
    }

    /// Fails the first `failures` batch reads with an I/O error.
    struct FlakyStore {
        inner: Arc<InMemoryChunkStore>,
        failures: AtomicU32,
    }

    impl ContentStore for FlakyStore {
        fn get(&self, a: &Address) -> StoreResult<Option<Chunk>> {
            self.inner.get(a)
        }
        fn put(&self, c: &Chunk) -> StoreResult<Address> {
            self.inner.put(c)
        }
        fn has(&self, a: &Address) -> StoreResult<bool> {
            self.inner.has(a)
        }
        fn get_many(&self, addresses: &[Address]) -> StoreResult<HashMap<Address, Chunk>> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StoreError::Io(std::io::Error::other("flaky read")));
            }
            self.inner.get_many(addresses)
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: h.source.clone(),
            failures: AtomicU32::new(2),
        });
        let config = PullerConfig {
            retry_backoff_ms: 1,
            concurrency: 1,
            ..config(&dir)
        };
        let sink = Arc::new(InMemoryChunkStore::new());
        let stats = pull(config, flaky, sink.clone(), vec![h.commits[0]]).await.0.unwrap();
        assert_eq!(stats.fetch_retries, 2);
        assert_copied(h.source.as_ref(), sink.as_ref(), h.commits[0]);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let h = history();
        let dir = tempfile::tempdir().unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: h.source.clone(),
            failures: AtomicU32::new(100),
        });
        let config = PullerConfig {
            retry_backoff_ms: 1,
            max_fetch_retries: 2,
            concurrency: 1,
            ..config(&dir)
        };
        let (result, _) = pull(config, flaky, Arc::new(InMemoryChunkStore::new()), vec![h.commits[0]]).await;
        assert!(matches!(result, Err(PullError::Store(StoreError::Io(_)))));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let config = PullerConfig {
            concurrency: 0,
            ..PullerConfig::default()
        };
        let result = Puller::new(
            config,
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(ChunkRefWalker),
            vec![],
            tx,
        );
        assert!(matches!(result, Err(PullError::Config(_))));
    }
}
