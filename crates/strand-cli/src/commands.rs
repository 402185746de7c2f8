use std::collections::{BinaryHeap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use strand_commit::{
    find_common_ancestor_with, load_commit, load_tag, Commit, ParentClosure,
};
use strand_pull::{Puller, PullerConfig, Stats};
use strand_store::{
    Blob, ChunkKind, ChunkRefWalker, ClosureKey, ContentStore, FileChunkStore, GhostChunkStore,
    NodeObject,
};
use strand_tree::OrderedMap;
use strand_types::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Pull(args) => cmd_pull(args, format),
        Command::MergeBase(args) => cmd_merge_base(args, format),
        Command::Log(args) => cmd_log(args, format),
        Command::Show(args) => cmd_show(args, format),
    }
}

fn open_store(dir: &Path) -> anyhow::Result<FileChunkStore> {
    FileChunkStore::open(dir).with_context(|| format!("opening store at {}", dir.display()))
}

fn cmd_pull(args: PullArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PullerConfig::load(path)
            .with_context(|| format!("loading puller config {}", path.display()))?,
        None => PullerConfig::default(),
    };
    let from = open_store(&args.from)?;
    let source: Arc<dyn ContentStore> = match &args.ghosts {
        Some(path) => Arc::new(GhostChunkStore::open(from, path)?),
        None => Arc::new(from),
    };
    let sink: Arc<dyn ContentStore> = Arc::new(open_store(&args.to)?);

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(async move {
        let (stats_tx, mut stats_rx) = mpsc::channel::<Stats>(16);
        let puller = Puller::new(
            config,
            source,
            sink,
            Arc::new(ChunkRefWalker),
            args.wants,
            stats_tx,
        )?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let render = tokio::spawn(async move {
            let mut drew = false;
            while let Some(stats) = stats_rx.recv().await {
                if format == OutputFormat::Text {
                    eprint!("\r{}", progress_line(&stats).dimmed());
                    drew = true;
                }
            }
            if drew {
                eprintln!();
            }
        });

        let result = puller.pull(&cancel).await;
        render.await?;
        anyhow::Ok(result?)
    })?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!(
                "{} Pulled {} chunks ({} bytes) into {}",
                "✓".green().bold(),
                stats.chunks_written.to_string().bold(),
                stats.bytes_written,
                args.to.display()
            );
            println!(
                "  fetched {} in {} batches, skipped {}, {} packs, {} retries",
                stats.chunks_fetched,
                stats.fetch_batches,
                stats.chunks_skipped,
                stats.packs_staged,
                stats.fetch_retries
            );
        }
    }
    Ok(())
}

fn progress_line(stats: &Stats) -> String {
    format!(
        "fetched {} ({} bytes), written {}, skipped {}",
        stats.chunks_fetched, stats.bytes_fetched, stats.chunks_written, stats.chunks_skipped
    )
}

fn cmd_merge_base(args: MergeBaseArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store1 = open_store(&args.store)?;
    let store2 = match &args.other {
        Some(dir) => Some(open_store(dir)?),
        None => None,
    };
    let cancel = CancellationToken::new();
    let base = find_common_ancestor_with(
        args.strategy,
        &cancel,
        &args.first,
        &args.second,
        &store1,
        store2.as_ref().unwrap_or(&store1),
    )?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "strategy": args.strategy.name(),
                "base": base.map(|a| a.to_hex()),
            })
        ),
        OutputFormat::Text => match base {
            Some(address) => println!("{}", address.to_hex().yellow()),
            None => println!("{}", "no common ancestor".dimmed()),
        },
    }
    Ok(())
}

/// The commit an address names: the commit itself, or a tag's target.
fn resolve_commit(store: &dyn ContentStore, address: &Address) -> anyhow::Result<Commit> {
    let Some(chunk) = store.get(address)? else {
        bail!("no chunk {address} in store");
    };
    let commit = match chunk.kind() {
        ChunkKind::Commit => load_commit(store, address)?,
        ChunkKind::Tag => load_commit(store, &load_tag(store, address)?.commit())?,
        other => bail!("{address} is a {other}, not a commit or tag"),
    };
    Ok(commit)
}

/// `start` and its ancestors by descending `(height, address)`.
fn history(
    store: &dyn ContentStore,
    start: &Address,
    limit: Option<usize>,
) -> anyhow::Result<Vec<Commit>> {
    let first = resolve_commit(store, start)?;
    let mut heap = BinaryHeap::from([first.closure_key()]);
    let mut seen: HashSet<ClosureKey> = heap.iter().copied().collect();
    let mut out = Vec::new();
    while let Some(key) = heap.pop() {
        if limit.is_some_and(|n| out.len() >= n) {
            break;
        }
        let commit = load_commit(store, &key.address)?;
        for parent in commit.parents() {
            let key = load_commit(store, parent)?.closure_key();
            if seen.insert(key) {
                heap.push(key);
            }
        }
        out.push(commit);
    }
    Ok(out)
}

fn cmd_log(args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let commits = history(&store, &args.address, args.limit)?;
    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = commits.iter().map(commit_json).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for commit in &commits {
                let parents: Vec<String> =
                    commit.parents().iter().map(|p| p.short_hex()).collect();
                let description = commit.meta().map_or("", |m| m.description.as_str());
                println!(
                    "{}  h{:<4} {}  {}",
                    commit.address().short_hex().yellow().bold(),
                    commit.height(),
                    format!("[{}]", parents.join(" ")).dimmed(),
                    description
                );
            }
        }
    }
    Ok(())
}

fn commit_json(commit: &Commit) -> serde_json::Value {
    json!({
        "address": commit.address().to_hex(),
        "height": commit.height(),
        "parents": commit.parents().iter().map(Address::to_hex).collect::<Vec<_>>(),
        "parent_closure": commit.parent_closure().map(|a| a.to_hex()),
        "value": commit.value().to_hex(),
        "description": commit.meta().map(|m| m.description.clone()),
    })
}

fn cmd_show(args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let report = describe(&store, &args.address)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!(
                "{} {}",
                report["kind"].as_str().unwrap_or_default().cyan().bold(),
                args.address.to_hex().yellow()
            );
            if let Some(fields) = report.as_object() {
                for (name, value) in fields.iter().filter(|(k, _)| *k != "kind") {
                    println!("  {name}: {}", plain(value));
                }
            }
        }
    }
    Ok(())
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".into(),
        serde_json::Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Structured description of one chunk.
fn describe(store: &dyn ContentStore, address: &Address) -> anyhow::Result<serde_json::Value> {
    let Some(chunk) = store.get(address)? else {
        bail!("no chunk {address} in store");
    };
    let kind = chunk.kind();
    let report = match kind {
        ChunkKind::Commit => {
            let commit = load_commit(store, address)?;
            let closure = ParentClosure::load(store, &commit)?;
            let mut report = commit_json(&commit);
            report["kind"] = json!(kind.to_string());
            report["ancestors_in_closure"] = json!(closure.len(store)?);
            report
        }
        ChunkKind::Tag => {
            let tag = load_tag(store, address)?;
            json!({
                "kind": kind.to_string(),
                "commit": tag.commit().to_hex(),
                "name": tag.meta().map(|m| m.name.clone()),
                "description": tag.meta().map(|m| m.description.clone()),
            })
        }
        ChunkKind::Closure | ChunkKind::Map | ChunkKind::AddressMap => {
            let node = NodeObject::from_chunk(&chunk)?;
            let map = OrderedMap::from_root(kind, *address);
            json!({
                "kind": kind.to_string(),
                "level": node.level,
                "node_entries": node.len(),
                "tree_entries": map.len(store)?,
                "children": node.children.iter().map(Address::to_hex).collect::<Vec<_>>(),
            })
        }
        ChunkKind::Blob => {
            let blob = Blob::from_chunk(&chunk)?;
            json!({
                "kind": kind.to_string(),
                "bytes": blob.data.len(),
                "text": std::str::from_utf8(&blob.data).ok(),
            })
        }
    };
    Ok(report)
}
