//! Chunk replication between Strand stores.
//!
//! A [`Puller`] copies the minimal set of chunks needed to make a set of
//! wanted addresses (and everything they reference) present in a sink.
//! Fetching runs on a bounded pool of tokio tasks, fetched chunks are
//! hash-verified and staged in [`strand_pack`] files. Once the traversal
//! succeeds, a separate ingest task writes the sealed packs into the sink,
//! each chunk after the chunks it references, so an interrupted pull never
//! leaves a chunk whose subgraph is incomplete. Progress is published as
//! [`Stats`] snapshots on an mpsc channel.

pub mod config;
pub mod error;
mod ingest;
pub mod puller;
pub mod stats;

pub use config::{PruneMode, PullerConfig};
pub use error::{PullError, PullResult};
pub use puller::Puller;
pub use stats::{PullProgress, Stats};
