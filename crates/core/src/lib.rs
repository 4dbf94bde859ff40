//! # smallworld-core
//!
//! In-memory approximate nearest neighbor engine built on the Hierarchical
//! Navigable Small World (HNSW) graph, over fixed-dimension f32 vectors
//! under squared Euclidean distance.
//!
//! The index is safe to share across threads: inserts and searches
//! coordinate through a readers/writer lock over the node store, and the
//! [`pool`] module provides channel-fed worker pools for bulk builds and
//! query batches. Snapshots round-trip the whole graph through a pair of
//! checksummed files.
//!
//! ```no_run
//! use smallworld_core::HnswIndex;
//!
//! # fn main() -> smallworld_core::Result<()> {
//! let index = HnswIndex::new(16, 16, 32, 200, 4);
//! index.insert(vec![0.1, 0.2, 0.3, 0.4])?;
//! let hits = index.search(&[0.1, 0.2, 0.3, 0.4], 10, 50)?;
//! # Ok(())
//! # }
//! ```

/// Tuning defaults and sizing constants.
pub mod config;
/// Squared Euclidean distance kernel with SIMD dispatch.
pub mod distance;
/// Error types.
pub mod error;
/// The HNSW graph: structure, insertion, search.
pub mod hnsw;
/// Channel-fed worker pools for concurrent inserts and queries.
pub mod pool;
/// Min/max priority queues over scored nodes.
pub mod queue;
/// Two-file snapshot codec.
pub mod snapshot;

pub use error::{HnswError, Result};
pub use hnsw::{EntryPoint, HnswIndex, HnswParams, IndexStats, Node};
pub use pool::{SearchJob, SearchOutput, WorkerPool};
pub use queue::{MaxQueue, MinQueue, Neighbour};
