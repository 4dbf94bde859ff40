//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor
//! index.
//!
//! A multi-layer proximity graph: sparse long-range links on the upper
//! layers route a query close to its target, and the dense bottom layer is
//! swept with a bounded beam search. Inserts and searches share the graph
//! through a readers/writer lock, so a single index can be driven by many
//! worker threads at once.
//!
//! Reference: Malkov & Yashunin (2016), "Efficient and robust approximate
//! nearest neighbor search using Hierarchical Navigable Small World
//! graphs".

/// Graph structure: parameters, nodes, store, entry point, stats.
pub mod graph;
/// Insertion with bidirectional linking and capacity-bounded pruning.
pub mod insert;
/// Beam search, k-NN queries, and the brute-force oracle.
pub mod search;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use graph::{EntryPoint, HnswIndex, HnswParams, IndexStats, Node, NodeStore};
