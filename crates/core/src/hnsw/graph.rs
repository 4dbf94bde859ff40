//! HNSW graph structure: tuning parameters, nodes, and the shared store.
//!
//! [`HnswParams`] defines the engine-wide tuning knobs (M, caps, ef,
//! level-sampling scale, neighbor-selection strategy). [`NodeStore`] is the
//! append-only node array behind a readers/writer lock; [`HnswIndex`] ties
//! the two together with the entry-point state.

use crate::config;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

/// Engine-wide tuning parameters, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Target number of bidirectional links per node on levels above 0.
    pub m: usize,
    /// Hard cap on links per node for levels above 0 (typically `m`).
    pub m_max: usize,
    /// Hard cap on links per node at level 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during insertion.
    pub ef_construction: usize,
    /// Level-sampling scale, `1 / ln(m)`.
    ///
    /// Keeps the expected overlap between consecutive layers small, which
    /// bounds the average hop count of the greedy descent.
    pub ml: f64,
    /// Selects the diversity heuristic for forward-link selection; when
    /// false, plain nearest-M selection is used instead.
    pub heuristic: bool,
    /// Vector dimension. Immutable for the lifetime of the index.
    pub dim: usize,
}

impl HnswParams {
    /// Parameters with defaults from [`config`] for the given dimension.
    pub fn with_defaults(dim: usize) -> Self {
        Self::new(
            config::HNSW_DEFAULT_M,
            config::HNSW_DEFAULT_MMAX,
            config::HNSW_DEFAULT_MMAX0,
            config::HNSW_DEFAULT_EF_CONSTRUCTION,
            dim,
        )
    }

    pub fn new(m: usize, m_max: usize, m_max0: usize, ef_construction: usize, dim: usize) -> Self {
        assert!(m >= 2, "m must be at least 2");
        assert!(dim > 0, "dimension must be > 0");
        Self {
            m,
            m_max,
            m_max0,
            ef_construction,
            ml: 1.0 / (m as f64).ln(),
            heuristic: true,
            dim,
        }
    }

    /// Link cap for the given level.
    #[inline]
    pub fn cap_at(&self, level: usize) -> usize {
        if level == 0 {
            self.m_max0
        } else {
            self.m_max
        }
    }
}

/// A single graph node: its vector, top layer, and per-level adjacency.
///
/// `connections` always has exactly `layer + 1` entries; the node
/// participates in levels `0..=layer` and nothing above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub layer: u16,
    pub vector: Vec<f32>,
    pub connections: Vec<Vec<u32>>,
}

impl Node {
    /// Out-edges of this node at `level`.
    ///
    /// Callers must not ask for a level above the node's layer; that is a
    /// traversal bug, not a data condition.
    #[inline]
    pub fn connections(&self, level: usize) -> &[u32] {
        assert!(
            level <= self.layer as usize,
            "level {level} above node layer {}",
            self.layer
        );
        &self.connections[level]
    }
}

/// Append-only node array behind a readers/writer lock.
///
/// Ids are dense and equal to the node's position; once assigned they never
/// change and nodes are never removed. Writers hold the lock exclusively
/// during append and adjacency edits; readers share it during distance
/// probing.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: RwLock<Vec<Node>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Append a node, returning its id (the store length before the append).
    pub fn append(&self, vector: Vec<f32>, layer: u16) -> u32 {
        let mut nodes = self.nodes.write();
        let id = nodes.len() as u32;
        nodes.push(Node {
            id,
            layer,
            vector,
            connections: vec![Vec::new(); layer as usize + 1],
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.nodes.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<Node>> {
        self.nodes.write()
    }
}

/// The node every search descends from. Its layer always equals the
/// current maximum level of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub node: u32,
    pub level: u16,
}

/// Concurrent HNSW index over fixed-dimension f32 vectors.
///
/// All mutation goes through [`insert`](HnswIndex::insert); nodes are never
/// updated or deleted once their id has been returned. Methods take `&self`
/// so an `Arc<HnswIndex>` can be shared across worker threads.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) params: HnswParams,
    pub(crate) store: NodeStore,
    pub(crate) entry: RwLock<Option<EntryPoint>>,
}

/// A point-in-time summary of the index shape.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub m: usize,
    pub m_max: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ml: f64,
    pub heuristic: bool,
    pub ep: Option<u32>,
    pub max_level: u16,
    pub node_count: usize,
    /// Node count per level, indexed by level.
    pub nodes_per_level: Vec<usize>,
    /// Directed edge count per level, indexed by level.
    pub edges_per_level: Vec<usize>,
}

impl HnswIndex {
    /// Create an empty index.
    ///
    /// The first inserted vector becomes the entry point; searching an
    /// empty index returns no results.
    pub fn new(m: usize, m_max: usize, m_max0: usize, ef_construction: usize, dim: usize) -> Self {
        Self::with_params(HnswParams::new(m, m_max, m_max0, ef_construction, dim))
    }

    /// Create an empty index with default parameters for `dim`.
    pub fn with_defaults(dim: usize) -> Self {
        Self::with_params(HnswParams::with_defaults(dim))
    }

    pub fn with_params(params: HnswParams) -> Self {
        Self {
            params,
            store: NodeStore::new(),
            entry: RwLock::new(None),
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Toggle the neighbor-selection heuristic. Affects subsequent inserts
    /// only, so flip it before building the graph.
    pub fn set_heuristic(&mut self, heuristic: bool) {
        self.params.heuristic = heuristic;
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Current entry point, if any vector has been inserted.
    pub fn entry_point(&self) -> Option<EntryPoint> {
        *self.entry.read()
    }

    /// Snapshot a node by id. Intended for inspection and tests.
    ///
    /// # Panics
    /// Panics if `id` is out of bounds.
    pub fn node(&self, id: u32) -> Node {
        self.store.read()[id as usize].clone()
    }

    /// Sample a level from the geometric-like distribution `⌊−ln(u)·mL⌋`.
    ///
    /// `u` is drawn from (0, 1]; `1 - random::<f64>()` maps the standard
    /// [0, 1) range away from the `ln(0)` pole.
    pub(crate) fn sample_level(&self) -> u16 {
        let u: f64 = 1.0 - rand::random::<f64>();
        (-u.ln() * self.params.ml).floor() as u16
    }

    /// Summarize parameters and per-level occupancy.
    pub fn stats(&self) -> IndexStats {
        let nodes = self.store.read();
        let entry = *self.entry.read();
        let max_level = entry.map_or(0, |e| e.level);
        // Size the histograms by the tallest node actually stored; a
        // concurrent insert may have appended above the entry snapshot.
        let top_layer = nodes.iter().map(|n| n.layer).max().unwrap_or(0);
        let levels = max_level.max(top_layer) as usize + 1;
        let mut nodes_per_level = vec![0usize; levels];
        let mut edges_per_level = vec![0usize; levels];
        for node in nodes.iter() {
            nodes_per_level[node.layer as usize] += 1;
            for (level, links) in node.connections.iter().enumerate() {
                edges_per_level[level] += links.len();
            }
        }
        IndexStats {
            m: self.params.m,
            m_max: self.params.m_max,
            m_max0: self.params.m_max0,
            ef_construction: self.params.ef_construction,
            ml: self.params.ml,
            heuristic: self.params.heuristic,
            ep: entry.map(|e| e.node),
            max_level,
            node_count: nodes.len(),
            nodes_per_level,
            edges_per_level,
        }
    }
}
