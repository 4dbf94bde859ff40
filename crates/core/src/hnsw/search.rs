//! HNSW search: the beam-search primitive, k-NN queries, and the
//! brute-force oracle.
//!
//! `search_layer` is the inner loop shared by insertion and querying: a
//! min-queue frontier expands the closest unexplored node while a bounded
//! max-queue tracks the `ef` best discoveries. Queries first ride the upper
//! layers down with a single-path greedy descent, then run one beam pass on
//! level 0.

use crate::distance::l2_squared;
use crate::error::{HnswError, Result};
use crate::hnsw::graph::{HnswIndex, Node};
use crate::hnsw::visited::VisitedSet;
use crate::queue::{MaxQueue, MinQueue, Neighbour};

/// Greedy single-path descent across `levels` (iterated highest first).
///
/// At each level the current node is replaced by any strictly closer
/// neighbor until a full scan yields no improvement. Returns the final
/// node and its distance to `q`.
pub(crate) fn greedy_descent(
    nodes: &[Node],
    q: &[f32],
    mut best: Neighbour,
    levels: impl Iterator<Item = usize>,
) -> Neighbour {
    for level in levels {
        let mut changed = true;
        while changed {
            changed = false;
            for &candidate in nodes[best.id as usize].connections(level) {
                let d = l2_squared(q, &nodes[candidate as usize].vector);
                if d < best.distance {
                    best = Neighbour {
                        id: candidate,
                        distance: d,
                    };
                    changed = true;
                }
            }
        }
    }
    best
}

/// Beam search over a single level.
///
/// Expands from `entry` with beam width `ef` and returns a max-queue of at
/// most `ef` discovered nodes. Every node is visited at most once and every
/// frontier push is preceded by a visited mark, which guarantees
/// termination.
pub(crate) fn search_layer(
    nodes: &[Node],
    q: &[f32],
    entry: Neighbour,
    ef: usize,
    level: usize,
    visited: &mut VisitedSet,
) -> MaxQueue {
    visited.prepare(nodes.len());
    visited.insert(entry.id);

    let mut frontier = MinQueue::with_capacity(ef * 2);
    let mut best = MaxQueue::with_capacity(ef + 1);
    frontier.push(entry);
    best.push(entry);

    while let Some(candidate) = frontier.pop() {
        if best.len() >= ef {
            let worst = best.top().map_or(f32::INFINITY, |n| n.distance);
            if candidate.distance > worst {
                break;
            }
        }

        for &id in nodes[candidate.id as usize].connections(level) {
            if !visited.insert(id) {
                continue;
            }
            let discovered = Neighbour {
                id,
                distance: l2_squared(q, &nodes[id as usize].vector),
            };
            if best.len() < ef {
                best.push(discovered);
                frontier.push(discovered);
            } else {
                let worst = best.top().map_or(f32::INFINITY, |n| n.distance);
                if discovered.distance < worst {
                    best.push(discovered);
                    best.pop();
                    frontier.push(discovered);
                }
            }
        }
    }

    best
}

impl HnswIndex {
    /// k-NN query: up to `k` nodes ordered by ascending distance.
    ///
    /// `ef_search` is the beam width on level 0 and should be at least `k`
    /// (it is clamped up to `k` otherwise). An empty index yields an empty
    /// result, not an error.
    pub fn search(&self, q: &[f32], k: usize, ef_search: usize) -> Result<Vec<Neighbour>> {
        if q.len() != self.params.dim {
            return Err(HnswError::DimensionMismatch {
                expected: self.params.dim,
                got: q.len(),
            });
        }
        let Some(entry) = self.entry_point() else {
            return Ok(Vec::new());
        };

        let nodes = self.store.read();
        let start = Neighbour {
            id: entry.node,
            distance: l2_squared(q, &nodes[entry.node as usize].vector),
        };
        let best = greedy_descent(&nodes, q, start, (1..=entry.level as usize).rev());

        let mut visited = VisitedSet::new(nodes.len());
        let mut found = search_layer(&nodes, q, best, ef_search.max(k), 0, &mut visited);
        while found.len() > k {
            found.pop();
        }
        Ok(found.into_sorted_asc())
    }

    /// Exact k-NN by full scan; the ground-truth oracle for recall checks.
    pub fn brute_search(&self, q: &[f32], k: usize) -> Result<Vec<Neighbour>> {
        if q.len() != self.params.dim {
            return Err(HnswError::DimensionMismatch {
                expected: self.params.dim,
                got: q.len(),
            });
        }

        let nodes = self.store.read();
        let mut best = MaxQueue::with_capacity(k + 1);
        for node in nodes.iter() {
            let d = l2_squared(q, &node.vector);
            if best.len() < k {
                best.push(Neighbour {
                    id: node.id,
                    distance: d,
                });
            } else if best.top().is_some_and(|worst| d < worst.distance) {
                best.push(Neighbour {
                    id: node.id,
                    distance: d,
                });
                best.pop();
            }
        }
        Ok(best.into_sorted_asc())
    }
}
