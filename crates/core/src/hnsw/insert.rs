//! HNSW insertion: level sampling, top-down descent, per-level beam
//! search, neighbor selection, and bidirectional linking with
//! capacity-bounded pruning.
//!
//! Inserts interleave three store-lock phases: an exclusive append, a
//! shared read phase for the descent and per-level beams, and an exclusive
//! write phase that publishes the new node's links. Concurrent searchers
//! may observe a node whose links are still being written; every invariant
//! (bidirectionality, degree caps) holds again by the time `insert`
//! returns.

use crate::distance::l2_squared;
use crate::error::{HnswError, Result};
use crate::hnsw::graph::{EntryPoint, HnswIndex, Node};
use crate::hnsw::search::{greedy_descent, search_layer};
use crate::hnsw::visited::VisitedSet;
use crate::queue::{MaxQueue, Neighbour};
use std::cell::RefCell;

thread_local! {
    /// Reused visited set for insert operations; avoids a per-insert
    /// allocation proportional to the store size.
    static INSERT_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

impl HnswIndex {
    /// Insert a vector, returning the new node's id.
    ///
    /// Fails only on a dimension mismatch. Safe to call concurrently from
    /// multiple threads sharing the index.
    pub fn insert(&self, vector: Vec<f32>) -> Result<u32> {
        if vector.len() != self.params.dim {
            return Err(HnswError::DimensionMismatch {
                expected: self.params.dim,
                got: vector.len(),
            });
        }

        let layer = self.sample_level();
        let id = self.store.append(vector, layer);
        let level = layer as usize;

        // First vector: becomes the entry point, no linking to do.
        let (ep, max_level) = {
            let mut entry = self.entry.write();
            match *entry {
                None => {
                    *entry = Some(EntryPoint { node: id, level: layer });
                    return Ok(id);
                }
                Some(e) => (e.node, e.level as usize),
            }
        };

        let top = level.min(max_level);

        // Read phase. The guard is held across the descent and every beam,
        // so the store length (and the visited-set capacity) is fixed here.
        let per_level: Vec<Vec<Neighbour>> = INSERT_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            let guard = self.store.read();
            let nodes: &[Node] = &guard;
            let q: &[f32] = &nodes[id as usize].vector;

            let start = Neighbour {
                id: ep,
                distance: l2_squared(q, &nodes[ep as usize].vector),
            };
            let entry_for_beam = greedy_descent(nodes, q, start, (level + 1..=max_level).rev());

            let mut per_level: Vec<Vec<Neighbour>> = vec![Vec::new(); top + 1];
            for lvl in (0..=top).rev() {
                let found = search_layer(
                    nodes,
                    q,
                    entry_for_beam,
                    self.params.ef_construction,
                    lvl,
                    &mut visited,
                );
                per_level[lvl] = if self.params.heuristic {
                    select_neighbours_heuristic(nodes, found, self.params.m)
                } else {
                    select_neighbours_simple(found, self.params.m)
                };
            }
            per_level
        });

        // Write phase: publish forward links and the reverse edges, then
        // re-prune any neighbor pushed over its cap.
        {
            let mut nodes = self.store.write();
            for (lvl, selected) in per_level.iter().enumerate() {
                nodes[id as usize].connections[lvl] = selected.iter().map(|n| n.id).collect();
                for neighbour in selected {
                    link_back(&mut nodes, neighbour.id, id, lvl, self.params.cap_at(lvl));
                }
            }
        }

        if level > max_level {
            let mut entry = self.entry.write();
            if let Some(e) = entry.as_mut() {
                if layer > e.level {
                    *e = EntryPoint { node: id, level: layer };
                }
            }
        }

        Ok(id)
    }
}

/// Keep the `m` candidates closest to the query: pop the max-queue down to
/// size `m`, ascending output.
fn select_neighbours_simple(mut candidates: MaxQueue, m: usize) -> Vec<Neighbour> {
    while candidates.len() > m {
        candidates.pop();
    }
    candidates.into_sorted_asc()
}

/// Diversity heuristic (Algorithm 4 from the HNSW paper).
///
/// Scanning candidates by ascending distance to the query, keep `c` only
/// if no already-kept neighbor is closer to `c` than the query is. Rejects
/// go to a discard pile that refills the result, in candidate-distance
/// order, up to `m`, so the output size always matches plain selection.
fn select_neighbours_heuristic(nodes: &[Node], candidates: MaxQueue, m: usize) -> Vec<Neighbour> {
    if candidates.len() <= m {
        return candidates.into_sorted_asc();
    }

    let ordered = candidates.into_sorted_asc();
    let mut kept: Vec<Neighbour> = Vec::with_capacity(m);
    let mut discarded: Vec<Neighbour> = Vec::new();

    for candidate in ordered {
        if kept.len() >= m {
            break;
        }
        let diverse = kept.iter().all(|r| {
            let between = l2_squared(
                &nodes[r.id as usize].vector,
                &nodes[candidate.id as usize].vector,
            );
            between >= candidate.distance
        });
        if diverse {
            kept.push(candidate);
        } else {
            discarded.push(candidate);
        }
    }

    for candidate in discarded {
        if kept.len() >= m {
            break;
        }
        kept.push(candidate);
    }

    kept.sort_unstable_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    kept
}

/// Append the reverse edge `v -> new_id` at `level`, pruning `v`'s list
/// back to `cap` with simple selection if the append overflows it.
///
/// Pruning is symmetric: every edge dropped from `v` is also removed from
/// the other endpoint, so a full-scan bidirectionality check passes after
/// every insert.
fn link_back(nodes: &mut [Node], v: u32, new_id: u32, level: usize, cap: usize) {
    nodes[v as usize].connections[level].push(new_id);
    if nodes[v as usize].connections[level].len() <= cap {
        return;
    }

    let current: Vec<u32> = nodes[v as usize].connections[level].clone();
    let mut ranked = MaxQueue::with_capacity(current.len());
    for &w in &current {
        ranked.push(Neighbour {
            id: w,
            distance: l2_squared(&nodes[v as usize].vector, &nodes[w as usize].vector),
        });
    }

    let mut dropped = Vec::with_capacity(current.len() - cap);
    while ranked.len() > cap {
        let Some(worst) = ranked.pop() else { break };
        dropped.push(worst);
    }

    nodes[v as usize].connections[level] = ranked.into_sorted_asc().iter().map(|n| n.id).collect();
    for worst in dropped {
        nodes[worst.id as usize].connections[level].retain(|&w| w != v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
            .collect()
    }

    fn check_invariants(index: &HnswIndex) {
        let n = index.len();
        let nodes: Vec<Node> = (0..n as u32).map(|id| index.node(id)).collect();
        for node in &nodes {
            assert_eq!(
                node.connections.len(),
                node.layer as usize + 1,
                "node {} has wrong connection arity",
                node.id
            );
            for (level, links) in node.connections.iter().enumerate() {
                let cap = index.params().cap_at(level);
                assert!(
                    links.len() <= cap,
                    "node {} exceeds cap at level {level}: {} > {cap}",
                    node.id,
                    links.len()
                );
                for &other in links {
                    let reverse = &nodes[other as usize].connections[level];
                    assert!(
                        reverse.contains(&node.id),
                        "edge {} -> {other} at level {level} has no reverse",
                        node.id
                    );
                }
            }
        }
        // Entry point lives at the max occupied level
        let entry = index.entry_point().expect("non-empty index has an entry");
        let max_layer = nodes.iter().map(|n| n.layer).max().unwrap();
        assert_eq!(entry.level, max_layer);
        assert_eq!(nodes[entry.node as usize].layer, entry.level);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let index = HnswIndex::new(8, 8, 16, 200, 4);
        let err = index.insert(vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            HnswError::DimensionMismatch {
                expected: 4,
                got: 2
            }
        ));
        assert_eq!(index.len(), 0, "rejected vector must not be stored");
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let index = HnswIndex::new(8, 8, 16, 200, 4);
        let id = index.insert(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(id, 0);
        let entry = index.entry_point().unwrap();
        assert_eq!(entry.node, id);
        assert_eq!(entry.level, index.node(id).layer);
    }

    #[test]
    fn test_sequential_ids() {
        let index = HnswIndex::new(8, 8, 16, 200, 2);
        for i in 0..20u32 {
            let id = index.insert(vec![i as f32, 0.0]).unwrap();
            assert_eq!(id, i);
        }
    }

    #[test]
    fn test_invariants_after_inserts() {
        let index = HnswIndex::new(4, 4, 8, 60, 8);
        for v in random_vectors(300, 8, 7) {
            index.insert(v).unwrap();
        }
        check_invariants(&index);
    }

    #[test]
    fn test_invariants_simple_selection() {
        let mut index = HnswIndex::new(4, 4, 8, 60, 8);
        index.set_heuristic(false);
        for v in random_vectors(300, 8, 11) {
            index.insert(v).unwrap();
        }
        check_invariants(&index);
    }

    #[test]
    fn test_duplicate_vectors() {
        let index = HnswIndex::new(4, 4, 8, 40, 2);
        for _ in 0..30 {
            index.insert(vec![1.0, 1.0]).unwrap();
        }
        check_invariants(&index);
        let results = index.search(&[1.0, 1.0], 5, 40).unwrap();
        assert_eq!(results.len(), 5);
        for n in &results {
            assert_eq!(n.distance, 0.0);
        }
    }

    #[test]
    fn test_simple_selection_keeps_closest() {
        let mut q = MaxQueue::new();
        for (id, d) in [(1u32, 5.0f32), (2, 1.0), (3, 3.0), (4, 2.0), (5, 4.0)] {
            q.push(Neighbour { id, distance: d });
        }
        let picked = select_neighbours_simple(q, 3);
        let ids: Vec<u32> = picked.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn test_heuristic_prefers_diverse_neighbours() {
        // A tight cluster at x=1 and a lone point at x=-2, query at x=0.
        // Plain selection would take three cluster points; the heuristic
        // must keep the far side of the query instead.
        let store = crate::hnsw::graph::NodeStore::new();
        store.append(vec![0.0], 0); // query placeholder, id 0
        store.append(vec![1.0], 0); // id 1
        store.append(vec![1.1], 0); // id 2
        store.append(vec![1.2], 0); // id 3
        store.append(vec![-2.0], 0); // id 4
        let guard = store.read();
        let nodes: &[Node] = &guard;

        let q = [0.0f32];
        let mut candidates = MaxQueue::new();
        for id in 1..=4u32 {
            candidates.push(Neighbour {
                id,
                distance: l2_squared(&q, &nodes[id as usize].vector),
            });
        }

        let picked = select_neighbours_heuristic(nodes, candidates, 2);
        let ids: Vec<u32> = picked.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 4], "expected one pick per side of the query");
    }

    #[test]
    fn test_heuristic_refills_from_discard_pile() {
        // All candidates colinear and close together: after the first keep,
        // everything is dominated, so the discard pile must pad the result
        // back up to m.
        let store = crate::hnsw::graph::NodeStore::new();
        store.append(vec![0.0], 0);
        store.append(vec![1.0], 0);
        store.append(vec![1.05], 0);
        store.append(vec![1.1], 0);
        store.append(vec![1.15], 0);
        let guard = store.read();
        let nodes: &[Node] = &guard;

        let q = [0.0f32];
        let mut candidates = MaxQueue::new();
        for id in 1..=4u32 {
            candidates.push(Neighbour {
                id,
                distance: l2_squared(&q, &nodes[id as usize].vector),
            });
        }

        let picked = select_neighbours_heuristic(nodes, candidates, 3);
        assert_eq!(picked.len(), 3, "discard refill must reach m outputs");
        assert_eq!(picked[0].id, 1);
    }

    #[test]
    fn test_link_back_prunes_to_cap_symmetrically() {
        let store = crate::hnsw::graph::NodeStore::new();
        // Node 0 at the origin with three neighbours on a line; cap of 2
        // must drop the farthest and erase its reverse edge.
        store.append(vec![0.0], 0);
        store.append(vec![1.0], 0);
        store.append(vec![2.0], 0);
        store.append(vec![3.0], 0);
        {
            let mut nodes = store.write();
            nodes[0].connections[0] = vec![1, 2];
            nodes[1].connections[0] = vec![0];
            nodes[2].connections[0] = vec![0];
            nodes[3].connections[0] = vec![0];
            link_back(&mut nodes, 0, 3, 0, 2);
        }
        let nodes = store.read();
        assert_eq!(nodes[0].connections[0], vec![1, 2]);
        assert!(
            !nodes[3].connections[0].contains(&0),
            "dropped edge must lose its reverse too"
        );
    }
}
