//! Snapshot codec: two-file save/load for the index.
//!
//! `save` writes `<path>.meta` (engine parameters and entry-point state)
//! and `<path>` (the full node array). Each file is framed as
//! `[bincode payload][magic 4B][CRC32 BE 4B]` and written atomically via a
//! temp file + rename, so a crash mid-write never leaves a torn snapshot
//! behind. `load` verifies the magic and checksum, then validates the
//! decoded graph before handing back an index.
//!
//! Snapshots are a convenience export, not a source of truth; the format
//! is stable within a magic version only.

use crate::error::{HnswError, Result};
use crate::hnsw::graph::{EntryPoint, HnswIndex, HnswParams, Node, NodeStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Magic trailer for the metadata file.
const META_MAGIC: &[u8; 4] = b"SWM1";
/// Magic trailer for the node-array file.
const NODES_MAGIC: &[u8; 4] = b"SWN1";

/// Engine parameters as stored in `<path>.meta`.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    m: usize,
    m_max: usize,
    m_max0: usize,
    ef_construction: usize,
    ml: f64,
    heuristic: bool,
    dim: usize,
    entry: Option<EntryPoint>,
}

fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta");
    PathBuf::from(name)
}

/// Write `[payload][magic][crc32]` atomically.
fn write_framed(path: &Path, payload: &[u8], magic: &[u8; 4]) -> Result<()> {
    let crc = crc32fast::hash(payload);
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(payload);
    out.extend_from_slice(magic);
    out.extend_from_slice(&crc.to_be_bytes());

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, &out)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a framed file back, verifying magic and checksum.
fn read_framed(path: &Path, magic: &[u8; 4]) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    if raw.len() < 8 {
        return Err(HnswError::Snapshot(format!(
            "{} is too short to be a snapshot file",
            path.display()
        )));
    }
    let (payload, trailer) = raw.split_at(raw.len() - 8);
    if &trailer[..4] != magic {
        return Err(HnswError::Snapshot(format!(
            "{} has wrong magic bytes",
            path.display()
        )));
    }
    let stored = u32::from_be_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(HnswError::Snapshot(format!(
            "{} CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}",
            path.display()
        )));
    }
    Ok(payload.to_vec())
}

/// Check that a decoded snapshot is a graph this engine could have built.
fn validate(meta: &SnapshotMeta, nodes: &[Node]) -> std::result::Result<(), String> {
    if let Some(entry) = meta.entry {
        let Some(node) = nodes.get(entry.node as usize) else {
            return Err(format!("entry point {} out of bounds", entry.node));
        };
        if node.layer != entry.level {
            return Err(format!(
                "entry point layer {} != recorded max level {}",
                node.layer, entry.level
            ));
        }
    } else if !nodes.is_empty() {
        return Err("node array without an entry point".to_string());
    }

    for (i, node) in nodes.iter().enumerate() {
        if node.id as usize != i {
            return Err(format!("node {i} carries id {}", node.id));
        }
        if node.vector.len() != meta.dim {
            return Err(format!(
                "node {i} has dimension {} != {}",
                node.vector.len(),
                meta.dim
            ));
        }
        if node.connections.len() != node.layer as usize + 1 {
            return Err(format!(
                "node {i} has {} connection levels for layer {}",
                node.connections.len(),
                node.layer
            ));
        }
        for links in &node.connections {
            for &other in links {
                if other as usize >= nodes.len() {
                    return Err(format!("node {i} links to missing node {other}"));
                }
            }
        }
        if let Some(entry) = meta.entry {
            if node.layer > entry.level {
                return Err(format!(
                    "node {i} layer {} above recorded max level {}",
                    node.layer, entry.level
                ));
            }
        }
    }
    Ok(())
}

impl HnswIndex {
    /// Persist the index as `<path>.meta` + `<path>`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let entry = self.entry_point();
        let meta = SnapshotMeta {
            m: self.params.m,
            m_max: self.params.m_max,
            m_max0: self.params.m_max0,
            ef_construction: self.params.ef_construction,
            ml: self.params.ml,
            heuristic: self.params.heuristic,
            dim: self.params.dim,
            entry,
        };

        let nodes = self.store.read();
        let meta_bytes =
            bincode::serialize(&meta).map_err(|e| HnswError::Snapshot(e.to_string()))?;
        let node_bytes =
            bincode::serialize(&*nodes).map_err(|e| HnswError::Snapshot(e.to_string()))?;

        write_framed(&meta_path(path), &meta_bytes, META_MAGIC)?;
        write_framed(path, &node_bytes, NODES_MAGIC)?;
        tracing::info!(
            path = %path.display(),
            nodes = nodes.len(),
            bytes = node_bytes.len(),
            "saved index snapshot"
        );
        Ok(())
    }

    /// Reconstruct an index from a snapshot written by
    /// [`save`](HnswIndex::save).
    pub fn load(path: impl AsRef<Path>) -> Result<HnswIndex> {
        let path = path.as_ref();
        let meta_bytes = read_framed(&meta_path(path), META_MAGIC)?;
        let meta: SnapshotMeta =
            bincode::deserialize(&meta_bytes).map_err(|e| HnswError::Snapshot(e.to_string()))?;
        let node_bytes = read_framed(path, NODES_MAGIC)?;
        let nodes: Vec<Node> =
            bincode::deserialize(&node_bytes).map_err(|e| HnswError::Snapshot(e.to_string()))?;

        validate(&meta, &nodes)
            .map_err(|e| HnswError::Snapshot(format!("validation failed: {e}")))?;

        tracing::info!(path = %path.display(), nodes = nodes.len(), "loaded index snapshot");
        Ok(HnswIndex {
            params: HnswParams {
                m: meta.m,
                m_max: meta.m_max,
                m_max0: meta.m_max0,
                ef_construction: meta.ef_construction,
                ml: meta.ml,
                heuristic: meta.heuristic,
                dim: meta.dim,
            },
            store: NodeStore::from_nodes(nodes),
            entry: RwLock::new(meta.entry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build_index(n: usize, dim: usize, seed: u64) -> HnswIndex {
        let index = HnswIndex::new(8, 8, 16, 100, dim);
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>()).collect();
            index.insert(v).unwrap();
        }
        index
    }

    #[test]
    fn test_save_load_roundtrip_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snap");
        let index = build_index(200, 8, 17);
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.entry_point(), index.entry_point());
        assert_eq!(loaded.params().m, index.params().m);
        assert!((loaded.params().ml - index.params().ml).abs() < 1e-12);

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..25 {
            let q: Vec<f32> = (0..8).map(|_| rng.gen::<f32>()).collect();
            let before = index.search(&q, 10, 100).unwrap();
            let after = loaded.search(&q, 10, 100).unwrap();
            assert_eq!(before.len(), after.len());
            for (x, y) in before.iter().zip(after.iter()) {
                assert_eq!(x.id, y.id);
                assert_eq!(x.distance, y.distance);
            }
        }
    }

    #[test]
    fn test_save_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.snap");
        let index = HnswIndex::new(8, 8, 16, 100, 4);
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.entry_point().is_none());
        assert!(loaded.search(&[0.0; 4], 5, 50).unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_nodes_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.snap");
        let index = build_index(50, 4, 1);
        index.save(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        fs::write(&path, &raw).unwrap();

        let err = HnswIndex::load(&path).unwrap_err();
        assert!(matches!(err, HnswError::Snapshot(_)), "got {err}");
    }

    #[test]
    fn test_wrong_magic_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("magic.snap");
        let index = build_index(10, 4, 2);
        index.save(&path).unwrap();

        // Swap the two files: the meta reader must reject the node magic
        let meta = meta_path(&path);
        let node_bytes = fs::read(&path).unwrap();
        fs::write(&meta, &node_bytes).unwrap();

        let err = HnswIndex::load(&path).unwrap_err();
        assert!(matches!(err, HnswError::Snapshot(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = HnswIndex::load("/nonexistent/dir/snapshot").unwrap_err();
        assert!(matches!(err, HnswError::Io(_)));
    }

    #[test]
    fn test_continue_inserting_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.snap");
        let index = build_index(50, 4, 3);
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        let id = loaded.insert(vec![0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_eq!(id, 50);
        let results = loaded.search(&[0.5, 0.5, 0.5, 0.5], 1, 50).unwrap();
        assert_eq!(results[0].id, id);
    }
}
