//! Global configuration constants for the smallworld engine.
//!
//! Tuning defaults live here; runtime configuration is handled via CLI
//! arguments in the `vecbench` driver.

/// Default number of bidirectional links per node on levels above 0.
///
/// A reasonable range is 5–48. Smaller values suit lower recall targets
/// and lower-dimensional data; larger values suit high recall and high
/// dimensionality, at the cost of memory.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default hard cap on links per node for levels above 0 (matches `M`).
pub const HNSW_DEFAULT_MMAX: usize = HNSW_DEFAULT_M;

/// Default hard cap on links per node at level 0.
///
/// Simulations suggest `2 * M`; setting it higher degrades performance and
/// wastes memory.
pub const HNSW_DEFAULT_MMAX0: usize = HNSW_DEFAULT_M * 2;

/// Default ef parameter during index construction.
///
/// Size of the dynamic candidate list while inserting. Higher values
/// produce a better graph but slow down the build.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during search.
///
/// Higher values improve recall at the cost of latency. Must be at least
/// the requested `k`.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Job-channel slots per worker in the insert/search pools.
///
/// The job channel is deliberately small so producers block instead of
/// buffering the whole workload; the result channel is sized to the
/// expected workload by the caller.
pub const POOL_JOBS_PER_WORKER: usize = 1;
