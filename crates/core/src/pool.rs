//! Worker pools for concurrent insertion and querying.
//!
//! A pool is a fixed set of threads consuming jobs from a bounded channel
//! and emitting results to another. The job channel is small (producers
//! block instead of buffering the workload); the result channel is sized by
//! the caller to the expected workload so workers never stall on the far
//! side. Dropping the job sender is the cancellation signal: workers drain
//! in-flight jobs and exit, and [`WorkerPool::join`] is the barrier.
//!
//! Results arrive in completion order, not submission order; search results
//! carry the caller's correlation id.

use crate::config;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::queue::Neighbour;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A search job tagged with a caller-supplied correlation id.
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub id: usize,
    pub query: Vec<f32>,
}

/// The outcome of one search job, tagged with its correlation id.
#[derive(Debug)]
pub struct SearchOutput {
    pub id: usize,
    pub result: Result<Vec<Neighbour>>,
}

/// A fixed set of worker threads around a bounded job/result channel pair.
#[derive(Debug)]
pub struct WorkerPool<J, R> {
    jobs: Sender<J>,
    results: Receiver<R>,
    handles: Vec<JoinHandle<()>>,
}

impl<J, R> WorkerPool<J, R> {
    /// Queue a job, blocking while the job channel is full.
    ///
    /// # Panics
    /// Panics if every worker has already terminated, which only happens
    /// after a worker panic.
    pub fn submit(&self, job: J) {
        self.jobs.send(job).expect("worker pool has shut down");
    }

    /// Close the job channel and wait for every worker to finish its
    /// in-flight work. Returns the result channel for draining.
    pub fn join(self) -> Receiver<R> {
        drop(self.jobs);
        for handle in self.handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
        self.results
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }
}

/// Logical CPU count, the default worker count for every pool.
fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn spawn_workers<J, R, F>(
    name: &str,
    workers: usize,
    capacity: usize,
    run: F,
) -> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> R + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let (job_tx, job_rx) = bounded::<J>(workers * config::POOL_JOBS_PER_WORKER);
    let (result_tx, result_rx) = bounded::<R>(capacity.max(1));
    let run = Arc::new(run);

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let run = Arc::clone(&run);
        let handle = thread::Builder::new()
            .name(format!("{name}-{i}"))
            .spawn(move || {
                for job in job_rx {
                    // A send only fails when the caller dropped the result
                    // receiver, i.e. the results are no longer wanted.
                    if result_tx.send(run(job)).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn pool worker");
        handles.push(handle);
    }
    tracing::debug!(pool = name, workers, capacity, "worker pool started");

    WorkerPool {
        jobs: job_tx,
        results: result_rx,
        handles,
    }
}

impl HnswIndex {
    /// Start an insert pool with one worker per logical CPU.
    ///
    /// Jobs are raw vectors; each result is the new node id, or the error
    /// for that particular vector (a bad job never kills its worker).
    /// `capacity` sizes the result channel and should be the number of
    /// vectors the caller intends to submit.
    pub fn insert_pool(self: &Arc<Self>, capacity: usize) -> WorkerPool<Vec<f32>, Result<u32>> {
        let index = Arc::clone(self);
        spawn_workers("hnsw-insert", default_workers(), capacity, move |vector| {
            index.insert(vector)
        })
    }

    /// Start a search pool answering k-NN queries with the given beam.
    pub fn search_pool(
        self: &Arc<Self>,
        capacity: usize,
        k: usize,
        ef_search: usize,
        workers: usize,
    ) -> WorkerPool<SearchJob, SearchOutput> {
        let index = Arc::clone(self);
        spawn_workers("hnsw-search", workers, capacity, move |job: SearchJob| {
            SearchOutput {
                id: job.id,
                result: index.search(&job.query, k, ef_search),
            }
        })
    }

    /// Start a brute-force pool; same job/result shape as
    /// [`search_pool`](HnswIndex::search_pool), used to build ground truth.
    pub fn brute_pool(
        self: &Arc<Self>,
        capacity: usize,
        k: usize,
        workers: usize,
    ) -> WorkerPool<SearchJob, SearchOutput> {
        let index = Arc::clone(self);
        spawn_workers("hnsw-brute", workers, capacity, move |job: SearchJob| {
            SearchOutput {
                id: job.id,
                result: index.brute_search(&job.query, k),
            }
        })
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

    #[test]
    fn test_insert_pool_inserts_everything() {
        let index = Arc::new(HnswIndex::new(8, 8, 16, 100, 8));
        let vectors = random_vectors(200, 8, 3);

        let pool = index.insert_pool(vectors.len());
        for v in vectors.clone() {
            pool.submit(v);
        }
        let results = pool.join();

        let mut ids: Vec<u32> = results.iter().map(|r| r.unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids.len(), 200);
        assert_eq!(ids, (0..200u32).collect::<Vec<_>>());
        assert_eq!(index.len(), 200);
    }

    #[test]
    fn test_insert_pool_surfaces_dimension_mismatch() {
        let index = Arc::new(HnswIndex::new(8, 8, 16, 100, 8));
        let pool = index.insert_pool(4);
        pool.submit(vec![0.0; 8]);
        pool.submit(vec![0.0; 3]);
        pool.submit(vec![1.0; 8]);
        let results = pool.join();

        let (ok, err): (Vec<_>, Vec<_>) = results.iter().partition(|r| r.is_ok());
        assert_eq!(ok.len(), 2);
        assert_eq!(err.len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_search_pool_correlates_results() {
        let index = Arc::new(HnswIndex::new(8, 8, 16, 100, 4));
        let vectors = random_vectors(100, 4, 9);
        for v in vectors.clone() {
            index.insert(v).unwrap();
        }

        let pool = index.search_pool(vectors.len(), 3, 50, 4);
        for (i, v) in vectors.iter().enumerate() {
            pool.submit(SearchJob {
                id: i,
                query: v.clone(),
            });
        }
        let results = pool.join();

        let mut seen = vec![false; vectors.len()];
        for output in results.iter() {
            assert!(!seen[output.id], "correlation id {} duplicated", output.id);
            seen[output.id] = true;
            let neighbours = output.result.as_ref().unwrap();
            assert!(!neighbours.is_empty());
            // A query drawn from the indexed set must find itself first
            assert_eq!(neighbours[0].id as usize, output.id);
            assert_eq!(neighbours[0].distance, 0.0);
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_brute_pool_matches_direct_calls() {
        let index = Arc::new(HnswIndex::new(8, 8, 16, 100, 4));
        let vectors = random_vectors(50, 4, 21);
        for v in vectors.clone() {
            index.insert(v).unwrap();
        }

        let pool = index.brute_pool(vectors.len(), 5, 2);
        for (i, v) in vectors.iter().enumerate() {
            pool.submit(SearchJob {
                id: i,
                query: v.clone(),
            });
        }
        let results = pool.join();

        for output in results.iter() {
            let direct = index.brute_search(&vectors[output.id], 5).unwrap();
            let pooled = output.result.unwrap();
            let direct_ids: Vec<u32> = direct.iter().map(|n| n.id).collect();
            let pooled_ids: Vec<u32> = pooled.iter().map(|n| n.id).collect();
            assert_eq!(direct_ids, pooled_ids);
        }
    }

    #[test]
    fn test_join_is_a_barrier() {
        let index = Arc::new(HnswIndex::new(4, 4, 8, 40, 2));
        let pool = index.insert_pool(500);
        for v in random_vectors(500, 2, 5) {
            pool.submit(v);
        }
        let results = pool.join();
        // After join, every submitted job has completed
        assert_eq!(results.len(), 500);
        assert_eq!(index.len(), 500);
    }
}
