//! Benchmark driver for the smallworld HNSW engine.
//!
//! Generates uniform random vectors, builds the index through the
//! concurrent insert pool, establishes brute-force ground truth, then
//! sweeps `ef_search` measuring average precision@k and throughput.
//! Results append to a CSV file for cross-run comparison.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use smallworld_core::{HnswIndex, IndexStats, SearchJob};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "vecbench", about = "HNSW index benchmark driver")]
struct Args {
    /// Number of vectors to index
    #[arg(long, default_value_t = 1024)]
    num: usize,

    /// Vector dimension
    #[arg(long, default_value_t = 32)]
    dim: usize,

    /// Number of results to return for k-NN
    #[arg(short, default_value_t = 10)]
    k: usize,

    /// Number of established connections per node
    #[arg(long, default_value_t = 8)]
    m: usize,

    /// Max number of graph connections per level
    #[arg(long, default_value_t = 8)]
    mmax: usize,

    /// Max number of graph connections at level 0
    #[arg(long, default_value_t = 16)]
    mmax0: usize,

    /// Size of the dynamic candidate list during index creation
    #[arg(long, default_value_t = 200)]
    ef: usize,

    /// Use the neighbor-selection heuristic (false = naive nearest-M)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    heuristic: bool,

    /// Compare HNSW results with brute force (ground truth)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    groundtruth: bool,

    /// Run the ef_search sweep with the HNSW index
    #[arg(long = "hnsw-search", default_value_t = true, action = clap::ArgAction::Set)]
    hnsw_search: bool,

    /// Worker threads for search pools (0 = logical CPU count)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Append results to this CSV file
    #[arg(long)]
    csvfile: Option<PathBuf>,

    /// Export the index to disk at this path
    #[arg(long)]
    save: Option<PathBuf>,

    /// RNG seed for vector generation
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// One CSV row: the configuration plus the measurements of a single
/// ef_search sweep step.
#[derive(Debug, Clone, Serialize)]
struct BenchRecord {
    dim: usize,
    size: usize,
    k: usize,
    m: usize,
    mmax: usize,
    mmax0: usize,
    ef: usize,
    ef_search: usize,
    heuristic: bool,
    cpu_logical_cores: usize,
    build_secs: f64,
    build_per_sec: f64,
    brute_secs: f64,
    brute_qps: f64,
    hnsw_secs: f64,
    hnsw_qps: f64,
    ground_truth_hits: usize,
    precision: f64,
}

fn generate_random_vectors(num: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn print_progress(label: &str, done: usize) {
    if done % 1000 == 0 {
        print!("\x1b[2K\r{label} {done} records");
        let _ = std::io::stdout().flush();
    }
}

fn print_stats(stats: &IndexStats) {
    println!("m = {}", stats.m);
    println!("mmax = {}", stats.m_max);
    println!("mmax0 = {}", stats.m_max0);
    println!("ef_construction = {}", stats.ef_construction);
    println!("heuristic = {}", stats.heuristic);
    println!("ml = {:.6}", stats.ml);
    println!("ep = {:?}", stats.ep);
    println!("max_level = {}", stats.max_level);
    println!("number of nodes = {}", stats.node_count);
    for (level, count) in stats.nodes_per_level.iter().enumerate() {
        let edges = stats.edges_per_level[level];
        let avg = edges / count.max(&1);
        println!("\tlevel {level}: nodes {count}, connections {edges}, avg {avg}");
    }
}

fn append_csv(path: &PathBuf, record: &BenchRecord) {
    let new_file = !path.exists();
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: cannot open CSV file {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(new_file)
        .from_writer(file);
    if let Err(e) = writer.serialize(record) {
        eprintln!("Error: cannot write CSV record: {e}");
        std::process::exit(1);
    }
    if let Err(e) = writer.flush() {
        eprintln!("Error: cannot flush CSV file: {e}");
        std::process::exit(1);
    }
}

/// Collect pooled search results into a per-query id list, indexed by the
/// job's correlation id.
fn collect_results(
    results: impl IntoIterator<Item = smallworld_core::SearchOutput>,
    num: usize,
) -> Vec<Vec<u32>> {
    let mut out = vec![Vec::new(); num];
    for output in results {
        match output.result {
            Ok(neighbours) => out[output.id] = neighbours.iter().map(|n| n.id).collect(),
            Err(e) => {
                eprintln!("Error: search job {} failed: {e}", output.id);
                std::process::exit(1);
            }
        }
    }
    out
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.num == 0 || args.dim == 0 {
        eprintln!("Error: --num and --dim must be > 0");
        std::process::exit(1);
    }
    if args.k == 0 || args.k > args.num {
        eprintln!("Error: -k must be in 1..=num");
        std::process::exit(1);
    }
    if args.ef < args.m {
        eprintln!("Error: --ef must be at least --m");
        std::process::exit(1);
    }

    let workers = if args.workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        args.workers
    };

    println!("vecbench - smallworld HNSW benchmark\n");
    println!(
        "Creating HNSW index with {} vectors ({} dimensions), {workers} workers",
        args.num, args.dim
    );

    let vectors = generate_random_vectors(args.num, args.dim, args.seed);

    let mut index = HnswIndex::new(args.m, args.mmax, args.mmax0, args.ef, args.dim);
    index.set_heuristic(args.heuristic);
    let index = Arc::new(index);

    // Build phase
    let start = Instant::now();
    let pool = index.insert_pool(args.num);
    for (i, v) in vectors.iter().enumerate() {
        pool.submit(v.clone());
        print_progress("Added", i);
    }
    for result in pool.join().iter() {
        if let Err(e) = result {
            eprintln!("Error: insert failed: {e}");
            std::process::exit(1);
        }
    }
    let build_secs = start.elapsed().as_secs_f64();
    println!();
    println!("HNSW graph built in {build_secs:.6} secs");
    println!(
        "HNSW graph inserts per second {:.2} ({workers} threaded)\n",
        args.num as f64 / build_secs
    );

    // Ground truth phase
    let mut ground_truth: Vec<Vec<u32>> = Vec::new();
    let mut brute_secs = 0.0f64;
    if args.groundtruth {
        println!(
            "Building ground truth (brute) search for {} records, {}-NN",
            args.num, args.k
        );
        let start = Instant::now();
        let pool = index.brute_pool(args.num, args.k, workers);
        for (i, v) in vectors.iter().enumerate() {
            pool.submit(SearchJob {
                id: i,
                query: v.clone(),
            });
            print_progress("Searched", i);
        }
        ground_truth = collect_results(pool.join(), args.num);
        brute_secs = start.elapsed().as_secs_f64();
        println!();
        println!("Brute search complete in {brute_secs:.6} secs");
        println!(
            "Brute search queries per second {:.2} ({workers} threaded)",
            args.num as f64 / brute_secs
        );
        println!("================================");
    }

    // ef_search sweep
    if args.hnsw_search {
        for ef_search in (10..=args.ef).step_by(10) {
            println!("HNSW ef_search ({ef_search}):");
            let start = Instant::now();
            let pool = index.search_pool(args.num, args.k, ef_search, workers);
            for (i, v) in vectors.iter().enumerate() {
                pool.submit(SearchJob {
                    id: i,
                    query: v.clone(),
                });
                print_progress("Searched", i);
            }
            let results = collect_results(pool.join(), args.num);
            let hnsw_secs = start.elapsed().as_secs_f64();
            println!();

            let mut hits = 0usize;
            if args.groundtruth {
                for (truth, found) in ground_truth.iter().zip(results.iter()) {
                    hits += found.iter().filter(|id| truth.contains(id)).count();
                }
            }
            let precision = hits as f64 / (args.num * args.k) as f64;

            print_stats(&index.stats());
            println!("HNSW search complete in {hnsw_secs:.6} secs");
            println!(
                "HNSW search queries per second {:.2} ({workers} threaded)",
                args.num as f64 / hnsw_secs
            );
            if args.groundtruth {
                println!("Total matches from ground truth: {hits}");
                println!("Average {}-NN precision: {precision:.6}", args.k);
            }
            println!("================================");

            if let Some(ref csvfile) = args.csvfile {
                append_csv(
                    csvfile,
                    &BenchRecord {
                        dim: args.dim,
                        size: args.num,
                        k: args.k,
                        m: args.m,
                        mmax: args.mmax,
                        mmax0: args.mmax0,
                        ef: args.ef,
                        ef_search,
                        heuristic: args.heuristic,
                        cpu_logical_cores: workers,
                        build_secs,
                        build_per_sec: args.num as f64 / build_secs,
                        brute_secs,
                        brute_qps: if brute_secs > 0.0 {
                            args.num as f64 / brute_secs
                        } else {
                            0.0
                        },
                        hnsw_secs,
                        hnsw_qps: args.num as f64 / hnsw_secs,
                        ground_truth_hits: hits,
                        precision,
                    },
                );
            }
        }
    }

    if let Some(ref path) = args.save {
        if let Err(e) = index.save(path) {
            eprintln!("Error: snapshot export failed: {e}");
            std::process::exit(1);
        }
        tracing::info!(path = %path.display(), "index exported");
    }
}
