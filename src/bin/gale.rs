//! CLI driver: run a vertex-centric workload over an in-process cluster.
//!
//! Spawns one thread per partition, loads the edge file, runs the selected
//! algorithm on the compute partitions, and prints a summary plus cache
//! statistics from partition 0.

use std::path::PathBuf;
use std::thread;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gale::algo::{bfs, connected_components, pagerank, PageRankOptions};
use gale::{
    Communicator, EngineConfig, EngineMode, Empty, GaleError, Graph, LocalCluster, Result,
    VertexId, INVALID_VERTEX,
};

#[derive(Parser)]
#[command(name = "gale", about = "NUMA-aware disaggregated-memory graph engine")]
struct Cli {
    /// Binary edge file of packed (u32 src, u32 dst) records.
    #[arg(long)]
    graph: PathBuf,
    /// Vertex count (supplied out of band by the dataset).
    #[arg(long)]
    vertices: VertexId,
    /// Total partitions.
    #[arg(long, default_value_t = 1)]
    partitions: usize,
    /// Compute partitions; the rest serve far memory.
    #[arg(long)]
    compute: Option<usize>,
    #[arg(long, default_value_t = 1)]
    sockets: usize,
    #[arg(long)]
    threads_per_socket: Option<usize>,
    /// Load the edge file as a symmetric graph.
    #[arg(long, default_value_t = false)]
    symmetric: bool,
    /// Direct-mapped edge cache slots per remote socket (0 disables).
    #[arg(long)]
    edge_cache_entries: Option<usize>,
    /// Boundary alignment in vertices.
    #[arg(long)]
    page_vertices: Option<VertexId>,
    /// Adaptive sparse/dense classification instead of always-sparse.
    #[arg(long, default_value_t = false)]
    adaptive: bool,
    /// JSON engine config; command-line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    Pagerank {
        #[arg(long, default_value_t = 20)]
        iterations: usize,
        #[arg(long, default_value_t = 0.85)]
        damping: f64,
    },
    Bfs {
        #[arg(long, default_value_t = 0)]
        root: VertexId,
    },
    Cc,
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|e| GaleError::config(format!("config file: {e}")))?
        }
        None => EngineConfig::default(),
    };
    cfg.partitions = cli.partitions;
    cfg.compute_partitions = cli.compute.unwrap_or(cli.partitions);
    cfg.sockets = cli.sockets;
    if let Some(tps) = cli.threads_per_socket {
        cfg.threads_per_socket = tps;
    }
    if let Some(entries) = cli.edge_cache_entries {
        cfg.edge_cache_entries = entries;
    }
    if let Some(pv) = cli.page_vertices {
        cfg.page_vertices = pv;
    }
    if cli.adaptive {
        cfg.mode = EngineMode::Adaptive;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run_partition(
    comm: gale::LocalComm,
    cli: &Cli,
    cfg: EngineConfig,
) -> Result<Option<Vec<(VertexId, f64)>>> {
    let rank = comm.rank();
    let mut graph = if cli.symmetric {
        Graph::<Empty, _>::load_undirected_from_directed(comm, cfg, &cli.graph, cli.vertices)?
    } else {
        Graph::<Empty, _>::load_directed(comm, cfg, &cli.graph, cli.vertices)?
    };
    if !graph.is_compute() {
        // Far-memory partitions stay passive; their windows outlive this
        // thread through the cluster registry.
        return Ok(None);
    }

    let summary = match cli.command {
        Command::Pagerank {
            iterations,
            damping,
        } => {
            let ranks = pagerank(&mut graph, PageRankOptions { damping, iterations })?;
            graph.gather_vertex_array(&ranks, 0)?;
            if rank == 0 {
                let mut top: Vec<(VertexId, f64)> =
                    (0..graph.vertices()).map(|v| (v, ranks.get(v))).collect();
                top.sort_by(|a, b| b.1.total_cmp(&a.1));
                top.truncate(10);
                Some(top)
            } else {
                None
            }
        }
        Command::Bfs { root } => {
            let parent = bfs(&mut graph, root)?;
            graph.gather_vertex_array(&parent, 0)?;
            if rank == 0 {
                let reached = (0..graph.vertices())
                    .filter(|&v| parent.get(v) != INVALID_VERTEX)
                    .count();
                Some(vec![(root, reached as f64)])
            } else {
                None
            }
        }
        Command::Cc => {
            let labels = connected_components(&mut graph)?;
            graph.gather_vertex_array(&labels, 0)?;
            if rank == 0 {
                let mut ids: Vec<VertexId> =
                    (0..graph.vertices()).map(|v| labels.get(v)).collect();
                ids.sort_unstable();
                ids.dedup();
                Some(vec![(ids.len() as VertexId, 0.0)])
            } else {
                None
            }
        }
    };

    let (bm, ix, hits, misses) = graph.stats().snapshot();
    info!(
        rank,
        bitmap_lookups = bm,
        index_lookups = ix,
        edge_cache_hits = hits,
        edge_cache_misses = misses,
        "cache statistics"
    );
    Ok(summary)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let cfg = engine_config(&cli)?;

    let comms = LocalCluster::comms(cfg.partitions);
    let results: Vec<Result<Option<Vec<(VertexId, f64)>>>> = thread::scope(|s| {
        let cli = &cli;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let cfg = cfg.clone();
                s.spawn(move || run_partition(comm, cli, cfg))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(GaleError::Corruption("partition panicked".into())))
            })
            .collect()
    });

    for r in results {
        if let Some(summary) = r? {
            match cli.command {
                Command::Pagerank { .. } => {
                    println!("top ranks:");
                    for (v, score) in summary {
                        println!("  {v:>10}  {score:.6}");
                    }
                }
                Command::Bfs { root } => {
                    println!("bfs from {root}: {} vertices reached", summary[0].1 as u64);
                }
                Command::Cc => {
                    println!("{} connected components", summary[0].0);
                }
            }
        }
    }
    Ok(())
}
