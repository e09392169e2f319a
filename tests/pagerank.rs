//! Algorithm drivers as acceptance tests: PageRank agreement across
//! topologies, BFS and connected components.

mod common;

use common::{cycle_edges, run_cluster, test_config, write_edge_file};
use gale::algo::{bfs, connected_components, pagerank, PageRankOptions};
use gale::{Empty, EngineMode, Graph, VertexId, INVALID_VERTEX};
use tempfile::tempdir;

fn pagerank_run(
    partitions: usize,
    compute: usize,
    path: &std::path::Path,
    vertices: VertexId,
    iterations: usize,
    mode: EngineMode,
) -> Vec<f64> {
    let out = run_cluster(partitions, |comm| {
        let mut cfg = test_config(partitions, compute);
        cfg.mode = mode;
        let mut g = Graph::<Empty, _>::load_directed(comm, cfg, path, vertices).unwrap();
        if !g.is_compute() {
            return None;
        }
        let ranks = pagerank(
            &mut g,
            PageRankOptions {
                damping: 0.85,
                iterations,
            },
        )
        .unwrap();
        g.gather_vertex_array(&ranks, 0).unwrap();
        if g.partition_id() == 0 {
            Some((0..vertices).map(|v| ranks.get(v)).collect::<Vec<f64>>())
        } else {
            None
        }
    });
    out.into_iter().flatten().next().unwrap()
}

#[test]
fn s2_cycle_ranks_stay_uniform() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "tri.bin", &[(0, 1), (1, 2), (2, 0)]);
    let ranks = pagerank_run(2, 2, &path, 3, 1, EngineMode::Sparse);
    // On a cycle every vertex is symmetric: after any number of
    // iterations all ranks are equal, and with in = out = 1 the fixpoint
    // value is exactly 1.
    for pair in ranks.windows(2) {
        assert!((pair[0] - pair[1]).abs() < 1e-6, "ranks diverge: {ranks:?}");
    }
    assert!((ranks[0] - 1.0).abs() < 1e-6);
}

#[test]
fn distributed_matches_single_partition() {
    // A fixed irregular graph; the partitioned runs must agree with the
    // single-process run bit-for-bit in the 1e-10 sense.
    let edges: Vec<(u32, u32)> = vec![
        (0, 1),
        (0, 2),
        (1, 2),
        (2, 0),
        (3, 2),
        (3, 4),
        (4, 0),
        (5, 4),
        (5, 0),
        (6, 5),
        (7, 6),
        (2, 7),
        (1, 7),
    ];
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "g.bin", &edges);
    let reference = pagerank_run(1, 1, &path, 8, 8, EngineMode::Sparse);
    let two = pagerank_run(2, 2, &path, 8, 8, EngineMode::Sparse);
    let delegated = pagerank_run(2, 1, &path, 8, 8, EngineMode::Sparse);
    let four = pagerank_run(4, 2, &path, 8, 8, EngineMode::Sparse);
    for v in 0..8 {
        assert!((reference[v] - two[v]).abs() < 1e-10, "vertex {v}");
        assert!((reference[v] - delegated[v]).abs() < 1e-10, "vertex {v}");
        assert!((reference[v] - four[v]).abs() < 1e-10, "vertex {v}");
    }
}

#[test]
fn adaptive_dense_matches_sparse() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(40));
    let sparse = pagerank_run(2, 2, &path, 40, 5, EngineMode::Sparse);
    let adaptive = pagerank_run(2, 2, &path, 40, 5, EngineMode::Adaptive);
    for v in 0..40 {
        assert!((sparse[v] - adaptive[v]).abs() < 1e-10, "vertex {v}");
    }
}

#[test]
fn bfs_line_graph_parents() {
    let n: u32 = 24;
    let edges: Vec<(u32, u32)> = (0..n - 1).map(|v| (v, v + 1)).collect();
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "line.bin", &edges);
    let out = run_cluster(2, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, n).unwrap();
        let parent = bfs(&mut g, 0).unwrap();
        g.gather_vertex_array(&parent, 0).unwrap();
        if g.partition_id() == 0 {
            Some((0..n).map(|v| parent.get(v)).collect::<Vec<_>>())
        } else {
            None
        }
    });
    let parent = out.into_iter().flatten().next().unwrap();
    assert_eq!(parent[0], 0);
    for v in 1..n as usize {
        assert_eq!(parent[v], v as u32 - 1);
    }
}

#[test]
fn bfs_unreachable_stays_invalid() {
    let dir = tempdir().unwrap();
    // 3 -> 4 is disconnected from the 0 -> 1 -> 2 chain.
    let path = write_edge_file(dir.path(), "g.bin", &[(0, 1), (1, 2), (3, 4)]);
    let out = run_cluster(1, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(1, 1), &path, 5).unwrap();
        let parent = bfs(&mut g, 0).unwrap();
        (0..5u32).map(|v| parent.get(v)).collect::<Vec<_>>()
    });
    let parent = &out[0];
    assert_eq!(parent[2], 1);
    assert_eq!(parent[3], INVALID_VERTEX);
    assert_eq!(parent[4], INVALID_VERTEX);
}

#[test]
fn connected_components_on_symmetric_graph() {
    // Two components: {0, 1, 2} and {3, 4}.
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "g.bin", &[(0, 1), (1, 2), (3, 4)]);
    let out = run_cluster(2, |comm| {
        let mut g = Graph::<Empty, _>::load_undirected_from_directed(
            comm,
            test_config(2, 2),
            &path,
            5,
        )
        .unwrap();
        let labels = connected_components(&mut g).unwrap();
        g.gather_vertex_array(&labels, 0).unwrap();
        if g.partition_id() == 0 {
            Some((0..5u32).map(|v| labels.get(v)).collect::<Vec<_>>())
        } else {
            None
        }
    });
    let labels = out.into_iter().flatten().next().unwrap();
    assert_eq!(labels[0], labels[1]);
    assert_eq!(labels[1], labels[2]);
    assert_eq!(labels[3], labels[4]);
    assert_ne!(labels[0], labels[3]);
    assert_eq!(labels[0], 0);
    assert_eq!(labels[3], 3);
}
