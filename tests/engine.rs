//! Engine semantics on pure-compute clusters.

mod common;

use common::{cycle_edges, run_cluster, test_config, write_edge_file};
use gale::{Empty, EngineMode, Graph, VertexId};
use tempfile::tempdir;

const TRIANGLE: [(u32, u32); 3] = [(0, 1), (1, 2), (2, 0)];

/// One sparse round counting traversed adjacency; the kernels mirror S1.
fn count_round(
    graph: &mut Graph<Empty, gale::LocalComm>,
    active: &gale::Bitmap,
) -> u64 {
    graph
        .process_edges::<u64, u32, _, _, _, _>(
            |ctx, v| ctx.emit(v, 1),
            |_v, _m, adj| adj.len() as u64,
            |ctx, dst, _adj| ctx.emit(dst, 1),
            |_dst, _m| 1,
            active,
            None,
        )
        .unwrap()
}

#[test]
fn s1_triangle_counts_adjacency() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "tri.bin", &TRIANGLE);
    let out = run_cluster(1, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(1, 1), &path, 3).unwrap();
        let active = g.alloc_vertex_subset();
        active.fill();
        count_round(&mut g, &active)
    });
    assert_eq!(out[0], 3);
}

#[test]
fn s5_empty_active_set_reduces_to_zero() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "tri.bin", &TRIANGLE);
    let out = run_cluster(2, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, 3).unwrap();
        let active = g.alloc_vertex_subset();
        count_round(&mut g, &active)
    });
    assert_eq!(out, vec![0, 0]);
}

#[test]
fn s6_repeated_rounds_are_identical() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(96));
    let out = run_cluster(2, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, 96).unwrap();
        let active = g.alloc_vertex_subset();
        active.fill();
        let first = count_round(&mut g, &active);
        let second = count_round(&mut g, &active);
        (first, second)
    });
    for (first, second) in out {
        assert_eq!(first, 96);
        assert_eq!(first, second);
    }
}

#[test]
fn p5_p7_exact_message_coverage() {
    // Every third vertex of a cycle is active; every active source has
    // exactly one outgoing edge, so the reducer equals the number of slot
    // invocations equals the active population, with no duplicates or
    // drops under stealing.
    let n: u32 = 128;
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(n));
    let out = run_cluster(2, |comm| {
        let mut g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, n).unwrap();
        let active = g.alloc_vertex_subset();
        let mut k = 0u64;
        for v in (0..n).step_by(3) {
            active.set_bit(v);
            k += 1;
        }
        let slots: u64 = g
            .process_edges::<u64, u32, _, _, _, _>(
                |ctx, v| ctx.emit(v, v),
                |_v, _m, _adj| 1,
                |_ctx, _dst, _adj| {},
                |_dst, _m| 0,
                &active,
                None,
            )
            .unwrap();
        (slots, k)
    });
    for (slots, k) in out {
        assert_eq!(slots, k);
    }
}

#[test]
fn adaptive_mode_runs_dense_rounds() {
    // Full active set on a pure-compute cluster classifies dense; the
    // dense kernels of `count_round` count one slot call per destination.
    let n: u32 = 64;
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(n));
    let out = run_cluster(2, |comm| {
        let mut cfg = test_config(2, 2);
        cfg.mode = EngineMode::Adaptive;
        let mut g = Graph::<Empty, _>::load_directed(comm, cfg, &path, n).unwrap();
        let active = g.alloc_vertex_subset();
        active.fill();
        count_round(&mut g, &active)
    });
    // Each vertex has exactly one incoming edge, so the dense side signals
    // one message per destination.
    for slots in out {
        assert_eq!(slots, u64::from(n));
    }
}

#[test]
fn process_vertices_sums_degrees() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "tri.bin", &TRIANGLE);
    let out = run_cluster(2, |comm| {
        let g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, 3).unwrap();
        let active = g.alloc_vertex_subset();
        active.fill();
        let deg: Vec<VertexId> = g.out_degree().to_vec();
        g.process_vertices(|v| deg[v as usize] as u64, &active)
            .unwrap()
    });
    assert_eq!(out, vec![3, 3]);
}

#[test]
fn gather_and_fill_vertex_arrays() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(32));
    let out = run_cluster(2, |comm| {
        let g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, 32).unwrap();
        let arr = g.alloc_vertex_array::<u32>();
        g.fill_vertex_array(&arr, 7);
        let (lo, hi) = g.owned_range();
        for v in lo..hi {
            assert_eq!(arr.get(v), 7);
            arr.set(v, v * 10);
        }
        g.gather_vertex_array(&arr, 0).unwrap();
        if g.partition_id() == 0 {
            (0..32u32).map(|v| arr.get(v)).collect::<Vec<_>>()
        } else {
            Vec::new()
        }
    });
    assert_eq!(out[0], (0..32u32).map(|v| v * 10).collect::<Vec<_>>());
}

#[test]
fn dump_and_restore_roundtrip() {
    let dir = tempdir().unwrap();
    let path = write_edge_file(dir.path(), "cyc.bin", &cycle_edges(16));
    let dump = dir.path().join("state.bin");
    let out = run_cluster(2, |comm| {
        let g = Graph::<Empty, _>::load_directed(comm, test_config(2, 2), &path, 16).unwrap();
        let arr = g.alloc_vertex_array::<u64>();
        let (lo, hi) = g.owned_range();
        for v in lo..hi {
            arr.set(v, u64::from(v) + 100);
        }
        g.dump_vertex_array(&arr, &dump).unwrap();
        let restored = g.alloc_vertex_array::<u64>();
        g.restore_vertex_array(&restored, &dump).unwrap();
        (lo..hi).map(|v| restored.get(v)).collect::<Vec<_>>()
    });
    let mut all: Vec<u64> = out.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (100..116u64).collect::<Vec<_>>());
}
