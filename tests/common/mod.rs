//! Shared scaffolding for cluster integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::thread;

use gale::{EngineConfig, EngineMode, LocalCluster, LocalComm};

/// Small, deterministic engine configuration for in-process clusters over
/// tiny graphs: unit page alignment so boundaries can land anywhere, two
/// workers, a small edge cache.
pub fn test_config(partitions: usize, compute: usize) -> EngineConfig {
    EngineConfig {
        partitions,
        compute_partitions: compute,
        sockets: 1,
        threads_per_socket: 2,
        alpha: None,
        edge_cache_entries: 16,
        page_vertices: 1,
        local_send_buffer_limit: 4,
        mode: EngineMode::Sparse,
    }
}

pub fn write_edge_file(dir: &Path, name: &str, edges: &[(u32, u32)]) -> PathBuf {
    let path = dir.join(name);
    let records: Vec<gale::EdgeRecord<gale::Empty>> = edges
        .iter()
        .map(|&(src, dst)| gale::EdgeRecord {
            src,
            dst,
            data: gale::Empty,
        })
        .collect();
    std::fs::write(&path, bytemuck::cast_slice(&records)).unwrap();
    path
}

/// Run `f` once per partition on its own thread; results indexed by rank.
pub fn run_cluster<T, F>(partitions: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Send + Sync,
{
    let comms = LocalCluster::comms(partitions);
    thread::scope(|s| {
        let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(|| f(c))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// A directed cycle 0 -> 1 -> ... -> n-1 -> 0.
pub fn cycle_edges(n: u32) -> Vec<(u32, u32)> {
    (0..n).map(|v| (v, (v + 1) % n)).collect()
}
