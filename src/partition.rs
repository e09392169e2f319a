//! Locality-aware partitioning.
//!
//! Boundaries balance `out_degree(v) + alpha` per chunk: alpha biases the
//! split toward vertex count so hub-heavy graphs cannot starve a partition
//! of vertices. The same routine produces the global partition boundaries
//! and the per-process NUMA sub-boundaries.

use crate::types::{EdgeId, VertexId};

/// Split `[start, end)` into `chunks` ranges of approximately equal
/// `sum(out_degree + alpha)` weight. Returns `chunks + 1` boundaries with
/// `r[0] == start` and `r[chunks] == end`; every interior boundary is
/// floor-aligned to `page_vertices`.
pub fn locality_aware_chunks(
    out_degree: &[VertexId],
    start: VertexId,
    end: VertexId,
    chunks: usize,
    alpha: u64,
    page_vertices: VertexId,
) -> Vec<VertexId> {
    debug_assert!(start <= end);
    debug_assert!(chunks > 0);
    debug_assert!(page_vertices > 0);

    let mut offsets = vec![start; chunks + 1];
    let mut remaining: u64 = (start..end)
        .map(|v| out_degree[v as usize] as u64 + alpha)
        .sum();

    for i in 0..chunks {
        let remaining_chunks = (chunks - i) as u64;
        if remaining_chunks == 1 {
            offsets[i + 1] = end;
        } else {
            let expected = remaining / remaining_chunks;
            let mut got: u64 = 0;
            let mut boundary = end;
            for v in offsets[i]..end {
                got += out_degree[v as usize] as u64 + alpha;
                if got > expected {
                    boundary = v;
                    break;
                }
            }
            offsets[i + 1] = boundary / page_vertices * page_vertices;
            // A boundary can floor below its chunk start only when the start
            // itself is unaligned, which never happens: starts are aligned
            // boundaries themselves.
            offsets[i + 1] = offsets[i + 1].max(offsets[i]);
        }
        for v in offsets[i]..offsets[i + 1] {
            remaining -= out_degree[v as usize] as u64 + alpha;
        }
    }
    debug_assert_eq!(offsets[chunks], end);
    offsets
}

/// Partition containing `v` under monotone `offsets` (length `n + 1`).
/// Empty partitions are skipped; `v` must lie in `[offsets[0], offsets[n])`.
pub fn find_partition(offsets: &[VertexId], v: VertexId) -> usize {
    debug_assert!(offsets.len() >= 2);
    debug_assert!(v >= offsets[0] && v < offsets[offsets.len() - 1]);
    let upper = offsets.partition_point(|&b| b <= v);
    upper - 1
}

/// Total `sum(out_degree)` over a boundary range, used for NUMA
/// sub-partitioning and chunk tuning.
pub fn range_edges(out_degree: &[VertexId], start: VertexId, end: VertexId) -> EdgeId {
    (start..end).map(|v| out_degree[v as usize] as EdgeId).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_closure(offsets: &[VertexId], start: VertexId, end: VertexId, page: VertexId) {
        assert_eq!(offsets[0], start);
        assert_eq!(*offsets.last().unwrap(), end);
        for w in offsets.windows(2) {
            assert!(w[0] <= w[1]);
        }
        for &b in &offsets[1..offsets.len() - 1] {
            assert_eq!(b % page, 0);
        }
    }

    #[test]
    fn covers_range_and_aligns() {
        let deg: Vec<VertexId> = (0..1000).map(|v| (v % 7) as VertexId).collect();
        let offsets = locality_aware_chunks(&deg, 0, 1000, 4, 8, 64);
        check_closure(&offsets, 0, 1000, 64);
    }

    #[test]
    fn single_chunk_is_whole_range() {
        let deg = vec![1u32; 100];
        let offsets = locality_aware_chunks(&deg, 0, 100, 1, 8, 4096);
        assert_eq!(offsets, vec![0, 100]);
    }

    #[test]
    fn alpha_balances_vertex_counts() {
        // One hub with every edge; a large alpha should still hand the
        // second chunk a substantial vertex range.
        let mut deg = vec![0u32; 256];
        deg[0] = 10_000;
        let offsets = locality_aware_chunks(&deg, 0, 256, 2, 1000, 1);
        assert!(offsets[1] > 16, "alpha failed to bias: {offsets:?}");
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let deg: Vec<VertexId> = (0..512).map(|v| (v * 31 % 13) as VertexId).collect();
        let a = locality_aware_chunks(&deg, 0, 512, 3, 16, 8);
        let b = locality_aware_chunks(&deg, 0, 512, 3, 16, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn find_partition_handles_empty_chunks() {
        let offsets = vec![0, 64, 64, 128];
        assert_eq!(find_partition(&offsets, 0), 0);
        assert_eq!(find_partition(&offsets, 63), 0);
        // Partition 1 is empty; vertex 64 belongs to partition 2.
        assert_eq!(find_partition(&offsets, 64), 2);
        assert_eq!(find_partition(&offsets, 127), 2);
    }

    #[test]
    fn tiny_graph_with_unit_pages() {
        let deg = vec![1u32, 1, 1];
        let offsets = locality_aware_chunks(&deg, 0, 3, 2, 8, 1);
        check_closure(&offsets, 0, 3, 1);
        assert!(offsets[1] >= 1 && offsets[1] <= 2);
    }
}
