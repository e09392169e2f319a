use serde::{Deserialize, Serialize};

use crate::error::{GaleError, Result};
use crate::types::VertexId;

/// Round-classification policy for `process_edges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    /// Every round runs the sparse protocol.
    Sparse,
    /// Rounds run dense when `active_edges >= edges / 20` and every
    /// partition is a compute partition; sparse otherwise. The dense path
    /// has no delegation protocol, so far-memory topologies always
    /// classify sparse.
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total partition count `P` (world size). Must match the communicator.
    pub partitions: usize,
    /// Compute partition count `C <= P`; ranks `[C, P)` are far-memory.
    pub compute_partitions: usize,
    /// NUMA sockets per process.
    pub sockets: usize,
    /// Worker threads pinned to each socket.
    pub threads_per_socket: usize,
    /// Per-vertex workload bias for the partitioner. `None` selects the
    /// default `8 * (P - 1)`.
    pub alpha: Option<u64>,
    /// Direct-mapped edge-cache slots per (remote partition, socket).
    /// Zero disables the edge cache and the prefetch pipeline; delegated
    /// reads then go straight to the remote window.
    pub edge_cache_entries: usize,
    /// Partition boundaries are floor-aligned to this many vertices.
    /// Defaults to one system page expressed in `VertexId` units.
    pub page_vertices: VertexId,
    /// Units buffered per thread before flushing into a send arena.
    pub local_send_buffer_limit: usize,
    pub mode: EngineMode,
}

fn default_page_vertices() -> VertexId {
    (page_size() / std::mem::size_of::<VertexId>()) as VertexId
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        EngineConfig {
            partitions: 1,
            compute_partitions: 1,
            sockets: 1,
            threads_per_socket: threads.max(1),
            alpha: None,
            edge_cache_entries: 1 << 16,
            page_vertices: default_page_vertices(),
            local_send_buffer_limit: 16,
            mode: EngineMode::Sparse,
        }
    }
}

impl EngineConfig {
    /// Single process, pure compute. The engine degenerates to shared-memory
    /// execution with no delegated work.
    pub fn single_process() -> Self {
        EngineConfig::default()
    }

    /// `compute` compute partitions fronting `partitions - compute`
    /// far-memory partitions.
    pub fn far_memory(compute: usize, partitions: usize) -> Self {
        EngineConfig {
            partitions,
            compute_partitions: compute,
            ..EngineConfig::default()
        }
    }

    pub fn threads(&self) -> usize {
        self.sockets * self.threads_per_socket
    }

    pub fn alpha(&self) -> u64 {
        self.alpha
            .unwrap_or_else(|| 8 * (self.partitions.saturating_sub(1)) as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(GaleError::config("partitions must be positive"));
        }
        if self.compute_partitions == 0 || self.compute_partitions > self.partitions {
            return Err(GaleError::config(format!(
                "compute partitions must lie in [1, {}], got {}",
                self.partitions, self.compute_partitions
            )));
        }
        if self.sockets == 0 || self.threads_per_socket == 0 {
            return Err(GaleError::config(
                "sockets and threads_per_socket must be positive",
            ));
        }
        if self.page_vertices == 0 {
            return Err(GaleError::config("page_vertices must be positive"));
        }
        if self.local_send_buffer_limit == 0 {
            return Err(GaleError::config(
                "local_send_buffer_limit must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn alpha_default_tracks_partitions() {
        let cfg = EngineConfig::far_memory(2, 4);
        assert_eq!(cfg.alpha(), 24);
        let cfg = EngineConfig {
            alpha: Some(3),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.alpha(), 3);
    }

    #[test]
    fn rejects_more_compute_than_partitions() {
        let cfg = EngineConfig {
            partitions: 2,
            compute_partitions: 3,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn page_vertices_positive() {
        assert!(default_page_vertices() >= 1);
    }
}
