//! Worker pool and work-stealing state.
//!
//! A fixed pool of `threads_per_socket * sockets` workers, pinned to cores
//! socket-major. Parallel regions run as pool broadcasts; inside them each
//! worker claims `BASIC_CHUNK`-sized ranges off its own `ThreadState` by
//! fetch-add, then steals from peers still marked `Working`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use rayon::ThreadPool;
use tracing::warn;

use crate::error::{GaleError, Result};
use crate::types::{EdgeId, VertexId};

/// Work-stealing granularity: one 64-bit word of the active bitmap, or 64
/// message units.
pub const BASIC_CHUNK: usize = 64;

pub const WORKING: u8 = 0;
pub const STEALING: u8 = 1;

/// `(curr, end, status)` triple; `curr` advances by atomic fetch-add, which
/// is the linearisation point for both the owner and thieves.
pub struct ThreadState {
    pub curr: AtomicUsize,
    pub end: AtomicUsize,
    pub status: AtomicU8,
}

impl ThreadState {
    pub fn new() -> Self {
        ThreadState {
            curr: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            status: AtomicU8::new(STEALING),
        }
    }

    pub fn assign(&self, curr: usize, end: usize) {
        self.curr.store(curr, Ordering::Relaxed);
        self.end.store(end, Ordering::Relaxed);
        self.status.store(WORKING, Ordering::Release);
    }

    /// Claim the next chunk; returns its start. The caller compares against
    /// `end()` and stops past it, so over-claiming is harmless.
    #[inline]
    pub fn claim(&self, chunk: usize) -> usize {
        self.curr.fetch_add(chunk, Ordering::Relaxed)
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_working(&self) -> bool {
        self.status.load(Ordering::Acquire) == WORKING
    }

    pub fn enter_stealing(&self) {
        self.status.store(STEALING, Ordering::Release);
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Static per-thread range used by the tuned dense sweeps; copied into the
/// live `ThreadState` at the start of each step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRange {
    pub curr: usize,
    pub end: usize,
}

pub struct WorkerPool {
    pool: ThreadPool,
    sockets: usize,
    threads_per_socket: usize,
}

impl WorkerPool {
    pub fn new(sockets: usize, threads_per_socket: usize) -> Result<Self> {
        let threads = sockets * threads_per_socket;
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        if core_ids.is_empty() {
            warn!("no core ids available; workers run unpinned");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gale-worker-{i}"))
            .start_handler(move |i| {
                if !core_ids.is_empty() {
                    // Socket-major layout: consecutive workers share a
                    // socket, mirroring the NUMA sub-partitioning.
                    let id = core_ids[i % core_ids.len()];
                    core_affinity::set_for_current(id);
                }
            })
            .build()
            .map_err(|e| GaleError::config(format!("worker pool: {e}")))?;
        Ok(WorkerPool {
            pool,
            sockets,
            threads_per_socket,
        })
    }

    pub fn threads(&self) -> usize {
        self.sockets * self.threads_per_socket
    }

    pub fn sockets(&self) -> usize {
        self.sockets
    }

    pub fn threads_per_socket(&self) -> usize {
        self.threads_per_socket
    }

    #[inline]
    pub fn socket_of(&self, thread: usize) -> usize {
        thread / self.threads_per_socket
    }

    #[inline]
    pub fn socket_offset_of(&self, thread: usize) -> usize {
        thread % self.threads_per_socket
    }

    /// Run `f` on every worker simultaneously; returns per-thread results
    /// indexed by worker id.
    pub fn broadcast<R, F>(&self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        self.pool.broadcast(|ctx| f(ctx.index()))
    }
}

/// Even split of `[0, total)` among the workers of one socket, in
/// basic-chunk units; the socket's last worker absorbs the remainder.
pub fn even_split(total: usize, threads_per_socket: usize, socket_offset: usize) -> ChunkRange {
    let per = total / threads_per_socket / BASIC_CHUNK * BASIC_CHUNK;
    let curr = per * socket_offset;
    let end = if socket_offset == threads_per_socket - 1 {
        total
    } else {
        per * (socket_offset + 1)
    };
    ChunkRange { curr, end }
}

/// Pre-computed per-thread chunks for a dense sweep of one destination
/// partition: balance `edge_count + alpha` per compressed-index entry
/// within each socket.
///
/// `compressed` holds, per socket, the compressed adjacency index
/// (`len = n + 1` with the trailing sentinel).
pub fn tune_chunks(
    compressed: &[Vec<crate::types::CompressedAdjIndex>],
    partition_offset: &[VertexId],
    partition: usize,
    sockets: usize,
    threads_per_socket: usize,
    alpha: u64,
) -> Vec<ChunkRange> {
    let threads = sockets * threads_per_socket;
    let mut out = vec![ChunkRange::default(); threads];
    for s_i in 0..sockets {
        let comp = &compressed[s_i];
        let n = comp.len() - 1;
        // Entry range covering this partition's vertex span.
        let mut first = 0;
        while first < n && { comp[first].vertex } < partition_offset[partition] {
            first += 1;
        }
        let mut last = first;
        while last < n && { comp[last].vertex } < partition_offset[partition + 1] {
            last += 1;
        }
        let weight = |p: usize| -> u64 {
            let lo = comp[p].index;
            let hi = comp[p + 1].index;
            (hi - lo) as u64 + alpha
        };
        let mut remaining: u64 = (first..last).map(weight).sum();
        let mut cursor = first;
        for s_j in 0..threads_per_socket {
            let t = s_i * threads_per_socket + s_j;
            let remaining_threads = (threads_per_socket - s_j) as u64;
            let start = cursor;
            let end;
            if remaining_threads == 1 {
                end = last;
            } else {
                let expected = remaining / remaining_threads;
                let mut got: u64 = 0;
                let mut stop = last;
                for p in start..last {
                    got += weight(p);
                    if got >= expected {
                        stop = p;
                        break;
                    }
                }
                end = stop;
            }
            let got: u64 = (start..end).map(weight).sum();
            remaining -= got;
            cursor = end;
            out[t] = ChunkRange { curr: start, end };
        }
    }
    out
}
