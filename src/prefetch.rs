//! Producer/consumer edge prefetch pipeline.
//!
//! Delegated sparse-slot workers push `(v, remote, range, socket)` requests
//! into per-worker bounded rings; a single prefetch thread scans the rings,
//! skips slots already populated for the requested vertex, issues the
//! remote reads, and after flushing each (rank, socket) group publishes the
//! filled slots in issue order. Workers spin on the slot's publication flag
//! and never block on I/O themselves.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::Zeroable;
use crossbeam::queue::ArrayQueue;

use crate::cache::RemoteAdjCache;
use crate::cache::CacheStats;
use crate::comm::RemoteWindow;
use crate::error::Result;
use crate::types::{EdgeData, EdgeId, VertexId};

pub const RING_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct PrefetchRequest {
    pub vertex: VertexId,
    pub remote: usize,
    pub start: EdgeId,
    pub end: EdgeId,
    pub socket: usize,
}

pub type FetchRing = ArrayQueue<PrefetchRequest>;

pub fn make_rings(workers: usize) -> Vec<FetchRing> {
    (0..workers).map(|_| ArrayQueue::new(RING_CAPACITY)).collect()
}

/// Push with ring back-pressure: spin until a slot frees up.
pub fn submit(ring: &FetchRing, mut req: PrefetchRequest) {
    loop {
        match ring.push(req) {
            Ok(()) => return,
            Err(r) => {
                req = r;
                std::hint::spin_loop();
            }
        }
    }
}

/// Caches for the delegated partitions, keyed by remote rank then socket.
pub trait CacheLookup<E: EdgeData> {
    fn cache(&self, remote: usize, socket: usize) -> &RemoteAdjCache<E>;
}

/// The prefetch loop. Exits once the termination flag is set and every
/// ring has drained.
pub fn run_prefetcher<E, W, L>(
    rings: &[FetchRing],
    caches: &L,
    list_windows: &[W],
    stats: &CacheStats,
    terminate: &AtomicBool,
) -> Result<()>
where
    E: EdgeData,
    W: RemoteWindow,
    L: CacheLookup<E>,
{
    let unit = std::mem::size_of::<crate::types::AdjUnit<E>>();
    // Slots filled this scan, published only after their group's flush.
    let mut pending: Vec<PrefetchRequest> = Vec::new();
    let mut flush_groups: HashSet<(usize, usize)> = HashSet::new();
    loop {
        let mut drained = true;
        for ring in rings {
            while let Some(req) = ring.pop() {
                drained = false;
                let cache = caches.cache(req.remote, req.socket);
                let slot = cache.slot_of(req.vertex);
                {
                    let line = slot.line.read();
                    if line.vtx == req.vertex + 1 {
                        stats.record_edge_hit();
                        continue;
                    }
                }
                stats.record_edge_miss();
                let n = (req.end - req.start) as usize;
                {
                    let mut line = slot.line.write();
                    // Invalidate before the read lands so a stale hit
                    // cannot be observed mid-fill.
                    line.vtx = 0;
                    line.edges.resize(n, crate::types::AdjUnit::zeroed());
                    let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut line.edges);
                    list_windows[req.socket].get(
                        req.remote,
                        req.start * unit as u64,
                        dst,
                    )?;
                }
                flush_groups.insert((req.remote, req.socket));
                pending.push(req);
            }
        }
        // One flush per (rank, socket) group per scan, then publish the
        // group's slots in issue order.
        for &(remote, socket) in flush_groups.iter() {
            list_windows[socket].flush(remote)?;
        }
        flush_groups.clear();
        for req in pending.drain(..) {
            let cache = caches.cache(req.remote, req.socket);
            let mut line = cache.slot_of(req.vertex).line.write();
            line.vtx = req.vertex + 1;
        }
        if drained && terminate.load(Ordering::Acquire) {
            return Ok(());
        }
        if drained {
            std::hint::spin_loop();
        }
    }
}
