//! Three-tier software cache over remote adjacency.
//!
//! Bitmap and index mirrors are full-size and preloaded once at load
//! completion; the graph is immutable, so every later lookup is a plain
//! read. The edge cache is a bounded direct-mapped table keyed by
//! `v mod entries`; a slot holds `vtx = v + 1` once its span is published,
//! so the zero-initialised state means empty. A colliding fill overwrites
//! the slot; there is no LRU and no refcount.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::bitmap::{bit_offset, word_offset};
use crate::comm::RemoteWindow;
use crate::error::Result;
use crate::types::{AdjUnit, EdgeData, EdgeId, VertexId};

pub struct CacheLine<E: EdgeData> {
    /// `v + 1` when the slot holds `v`'s span; 0 when empty.
    pub vtx: VertexId,
    pub edges: Vec<AdjUnit<E>>,
}

pub struct EdgeCacheSlot<E: EdgeData> {
    pub line: RwLock<CacheLine<E>>,
}

/// Caches for one (remote partition, socket) pair.
pub struct RemoteAdjCache<E: EdgeData> {
    bitmap: Vec<u64>,
    index: Vec<EdgeId>,
    slots: Box<[EdgeCacheSlot<E>]>,
}

impl<E: EdgeData> RemoteAdjCache<E> {
    /// Mirror the remote bitmap and index in full, and allocate the edge
    /// table eagerly (`entries` slots; zero disables the edge cache).
    pub fn preload<W: RemoteWindow>(
        remote: usize,
        vertices: VertexId,
        entries: usize,
        bitmap_win: &W,
        index_win: &W,
    ) -> Result<Self> {
        let words = vertices as usize / 64 + 1;
        let mut bitmap = vec![0u64; words];
        bitmap_win.get_elems(remote, 0, &mut bitmap)?;
        bitmap_win.flush(remote)?;
        let mut index = vec![0 as EdgeId; vertices as usize + 1];
        index_win.get_elems(remote, 0, &mut index)?;
        index_win.flush(remote)?;
        let slots = (0..entries)
            .map(|_| EdgeCacheSlot {
                line: RwLock::new(CacheLine {
                    vtx: 0,
                    edges: Vec::new(),
                }),
            })
            .collect();
        Ok(RemoteAdjCache {
            bitmap,
            index,
            slots,
        })
    }

    #[inline]
    pub fn has_edges(&self, v: VertexId) -> bool {
        self.bitmap[word_offset(v)] & (1u64 << bit_offset(v)) != 0
    }

    /// Edge-list range of `v` on the remote shard.
    #[inline]
    pub fn edge_range(&self, v: VertexId) -> (EdgeId, EdgeId) {
        (self.index[v as usize], self.index[v as usize + 1])
    }

    #[inline]
    pub fn entries(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot_of(&self, v: VertexId) -> &EdgeCacheSlot<E> {
        &self.slots[v as usize % self.slots.len()]
    }
}

/// Hit/miss counters, carried per graph rather than as process globals.
#[derive(Default)]
pub struct CacheStats {
    pub bitmap_lookups: AtomicU64,
    pub index_lookups: AtomicU64,
    pub edge_hits: AtomicU64,
    pub edge_misses: AtomicU64,
}

impl CacheStats {
    pub fn record_bitmap_lookup(&self) {
        self.bitmap_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_lookup(&self) {
        self.index_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_hit(&self) {
        self.edge_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_miss(&self) {
        self.edge_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn edge_hit_rate(&self) -> f64 {
        let hits = self.edge_hits.load(Ordering::Relaxed);
        let misses = self.edge_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.bitmap_lookups.load(Ordering::Relaxed),
            self.index_lookups.load(Ordering::Relaxed),
            self.edge_hits.load(Ordering::Relaxed),
            self.edge_misses.load(Ordering::Relaxed),
        )
    }
}
