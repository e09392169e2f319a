//! Core identifier and wire-unit types.
//!
//! Every unit that crosses a partition boundary (edge records on the shuffle
//! path, adjacency units in remote windows, message units in exchange
//! buffers) is a packed POD struct so buffers can be reinterpreted as bytes
//! without copies or padding leaks.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Dense vertex identifier in `[0, V)`.
pub type VertexId = u32;
/// Edge identifier / edge-array offset.
pub type EdgeId = u64;
/// Process rank. The first `C` ranks are compute partitions, the rest are
/// far-memory partitions.
pub type PartitionId = usize;
/// NUMA socket index within one process.
pub type SocketId = usize;

/// Sentinel for "no vertex" (BFS parents and similar).
pub const INVALID_VERTEX: VertexId = VertexId::MAX;

/// Bound for per-edge payload types. `Empty` gives unweighted graphs a
/// zero-sized payload with a 4-byte adjacency unit.
pub trait EdgeData: Pod + Send + Sync + 'static {}
impl<T: Pod + Send + Sync + 'static> EdgeData for T {}

/// Zero-sized edge payload for unweighted graphs.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Empty;

// SAFETY: zero-sized, no bytes to be uninitialised or invalid.
unsafe impl Zeroable for Empty {}
unsafe impl Pod for Empty {}

/// One adjacency entry: the neighbour plus the edge payload, packed.
#[repr(C, packed)]
pub struct AdjUnit<E> {
    pub neighbour: VertexId,
    pub data: E,
}

impl<E: EdgeData> Clone for AdjUnit<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: EdgeData> Copy for AdjUnit<E> {}

// SAFETY: `repr(C, packed)` leaves no padding and both fields are Pod.
unsafe impl<E: EdgeData> Zeroable for AdjUnit<E> {}
unsafe impl<E: EdgeData> Pod for AdjUnit<E> {}

impl<E: EdgeData + fmt::Debug> fmt::Debug for AdjUnit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let neighbour = self.neighbour;
        let data = self.data;
        f.debug_struct("AdjUnit")
            .field("neighbour", &neighbour)
            .field("data", &data)
            .finish()
    }
}

impl<E: EdgeData + PartialEq> PartialEq for AdjUnit<E> {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.neighbour, other.neighbour);
        let (da, db) = (self.data, other.data);
        a == b && da == db
    }
}

/// One record of the on-disk edge file: `(src, dst, payload)`, packed.
#[repr(C, packed)]
pub struct EdgeRecord<E> {
    pub src: VertexId,
    pub dst: VertexId,
    pub data: E,
}

impl<E: EdgeData> Clone for EdgeRecord<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: EdgeData> Copy for EdgeRecord<E> {}

// SAFETY: as for `AdjUnit` -- packed, Pod fields only.
unsafe impl<E: EdgeData> Zeroable for EdgeRecord<E> {}
unsafe impl<E: EdgeData> Pod for EdgeRecord<E> {}

impl<E: EdgeData + fmt::Debug> fmt::Debug for EdgeRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (src, dst) = (self.src, self.dst);
        let data = self.data;
        f.debug_struct("EdgeRecord")
            .field("src", &src)
            .field("dst", &dst)
            .field("data", &data)
            .finish()
    }
}

impl<E: EdgeData> EdgeRecord<E> {
    pub fn swapped(self) -> Self {
        EdgeRecord {
            src: self.dst,
            dst: self.src,
            data: self.data,
        }
    }
}

/// Entry of the compressed adjacency index: a vertex that has at least one
/// edge in this shard and the start of its range in the packed edge list.
/// The trailing sentinel at position `n` carries the shard's edge count.
#[repr(C, packed)]
pub struct CompressedAdjIndex {
    pub vertex: VertexId,
    pub index: EdgeId,
}

impl Clone for CompressedAdjIndex {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for CompressedAdjIndex {}

// SAFETY: packed u32 + u64, no padding.
unsafe impl Zeroable for CompressedAdjIndex {}
unsafe impl Pod for CompressedAdjIndex {}

impl fmt::Debug for CompressedAdjIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (vertex, index) = (self.vertex, self.index);
        f.debug_struct("CompressedAdjIndex")
            .field("vertex", &vertex)
            .field("index", &index)
            .finish()
    }
}

impl PartialEq for CompressedAdjIndex {
    fn eq(&self, other: &Self) -> bool {
        let (va, vb) = (self.vertex, other.vertex);
        let (ia, ib) = (self.index, other.index);
        va == vb && ia == ib
    }
}

/// Scalar reduction type returned by the engine's parallel operations.
/// Folded locally per thread, then all-reduced (SUM) across the compute
/// communicator.
pub trait Reducer: Pod + Send + Sync + 'static {
    fn zero() -> Self;
    fn combine(self, other: Self) -> Self;
}

macro_rules! impl_reducer {
    ($($t:ty),*) => {
        $(impl Reducer for $t {
            fn zero() -> Self { 0 as $t }
            fn combine(self, other: Self) -> Self { self + other }
        })*
    };
}

impl_reducer!(u32, u64, i32, i64, usize, f32, f64);
