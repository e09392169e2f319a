//! Message exchange buffers.
//!
//! Each (partition, socket) pair owns a byte arena of packed `MsgUnit`s.
//! Signal workers append concurrently: a fetch-add on the length reserves a
//! disjoint byte range, then the payload is copied in. Readers only touch
//! the arena after a happens-before edge (thread join or the recv-queue
//! handoff), so no torn reads are observable. Arenas are sized for the
//! round's worst case before any append and grow monotonically across
//! rounds.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::{Pod, Zeroable};
use crossbeam::utils::CachePadded;

use crate::error::{GaleError, Result};
use crate::types::VertexId;

/// One routed message: destination-or-source vertex plus the payload.
#[repr(C, packed)]
pub struct MsgUnit<M> {
    pub vertex: VertexId,
    pub msg: M,
}

impl<M: Pod> Clone for MsgUnit<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Pod> Copy for MsgUnit<M> {}

// SAFETY: packed layout, Pod fields, no padding.
unsafe impl<M: Pod> Zeroable for MsgUnit<M> {}
unsafe impl<M: Pod> Pod for MsgUnit<M> {}

impl<M: Pod + fmt::Debug> fmt::Debug for MsgUnit<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (vertex, msg) = (self.vertex, self.msg);
        f.debug_struct("MsgUnit")
            .field("vertex", &vertex)
            .field("msg", &msg)
            .finish()
    }
}

/// A send or receive arena for one (partition, socket) pair.
///
/// Holds a prefix of `owned` units emitted for locally owned vertices,
/// followed by delegated sub-ranges whose unit offsets are recorded in
/// `delegated_start`; entry `partitions` is the trailing sentinel.
pub struct MessageBuffer {
    data: UnsafeCell<Vec<u8>>,
    len: AtomicUsize,
    unit: AtomicUsize,
    owned: AtomicUsize,
    delegated_start: Box<[AtomicUsize]>,
}

// SAFETY: concurrent writers append to disjoint reserved ranges; readers
// are separated from writers by joins or the recv-queue mutex handoff.
unsafe impl Sync for MessageBuffer {}
unsafe impl Send for MessageBuffer {}

impl MessageBuffer {
    pub fn new(partitions: usize) -> Self {
        MessageBuffer {
            data: UnsafeCell::new(Vec::new()),
            len: AtomicUsize::new(0),
            unit: AtomicUsize::new(1),
            owned: AtomicUsize::new(0),
            delegated_start: (0..=partitions).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Prepare the arena for a round: fix the unit size, guarantee
    /// capacity for `capacity_units`, and zero all counters. Requires
    /// exclusive access; rounds start single-threaded.
    pub fn reset(&mut self, unit: usize, capacity_units: usize) {
        debug_assert!(unit > 0);
        let data = self.data.get_mut();
        let needed = unit * capacity_units;
        if data.len() < needed {
            data.resize(needed, 0);
        }
        self.unit.store(unit, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.owned.store(0, Ordering::Relaxed);
        for d in self.delegated_start.iter() {
            d.store(0, Ordering::Relaxed);
        }
    }

    pub fn unit(&self) -> usize {
        self.unit.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> usize {
        // SAFETY: reading the Vec's length; the Vec itself is only resized
        // under exclusive access in `reset`.
        unsafe { (*self.data.get()).len() }
    }

    /// Reserve space for `bytes` and copy it in. Returns the unit position
    /// of the first copied unit. Panics if the reservation overruns the
    /// arena; capacities are sized for the worst case before any append,
    /// so an overrun is a sizing bug, not a recoverable condition.
    pub fn append_bytes(&self, bytes: &[u8]) -> usize {
        let unit = self.unit();
        debug_assert_eq!(bytes.len() % unit, 0);
        let start = self.len.fetch_add(bytes.len(), Ordering::Relaxed);
        let end = start + bytes.len();
        let cap = self.capacity_bytes();
        assert!(
            end <= cap,
            "message arena overrun: [{start}, {end}) exceeds capacity {cap}"
        );
        // SAFETY: [start, end) is exclusively reserved by the fetch-add
        // above and lies within the allocation checked against `cap`.
        unsafe {
            let base = (*self.data.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), bytes.len());
        }
        start / unit
    }

    /// Overwrite the arena front with a received payload. Single-writer:
    /// only the receiver thread for this buffer's step calls this.
    pub fn fill_from(&self, bytes: &[u8]) -> Result<usize> {
        let unit = self.unit();
        if bytes.len() % unit != 0 {
            return Err(GaleError::protocol(format!(
                "received {} bytes, not a multiple of the {unit}-byte unit",
                bytes.len()
            )));
        }
        if bytes.len() > self.capacity_bytes() {
            return Err(GaleError::protocol(format!(
                "received {} bytes into an arena of {}",
                bytes.len(),
                self.capacity_bytes()
            )));
        }
        // SAFETY: single writer during the receive window; readers are
        // gated behind the recv-queue handoff.
        unsafe {
            let base = (*self.data.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base, bytes.len());
        }
        let units = bytes.len() / unit;
        self.len.store(bytes.len(), Ordering::Release);
        Ok(units)
    }

    pub fn len_units(&self) -> usize {
        self.len.load(Ordering::Acquire) / self.unit()
    }

    /// Typed view of the appended prefix.
    ///
    /// Callers must hold a happens-before edge over every append (thread
    /// join or queue handoff); the engine's phase structure provides it.
    pub fn units<M: Pod>(&self) -> &[MsgUnit<M>] {
        let bytes = self.len.load(Ordering::Acquire);
        debug_assert_eq!(self.unit(), std::mem::size_of::<MsgUnit<M>>());
        // SAFETY: [0, bytes) is fully written (see above) and the Vec is
        // not resized outside exclusive phases.
        let slice = unsafe { &(&*self.data.get())[..bytes] };
        bytemuck::cast_slice(slice)
    }

    /// Raw view of a unit sub-range, for the sender thread.
    pub fn unit_range_bytes(&self, start_unit: usize, end_unit: usize) -> &[u8] {
        let unit = self.unit();
        let (a, b) = (start_unit * unit, end_unit * unit);
        debug_assert!(a <= b && b <= self.len.load(Ordering::Acquire));
        // SAFETY: as for `units`.
        unsafe { &(&*self.data.get())[a..b] }
    }

    pub fn owned_count(&self) -> usize {
        self.owned.load(Ordering::Acquire)
    }

    pub fn set_owned_count(&self, units: usize) {
        self.owned.store(units, Ordering::Release);
    }

    pub fn delegated_start(&self, partition: usize) -> usize {
        self.delegated_start[partition].load(Ordering::Acquire)
    }

    pub fn set_delegated_start(&self, partition: usize, units: usize) {
        self.delegated_start[partition].store(units, Ordering::Release);
    }
}

/// Fixed-capacity per-thread coalescing buffer; flushed into the target
/// arena when `limit` units accumulate.
pub struct ThreadBuffer {
    data: Vec<u8>,
    unit: usize,
    count: usize,
    limit: usize,
}

impl ThreadBuffer {
    pub fn new() -> Self {
        ThreadBuffer {
            data: Vec::new(),
            unit: 1,
            count: 0,
            limit: 0,
        }
    }

    pub fn reset(&mut self, unit: usize, limit: usize) {
        let needed = unit * limit;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.unit = unit;
        self.limit = limit;
        self.count = 0;
    }

    /// Append one unit; returns true when the buffer is now full.
    pub fn push(&mut self, unit_bytes: &[u8]) -> bool {
        debug_assert_eq!(unit_bytes.len(), self.unit);
        debug_assert!(self.count < self.limit);
        let at = self.count * self.unit;
        self.data[at..at + self.unit].copy_from_slice(unit_bytes);
        self.count += 1;
        self.count == self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.count * self.unit]
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}

impl Default for ThreadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread slots with interior mutability.
///
/// Invariant: slot `i` is touched only by worker thread `i` during parallel
/// phases, or by the orchestrating thread while no workers run.
pub(crate) struct PerThread<T> {
    slots: Box<[CachePadded<UnsafeCell<T>>]>,
}

// SAFETY: see the exclusivity invariant above.
unsafe impl<T: Send> Sync for PerThread<T> {}
unsafe impl<T: Send> Send for PerThread<T> {}

impl<T> PerThread<T> {
    pub fn new(n: usize, mut init: impl FnMut() -> T) -> Self {
        PerThread {
            slots: (0..n)
                .map(|_| CachePadded::new(UnsafeCell::new(init())))
                .collect(),
        }
    }

    /// Run `f` with exclusive access to slot `idx`; the caller upholds the
    /// one-thread-per-slot invariant.
    pub fn with<R>(&self, idx: usize, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: exclusivity per the type invariant.
        unsafe { f(&mut *self.slots[idx].get()) }
    }
}

/// Handle passed to signal kernels; `emit` routes one message through the
/// calling worker's coalescing buffer into the current target partition's
/// arena for the worker's socket.
pub struct EmitCtx<'a, M: Pod> {
    pub(crate) local: &'a PerThread<ThreadBuffer>,
    pub(crate) send: &'a [Vec<MessageBuffer>],
    pub(crate) current_part: &'a AtomicUsize,
    pub(crate) threads_per_socket: usize,
    pub(crate) _marker: PhantomData<M>,
}

impl<M: Pod> EmitCtx<'_, M> {
    pub fn emit(&self, vertex: VertexId, msg: M) {
        let t = rayon::current_thread_index().unwrap_or(0);
        let unit = MsgUnit { vertex, msg };
        let bytes = bytemuck::bytes_of(&unit);
        self.local.with(t, |tb| {
            if tb.push(bytes) {
                let part = self.current_part.load(Ordering::Relaxed);
                let socket = t / self.threads_per_socket;
                self.send[part][socket].append_bytes(tb.filled());
                tb.clear();
            }
        });
    }

    /// Drain thread `t`'s buffer into the current target arena. Called
    /// between parallel phases and from the per-thread flush region.
    pub(crate) fn flush_thread(&self, t: usize) {
        self.local.with(t, |tb| {
            if !tb.is_empty() {
                let part = self.current_part.load(Ordering::Relaxed);
                let socket = t / self.threads_per_socket;
                self.send[part][socket].append_bytes(tb.filled());
                tb.clear();
            }
        });
    }
}
