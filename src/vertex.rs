//! Process-local vertex arrays.
//!
//! Algorithm state lives in arrays of length `V` whose cells are lock-free
//! atomics, so slot kernels running on distinct vertices may update them
//! concurrently without coordination. Placement is first-touch: the fill
//! paths walk owned and delegated ranges from socket-pinned workers.

use bytemuck::Pod;
use crossbeam::atomic::AtomicCell;

use crate::types::VertexId;

pub struct VertexArray<T: Pod + Send> {
    cells: Box<[AtomicCell<T>]>,
}

impl<T: Pod + Send> VertexArray<T> {
    pub fn new(len: VertexId) -> Self {
        let cells = (0..len).map(|_| AtomicCell::new(T::zeroed())).collect();
        VertexArray { cells }
    }

    pub fn len(&self) -> VertexId {
        self.cells.len() as VertexId
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, v: VertexId) -> T {
        self.cells[v as usize].load()
    }

    #[inline]
    pub fn set(&self, v: VertexId, value: T) {
        self.cells[v as usize].store(value);
    }

    /// Atomic read-modify-write; returns the previous value.
    #[inline]
    pub fn update(&self, v: VertexId, f: impl Fn(T) -> T) -> T {
        let cell = &self.cells[v as usize];
        loop {
            let prev = cell.load();
            if cell.compare_exchange_bytes(prev, f(prev)) {
                return prev;
            }
        }
    }

    pub fn fill_range(&self, start: VertexId, end: VertexId, value: T) {
        for v in start..end {
            self.cells[v as usize].store(value);
        }
    }

    pub fn snapshot_range(&self, start: VertexId, end: VertexId) -> Vec<T> {
        (start..end).map(|v| self.get(v)).collect()
    }

    pub fn store_range(&self, start: VertexId, values: &[T]) {
        for (i, v) in values.iter().enumerate() {
            self.cells[start as usize + i].store(*v);
        }
    }
}

/// Transparent wrapper giving any `Pod` type a byte-wise `Eq`, so it can be
/// driven through `AtomicCell::compare_exchange` even for payloads (like
/// floats) whose native `==` is not reflexive.
#[derive(Clone, Copy)]
#[repr(transparent)]
struct Bytewise<T>(T);

impl<T: Pod> PartialEq for Bytewise<T> {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(&self.0) == bytemuck::bytes_of(&other.0)
    }
}

impl<T: Pod> Eq for Bytewise<T> {}

trait CellCasExt<T> {
    fn compare_exchange_bytes(&self, current: T, new: T) -> bool;
}

impl<T: Pod> CellCasExt<T> for AtomicCell<T> {
    #[inline]
    fn compare_exchange_bytes(&self, current: T, new: T) -> bool {
        // `AtomicCell<T>` is `repr(transparent)` over `T`, so `AtomicCell<Bytewise<T>>`
        // is layout-identical and this reborrow is sound.
        let cell: &AtomicCell<Bytewise<T>> =
            unsafe { &*(self as *const AtomicCell<T> as *const AtomicCell<Bytewise<T>>) };
        cell.compare_exchange(Bytewise(current), Bytewise(new))
            .is_ok()
    }
}

impl<T: Pod + Send> VertexArray<T> {
    /// Conditionally claim a cell: store `new` iff the cell still holds
    /// `current` (byte-wise). Returns whether the claim won.
    #[inline]
    pub fn claim(&self, v: VertexId, current: T, new: T) -> bool {
        self.cells[v as usize].compare_exchange_bytes(current, new)
    }
}

impl<T: Pod + Send + std::ops::Add<Output = T>> VertexArray<T> {
    /// Atomic accumulate, the workhorse of slot kernels.
    #[inline]
    pub fn write_add(&self, v: VertexId, delta: T) {
        let cell = &self.cells[v as usize];
        loop {
            let prev = cell.load();
            if cell.compare_exchange_bytes(prev, prev + delta) {
                return;
            }
        }
    }
}
