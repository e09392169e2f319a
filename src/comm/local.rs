//! In-process cluster transport: one OS thread per partition.
//!
//! Mailboxes are FIFO per (source, tag) pair, matching the ordering
//! guarantee the engine's exchange rotations rely on. Collectives
//! rendezvous through a generation-guarded slot table. Window reads copy
//! out of `Arc` snapshots of the frozen adjacency, so `get` completes
//! eagerly and `flush` is a no-op ordering point.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{Condvar, Mutex};

use crate::comm::{Communicator, Envelope, RemoteWindow, Tag, WindowBuf};
use crate::error::{GaleError, Result};

pub struct LocalCluster;

impl LocalCluster {
    /// Communicators for a `size`-partition in-process cluster, indexed by
    /// rank. Each is intended to be moved into its partition's thread.
    pub fn comms(size: usize) -> Vec<LocalComm> {
        let shared = Arc::new(Shared::new(size));
        (0..size)
            .map(|rank| LocalComm {
                shared: Arc::clone(&shared),
                rank,
            })
            .collect()
    }
}

struct Shared {
    size: usize,
    mailboxes: Vec<Mailbox>,
    collective: Collective,
    windows: WindowRegistry,
    splits: Mutex<HashMap<(u64, u32), SplitEntry>>,
    split_gen: Vec<std::sync::atomic::AtomicU64>,
}

struct SplitEntry {
    shared: Arc<Shared>,
    taken: usize,
}

impl Shared {
    fn new(size: usize) -> Self {
        Shared {
            size,
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            collective: Collective::new(size),
            windows: WindowRegistry::default(),
            splits: Mutex::new(HashMap::new()),
            split_gen: (0..size)
                .map(|_| std::sync::atomic::AtomicU64::new(0))
                .collect(),
        }
    }
}

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    cv: Condvar,
}

struct Collective {
    state: Mutex<CollectiveState>,
    cv: Condvar,
}

struct CollectiveState {
    slots: Vec<Option<Arc<Vec<u8>>>>,
    filled: usize,
    leavers: usize,
}

impl Collective {
    fn new(size: usize) -> Self {
        Collective {
            state: Mutex::new(CollectiveState {
                slots: vec![None; size],
                filled: 0,
                leavers: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Deposit `bytes` and return every rank's deposit once all have
    /// arrived. The last rank to leave resets the table for the next
    /// collective; early re-entrants wait out the drain.
    fn exchange(&self, rank: usize, bytes: Vec<u8>) -> Vec<Arc<Vec<u8>>> {
        let size;
        let snapshot;
        let mut st = self.state.lock();
        while st.leavers > 0 {
            self.cv.wait(&mut st);
        }
        st.slots[rank] = Some(Arc::new(bytes));
        st.filled += 1;
        size = st.slots.len();
        if st.filled == size {
            self.cv.notify_all();
        }
        while st.filled < size {
            self.cv.wait(&mut st);
        }
        snapshot = st
            .slots
            .iter()
            .map(|s| Arc::clone(s.as_ref().expect("collective slot filled")))
            .collect();
        st.leavers += 1;
        if st.leavers == size {
            for s in st.slots.iter_mut() {
                *s = None;
            }
            st.filled = 0;
            st.leavers = 0;
            self.cv.notify_all();
        }
        snapshot
    }
}

#[derive(Default)]
struct WindowRegistry {
    state: Mutex<Vec<WindowEntry>>,
    cv: Condvar,
}

struct WindowEntry {
    backings: Vec<Option<Option<Arc<dyn WindowBuf>>>>,
    filled: usize,
}

pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalComm {
    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.shared.size {
            return Err(GaleError::protocol(format!(
                "rank {rank} out of range for cluster of {}",
                self.shared.size
            )));
        }
        Ok(())
    }
}

impl Communicator for LocalComm {
    type Window = LocalWindow;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send<T: Pod>(&self, dst: usize, tag: Tag, data: &[T]) -> Result<()> {
        self.check_rank(dst)?;
        let bytes: Vec<u8> = bytemuck::cast_slice(data).to_vec();
        let mailbox = &self.shared.mailboxes[dst];
        let mut queues = mailbox.queues.lock();
        queues.entry((self.rank, tag)).or_default().push_back(bytes);
        mailbox.cv.notify_all();
        Ok(())
    }

    fn probe(&self, src: Option<usize>, tag: Tag) -> Result<Envelope> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queues = mailbox.queues.lock();
        loop {
            let found = match src {
                Some(s) => queues
                    .get(&(s, tag))
                    .and_then(|q| q.front())
                    .map(|m| (s, m.len())),
                None => {
                    // Lowest pending source for determinism.
                    let mut best: Option<(usize, usize)> = None;
                    for (&(s, t), q) in queues.iter() {
                        if t == tag {
                            if let Some(m) = q.front() {
                                if best.map(|(bs, _)| s < bs).unwrap_or(true) {
                                    best = Some((s, m.len()));
                                }
                            }
                        }
                    }
                    best
                }
            };
            if let Some((source, bytes)) = found {
                return Ok(Envelope { source, bytes });
            }
            mailbox.cv.wait(&mut queues);
        }
    }

    fn recv_into<T: Pod>(&self, src: usize, tag: Tag, buf: &mut [T]) -> Result<usize> {
        self.check_rank(src)?;
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queues = mailbox.queues.lock();
        let bytes = loop {
            if let Some(m) = queues.get_mut(&(src, tag)).and_then(|q| q.pop_front()) {
                break m;
            }
            mailbox.cv.wait(&mut queues);
        };
        drop(queues);
        let unit = std::mem::size_of::<T>();
        if unit == 0 || bytes.len() % unit != 0 {
            return Err(GaleError::protocol(format!(
                "message of {} bytes is not a whole number of {unit}-byte units",
                bytes.len()
            )));
        }
        let elems = bytes.len() / unit;
        if elems > buf.len() {
            return Err(GaleError::protocol(format!(
                "message of {elems} units overflows buffer of {}",
                buf.len()
            )));
        }
        bytemuck::cast_slice_mut(&mut buf[..elems]).copy_from_slice(&bytes);
        Ok(elems)
    }

    fn barrier(&self) -> Result<()> {
        self.shared.collective.exchange(self.rank, Vec::new());
        Ok(())
    }

    fn all_reduce<T, F>(&self, data: &mut [T], combine: F) -> Result<()>
    where
        T: Pod,
        F: Fn(T, T) -> T,
    {
        let contributions = self
            .shared
            .collective
            .exchange(self.rank, bytemuck::cast_slice(data).to_vec());
        let expected = data.len() * std::mem::size_of::<T>();
        for (r, c) in contributions.iter().enumerate() {
            if c.len() != expected {
                return Err(GaleError::protocol(format!(
                    "all-reduce contribution from rank {r} has {} bytes, expected {expected}",
                    c.len()
                )));
            }
        }
        for (i, out) in data.iter_mut().enumerate() {
            let mut acc: Option<T> = None;
            for c in &contributions {
                let vals: &[T] = bytemuck::cast_slice(c.as_slice());
                acc = Some(match acc {
                    None => vals[i],
                    Some(a) => combine(a, vals[i]),
                });
            }
            *out = acc.expect("non-empty cluster");
        }
        Ok(())
    }

    fn all_gather<T: Pod>(&self, data: &[T]) -> Result<Vec<Vec<T>>> {
        let contributions = self
            .shared
            .collective
            .exchange(self.rank, bytemuck::cast_slice(data).to_vec());
        contributions
            .iter()
            .map(|c| {
                if c.len() % std::mem::size_of::<T>() != 0 {
                    return Err(GaleError::protocol(
                        "all-gather contribution is not a whole number of units".to_string(),
                    ));
                }
                Ok(bytemuck::cast_slice(c.as_slice()).to_vec())
            })
            .collect()
    }

    fn split(&self, color: u32) -> Result<Self> {
        // Split calls are SPMD: the Nth call on every rank belongs to the
        // same logical split, so a per-rank generation counter keys the
        // rendezvous table consistently.
        let gen = self.shared.split_gen[self.rank]
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let colors = self.all_gather(&[color])?;
        let members: Vec<usize> = colors
            .iter()
            .enumerate()
            .filter(|(_, c)| c[0] == color)
            .map(|(r, _)| r)
            .collect();
        let new_rank = members
            .iter()
            .position(|&r| r == self.rank)
            .expect("caller belongs to its color group");
        let sub = {
            let mut splits = self.shared.splits.lock();
            let entry = splits.entry((gen, color)).or_insert_with(|| SplitEntry {
                shared: Arc::new(Shared::new(members.len())),
                taken: 0,
            });
            entry.taken += 1;
            let shared = Arc::clone(&entry.shared);
            if entry.taken == members.len() {
                splits.remove(&(gen, color));
            }
            shared
        };
        Ok(LocalComm {
            shared: sub,
            rank: new_rank,
        })
    }

    fn window_create(&self, backing: Option<Arc<dyn WindowBuf>>) -> Result<Self::Window> {
        let registry = &self.shared.windows;
        let idx = {
            let mut state = registry.state.lock();
            // Window creation is collective and SPMD-ordered, so each
            // rank's next window is the first entry it has not filled yet.
            let mut idx = None;
            for (i, e) in state.iter().enumerate() {
                if e.backings[self.rank].is_none() {
                    idx = Some(i);
                    break;
                }
            }
            let idx = match idx {
                Some(i) => i,
                None => {
                    state.push(WindowEntry {
                        backings: vec![None; self.shared.size],
                        filled: 0,
                    });
                    state.len() - 1
                }
            };
            state[idx].backings[self.rank] = Some(backing);
            state[idx].filled += 1;
            if state[idx].filled == self.shared.size {
                registry.cv.notify_all();
            }
            while state[idx].filled < self.shared.size {
                registry.cv.wait(&mut state);
            }
            idx
        };
        let state = registry.state.lock();
        let backings = state[idx]
            .backings
            .iter()
            .map(|b| b.clone().expect("window entry filled"))
            .collect();
        Ok(LocalWindow { backings })
    }
}

pub struct LocalWindow {
    backings: Vec<Option<Arc<dyn WindowBuf>>>,
}

impl RemoteWindow for LocalWindow {
    fn lock_shared(&self, rank: usize) -> Result<()> {
        self.check(rank)?;
        Ok(())
    }

    fn unlock(&self, rank: usize) -> Result<()> {
        self.check(rank)?;
        Ok(())
    }

    fn get(&self, rank: usize, offset: u64, dst: &mut [u8]) -> Result<()> {
        self.check(rank)?;
        let backing = self.backings[rank].as_ref().ok_or_else(|| {
            GaleError::protocol(format!("one-sided read from empty window on rank {rank}"))
        })?;
        let bytes = backing.as_bytes();
        let start = offset as usize;
        let end = start.checked_add(dst.len()).ok_or_else(|| {
            GaleError::protocol("one-sided read range overflows".to_string())
        })?;
        if end > bytes.len() {
            return Err(GaleError::protocol(format!(
                "one-sided read [{start}, {end}) exceeds window of {} bytes",
                bytes.len()
            )));
        }
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn flush(&self, _rank: usize) -> Result<()> {
        // Local gets complete eagerly; flush is the ordering point only.
        Ok(())
    }
}

impl LocalWindow {
    fn check(&self, rank: usize) -> Result<()> {
        if rank >= self.backings.len() {
            return Err(GaleError::protocol(format!(
                "rank {rank} out of range for window over {} ranks",
                self.backings.len()
            )));
        }
        Ok(())
    }
}
