//! The signal/slot edge engine.
//!
//! One `process_edges` call executes exactly one round: classify sparse or
//! dense, run signal kernels over the active set (owned range first, then
//! each delegated far-memory range), exchange message buffers along fixed
//! rotations, apply slot kernels with work-stealing, and all-reduce the
//! caller's scalar over the compute communicator.
//!
//! Sparse exchange rotations are normative: the sender walks
//! `(pid - k) mod P`, the receiver `(pid + k) mod P`, and delegated
//! sub-ranges travel as one message per `(proxied partition, socket)` in
//! ascending partition order, so the FIFO per peer pairs sends with
//! receives without any framing beyond size.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use tracing::debug;

use crate::bitmap::{scan_active, word_offset, Bitmap};
use crate::buffer::{EmitCtx, MsgUnit};
use crate::comm::{Communicator, RemoteWindow, Tag};
use crate::config::EngineMode;
use crate::error::{GaleError, Result};
use crate::graph::Graph;
use crate::prefetch::{make_rings, run_prefetcher, submit, CacheLookup, PrefetchRequest};
use crate::types::{AdjUnit, EdgeData, Reducer, VertexId};
use crate::workers::{even_split, BASIC_CHUNK};

fn wait_queue(queue: &Mutex<Vec<usize>>, step: usize) -> usize {
    loop {
        {
            let q = queue.lock();
            if q.len() > step {
                return q[step];
            }
        }
        std::hint::spin_loop();
    }
}

fn push_queue(queue: &Mutex<Vec<usize>>, value: usize) {
    queue.lock().push(value);
}

fn join_worker<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>, who: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| GaleError::Corruption(format!("{who} thread panicked")))?
}

impl<E: EdgeData, C: Communicator> Graph<E, C> {
    /// Run one round of edge processing and return the all-reduced scalar.
    ///
    /// `active` drives the signal kernels. `dense_selective`, when given,
    /// is broadcast-completed across peers before a dense round so every
    /// process holds the full bitmap.
    #[allow(clippy::too_many_arguments)]
    pub fn process_edges<R, M, SpSig, SpSlot, DnSig, DnSlot>(
        &mut self,
        sparse_signal: SpSig,
        sparse_slot: SpSlot,
        dense_signal: DnSig,
        dense_slot: DnSlot,
        active: &Bitmap,
        dense_selective: Option<&Bitmap>,
    ) -> Result<R>
    where
        R: Reducer,
        M: Pod + Send + Sync,
        SpSig: Fn(&EmitCtx<'_, M>, VertexId) + Sync,
        SpSlot: Fn(VertexId, M, &[AdjUnit<E>]) -> R + Sync,
        DnSig: Fn(&EmitCtx<'_, M>, VertexId, &[AdjUnit<E>]) + Sync,
        DnSlot: Fn(VertexId, M) -> R + Sync,
    {
        self.ensure_compute()?;
        let out_degree = std::sync::Arc::clone(&self.out_degree);
        let active_edges: u64 =
            self.process_vertices(|v| out_degree[v as usize] as u64, active)?;

        let sparse = match self.cfg.mode {
            EngineMode::Sparse => true,
            // The dense path has no delegation protocol; far-memory
            // topologies always run sparse.
            EngineMode::Adaptive => {
                self.compute_partitions < self.partitions || active_edges < self.edges() / 20
            }
        };
        debug!(
            rank = self.partition_id,
            active_edges, sparse, "round classified"
        );

        let unit = std::mem::size_of::<MsgUnit<M>>();
        let sockets = self.cfg.sockets;
        let pid = self.partition_id;
        let parts = self.partitions;
        let vertices = self.vertices() as usize;
        let owned = self.owned_vertices as usize;
        let po: Vec<usize> = self.partition_offset.iter().map(|&v| v as usize).collect();

        for i in 0..parts {
            let span = po[i + 1] - po[i];
            for s in 0..sockets {
                if sparse {
                    self.recv_buffer[i][s].reset(unit, span * sockets);
                    let send_cap = if i == pid { vertices * sockets } else { 0 };
                    self.send_buffer[i][s].reset(unit, send_cap);
                } else {
                    self.recv_buffer[i][s].reset(unit, owned * sockets);
                    self.send_buffer[i][s].reset(unit, span * sockets);
                }
            }
        }
        let limit = self.cfg.local_send_buffer_limit;
        for t in 0..self.pool.threads() {
            self.local_send.with(t, |tb| tb.reset(unit, limit));
        }

        let reducer = if sparse {
            self.sparse_round::<R, M, _, _>(&sparse_signal, &sparse_slot, active, &po)?
        } else {
            self.dense_round::<R, M, _, _>(&dense_signal, &dense_slot, dense_selective, &po)?
        };

        let mut out = [reducer];
        self.compute_comm
            .all_reduce(&mut out, |a: R, b: R| a.combine(b))?;
        Ok(out[0])
    }

    /// Parallel signal sweep over the active bits of `[start, end)`,
    /// claimed in basic chunks off a shared cursor, each worker flushing
    /// its coalescing buffer at the end.
    fn parallel_signal_range<M, F>(
        &self,
        ctx: &EmitCtx<'_, M>,
        signal: &F,
        active: &Bitmap,
        start: VertexId,
        end: VertexId,
    ) where
        M: Pod + Send + Sync,
        F: Fn(&EmitCtx<'_, M>, VertexId) + Sync,
    {
        let cursor = AtomicUsize::new(start as usize);
        self.pool.broadcast(|t| {
            loop {
                let b = cursor.fetch_add(BASIC_CHUNK, Ordering::Relaxed);
                if b >= end as usize {
                    break;
                }
                let e = (b + BASIC_CHUNK).min(end as usize);
                scan_active(active, b as VertexId, e as VertexId, |v| signal(ctx, v));
            }
            ctx.flush_thread(t);
        });
    }

    fn sparse_round<R, M, SpSig, SpSlot>(
        &self,
        sparse_signal: &SpSig,
        sparse_slot: &SpSlot,
        active: &Bitmap,
        po: &[usize],
    ) -> Result<R>
    where
        R: Reducer,
        M: Pod + Send + Sync,
        SpSig: Fn(&EmitCtx<'_, M>, VertexId) + Sync,
        SpSlot: Fn(VertexId, M, &[AdjUnit<E>]) -> R + Sync,
    {
        let pid = self.partition_id;
        let parts = self.partitions;
        let c = self.compute_partitions;
        let sockets = self.cfg.sockets;
        let tps = self.pool.threads_per_socket();
        let threads = self.pool.threads();
        let comm = &self.compute_comm;

        self.current_send_part.store(pid, Ordering::Relaxed);
        let ctx = EmitCtx::<M> {
            local: &self.local_send,
            send: &self.send_buffer,
            current_part: &self.current_send_part,
            threads_per_socket: tps,
            _marker: PhantomData,
        };

        // Owned signal, then owned counts.
        let (a, b) = self.owned_range();
        self.parallel_signal_range(&ctx, sparse_signal, active, a, b);
        for s in 0..sockets {
            let n = self.send_buffer[pid][s].len_units();
            self.send_buffer[pid][s].set_owned_count(n);
        }

        // Delegated signal, ascending partition id; each proxied range is
        // bracketed by its delegated_start entry, with the trailing
        // sentinel at `parts`.
        let delegated = self.delegated_partitions();
        for &fp in &delegated {
            for s in 0..sockets {
                let n = self.send_buffer[pid][s].len_units();
                self.send_buffer[pid][s].set_delegated_start(fp, n);
            }
            self.parallel_signal_range(
                &ctx,
                sparse_signal,
                active,
                po[fp] as VertexId,
                po[fp + 1] as VertexId,
            );
        }
        for s in 0..sockets {
            let n = self.send_buffer[pid][s].len_units();
            self.send_buffer[pid][s].set_delegated_start(parts, n);
        }

        let recv_queue: Mutex<Vec<usize>> = Mutex::new(Vec::with_capacity(parts));
        push_queue(&recv_queue, pid);

        let edge_cache_on = self.cfg.edge_cache_entries > 0 && !delegated.is_empty();
        let rings = make_rings(threads);
        let terminate = AtomicBool::new(false);

        let mut reducer = R::zero();
        std::thread::scope(|scope| -> Result<()> {
            let sender = scope.spawn(|| -> Result<()> {
                for step in 1..parts {
                    let i = (pid + parts - step) % parts;
                    if i < c {
                        for s in 0..sockets {
                            let buf = &self.send_buffer[pid][s];
                            comm.send(
                                i,
                                Tag::PassMessage,
                                buf.unit_range_bytes(0, buf.owned_count()),
                            )?;
                        }
                    } else if i % c != pid {
                        // Far target proxied elsewhere: ship each of our
                        // own delegated sub-ranges to that proxy.
                        let mut j = pid + c;
                        while j < parts {
                            let next = if j + c >= parts { parts } else { j + c };
                            for s in 0..sockets {
                                let buf = &self.send_buffer[pid][s];
                                let lo = buf.delegated_start(j);
                                let hi = buf.delegated_start(next);
                                comm.send(
                                    i % c,
                                    Tag::PassMessage,
                                    buf.unit_range_bytes(lo, hi),
                                )?;
                            }
                            j += c;
                        }
                    }
                    // Far target proxied by us: the receiver self-copies.
                }
                Ok(())
            });

            let receiver = scope.spawn(|| -> Result<()> {
                for step in 1..parts {
                    let i = (pid + step) % parts;
                    if i < c {
                        for s in 0..sockets {
                            let bytes: Vec<u8> = comm.recv_vec(i, Tag::PassMessage)?;
                            let units = self.recv_buffer[i][s].fill_from(&bytes)?;
                            self.recv_buffer[i][s].set_owned_count(units);
                        }
                    } else if i % c != pid {
                        // Far source proxied elsewhere: its proxy sends one
                        // message per partition it serves, in id order.
                        let d = i % c;
                        let mut j = d + c;
                        while j < parts {
                            for s in 0..sockets {
                                let bytes: Vec<u8> = comm.recv_vec(d, Tag::PassMessage)?;
                                let units = self.recv_buffer[j][s].fill_from(&bytes)?;
                                self.recv_buffer[j][s].set_owned_count(units);
                            }
                            j += c;
                        }
                    } else {
                        // Far source proxied by us: local copy out of our
                        // own send arena's delegated sub-range.
                        let next = if i + c >= parts { parts } else { i + c };
                        for s in 0..sockets {
                            let src = &self.send_buffer[pid][s];
                            let lo = src.delegated_start(i);
                            let hi = src.delegated_start(next);
                            let units = self.recv_buffer[i][s]
                                .fill_from(src.unit_range_bytes(lo, hi))?;
                            self.recv_buffer[i][s].set_owned_count(units);
                        }
                    }
                    push_queue(&recv_queue, i);
                }
                Ok(())
            });

            let prefetcher = if edge_cache_on {
                let rings = &rings;
                let caches = &*self.outgoing_caches;
                let windows = &self.outgoing_windows.list;
                let stats = &self.stats;
                let terminate = &terminate;
                Some(scope.spawn(move || {
                    run_prefetcher::<E, _, _>(rings, caches, windows, stats, terminate)
                }))
            } else {
                None
            };

            // Local sparse slot, in receive-completion order.
            for step in 0..parts {
                let i = wait_queue(&recv_queue, step);
                let used = if i == pid {
                    &self.send_buffer[i]
                } else {
                    &self.recv_buffer[i]
                };
                for used_socket in used.iter().take(sockets) {
                    let buf = &used_socket.units::<M>()[..used_socket.owned_count()];
                    for (t, st) in self.thread_state.iter().enumerate() {
                        let r = even_split(buf.len(), tps, t % tps);
                        st.assign(r.curr, r.end);
                    }
                    let partial = self.pool.broadcast(|me| {
                        let mut local = R::zero();
                        let states = &self.thread_state;
                        let mut run = |slice: &[MsgUnit<M>], s_i: usize| {
                            for u in slice {
                                let (v, m) = (u.vertex, u.msg);
                                if self.outgoing[s_i].has(v) {
                                    local = local
                                        .combine(sparse_slot(v, m, self.outgoing[s_i].span(v)));
                                }
                            }
                        };
                        loop {
                            let lo = states[me].claim(BASIC_CHUNK);
                            if lo >= states[me].end() {
                                break;
                            }
                            let hi = (lo + BASIC_CHUNK).min(states[me].end());
                            run(&buf[lo..hi], me / tps);
                        }
                        states[me].enter_stealing();
                        for off in 1..threads {
                            let peer = (me + off) % threads;
                            if !states[peer].is_working() {
                                continue;
                            }
                            loop {
                                let lo = states[peer].claim(BASIC_CHUNK);
                                if lo >= states[peer].end() {
                                    break;
                                }
                                let hi = (lo + BASIC_CHUNK).min(states[peer].end());
                                run(&buf[lo..hi], peer / tps);
                            }
                        }
                        local
                    });
                    reducer = partial.into_iter().fold(reducer, |acc, r| acc.combine(r));
                }
            }

            // Delegated sparse slot: every source partition's messages are
            // replayed against each proxied partition's remote adjacency
            // through the cache pipeline.
            for step in 0..parts {
                for &fp in &delegated {
                    let i = (fp + step) % parts;
                    let used = if i == pid {
                        &self.send_buffer[i]
                    } else {
                        &self.recv_buffer[i]
                    };
                    for used_socket in used.iter().take(sockets) {
                        let buf = &used_socket.units::<M>()[..used_socket.owned_count()];
                        for (t, st) in self.thread_state.iter().enumerate() {
                            let r = even_split(buf.len(), tps, t % tps);
                            st.assign(r.curr, r.end);
                        }
                        let partial = self.pool.broadcast(|me| -> Result<R> {
                            let mut local = R::zero();
                            let states = &self.thread_state;
                            let mut run = |local: &mut R,
                                           slice: &[MsgUnit<M>],
                                           s_i: usize|
                             -> Result<()> {
                                for u in slice {
                                    let (v, m) = (u.vertex, u.msg);
                                    *local = local.combine(self.delegated_slot(
                                        sparse_slot,
                                        &rings,
                                        me,
                                        fp,
                                        s_i,
                                        v,
                                        m,
                                        edge_cache_on,
                                    )?);
                                }
                                Ok(())
                            };
                            loop {
                                let lo = states[me].claim(BASIC_CHUNK);
                                if lo >= states[me].end() {
                                    break;
                                }
                                let hi = (lo + BASIC_CHUNK).min(states[me].end());
                                run(&mut local, &buf[lo..hi], me / tps)?;
                            }
                            states[me].enter_stealing();
                            for off in 1..threads {
                                let peer = (me + off) % threads;
                                if !states[peer].is_working() {
                                    continue;
                                }
                                loop {
                                    let lo = states[peer].claim(BASIC_CHUNK);
                                    if lo >= states[peer].end() {
                                        break;
                                    }
                                    let hi = (lo + BASIC_CHUNK).min(states[peer].end());
                                    run(&mut local, &buf[lo..hi], peer / tps)?;
                                }
                            }
                            Ok(local)
                        });
                        for r in partial {
                            reducer = reducer.combine(r?);
                        }
                    }
                }
            }

            terminate.store(true, Ordering::Release);
            if let Some(p) = prefetcher {
                join_worker(p, "prefetch")?;
            }
            join_worker(sender, "sender")?;
            join_worker(receiver, "receiver")?;
            Ok(())
        })?;
        Ok(reducer)
    }

    /// Apply `sparse_slot` for one delegated message: consult the bitmap
    /// and index mirrors, then either ride the prefetch pipeline or fetch
    /// the span inline when the edge cache is disabled.
    #[allow(clippy::too_many_arguments)]
    fn delegated_slot<R, M, SpSlot>(
        &self,
        sparse_slot: &SpSlot,
        rings: &[crate::prefetch::FetchRing],
        me: usize,
        fp: usize,
        s_i: usize,
        v: VertexId,
        m: M,
        edge_cache_on: bool,
    ) -> Result<R>
    where
        R: Reducer,
        M: Pod + Send + Sync,
        SpSlot: Fn(VertexId, M, &[AdjUnit<E>]) -> R + Sync,
    {
        let cache = self.outgoing_caches.cache(fp, s_i);
        self.stats.record_bitmap_lookup();
        if !cache.has_edges(v) {
            return Ok(R::zero());
        }
        self.stats.record_index_lookup();
        let (lo, hi) = cache.edge_range(v);
        if edge_cache_on {
            submit(
                &rings[me],
                PrefetchRequest {
                    vertex: v,
                    remote: fp,
                    start: lo,
                    end: hi,
                    socket: s_i,
                },
            );
            let slot = cache.slot_of(v);
            let mut spins: u64 = 0;
            loop {
                {
                    let line = slot.line.read();
                    if line.vtx == v + 1 {
                        return Ok(sparse_slot(v, m, &line.edges));
                    }
                }
                spins += 1;
                debug_assert!(
                    spins < 10_000_000_000,
                    "edge cache slot for vertex {v} never published"
                );
                std::hint::spin_loop();
            }
        } else {
            let unit = std::mem::size_of::<AdjUnit<E>>() as u64;
            let n = (hi - lo) as usize;
            let mut span = vec![AdjUnit::<E>::zeroed(); n];
            let window = &self.outgoing_windows.list[s_i];
            window.get(fp, lo * unit, bytemuck::cast_slice_mut(&mut span))?;
            window.flush(fp)?;
            self.stats.record_edge_miss();
            Ok(sparse_slot(v, m, &span))
        }
    }

    fn dense_round<R, M, DnSig, DnSlot>(
        &self,
        dense_signal: &DnSig,
        dense_slot: &DnSlot,
        dense_selective: Option<&Bitmap>,
        po: &[usize],
    ) -> Result<R>
    where
        R: Reducer,
        M: Pod + Send + Sync,
        DnSig: Fn(&EmitCtx<'_, M>, VertexId, &[AdjUnit<E>]) + Sync,
        DnSlot: Fn(VertexId, M) -> R + Sync,
    {
        let pid = self.partition_id;
        let parts = self.partitions;
        let sockets = self.cfg.sockets;
        let tps = self.pool.threads_per_socket();
        let threads = self.pool.threads();
        let comm = &self.comm;

        // Round-robin exchange of the owned portion of the selective
        // bitmap so every process holds the full map.
        if let Some(sel) = dense_selective {
            if parts > 1 {
                std::thread::scope(|scope| -> Result<()> {
                    let sender = scope.spawn(|| -> Result<()> {
                        let start_w = word_offset(po[pid] as VertexId);
                        let n_words = (po[pid + 1] - po[pid] + 63) / 64;
                        let words: Vec<u64> =
                            (start_w..start_w + n_words).map(|w| sel.word(w)).collect();
                        for step in 1..parts {
                            let recipient = (pid + step) % parts;
                            comm.send(recipient, Tag::PassMessage, &words)?;
                        }
                        Ok(())
                    });
                    let receiver = scope.spawn(|| -> Result<()> {
                        for step in 1..parts {
                            let sender_id = (pid + parts - step) % parts;
                            let words: Vec<u64> = comm.recv_vec(sender_id, Tag::PassMessage)?;
                            let expect = (po[sender_id + 1] - po[sender_id] + 63) / 64;
                            if words.len() != expect {
                                return Err(GaleError::protocol(format!(
                                    "selective bitmap from rank {sender_id}: {} words, expected {expect}",
                                    words.len()
                                )));
                            }
                            let base = word_offset(po[sender_id] as VertexId);
                            for (k, w) in words.into_iter().enumerate() {
                                sel.store_word(base + k, w);
                            }
                        }
                        Ok(())
                    });
                    join_worker(sender, "selective sender")?;
                    join_worker(receiver, "selective receiver")?;
                    Ok(())
                })?;
                comm.barrier()?;
            }
        }

        let send_queue: Mutex<Vec<usize>> = Mutex::new(Vec::with_capacity(parts));
        let recv_queue: Mutex<Vec<usize>> = Mutex::new(Vec::with_capacity(parts));
        let ctx = EmitCtx::<M> {
            local: &self.local_send,
            send: &self.send_buffer,
            current_part: &self.current_send_part,
            threads_per_socket: tps,
            _marker: PhantomData,
        };

        let mut reducer = R::zero();
        std::thread::scope(|scope| -> Result<()> {
            let sender = scope.spawn(|| -> Result<()> {
                for step in 0..parts - 1 {
                    let i = wait_queue(&send_queue, step);
                    for s in 0..sockets {
                        let buf = &self.send_buffer[i][s];
                        comm.send(
                            i,
                            Tag::PassMessage,
                            buf.unit_range_bytes(0, buf.len_units()),
                        )?;
                    }
                }
                Ok(())
            });

            let receiver = scope.spawn(|| -> Result<()> {
                std::thread::scope(|inner| -> Result<()> {
                    let mut handles = Vec::new();
                    for step in 1..parts {
                        let i = (pid + parts - step) % parts;
                        handles.push((
                            i,
                            inner.spawn(move || -> Result<()> {
                                for s in 0..sockets {
                                    let bytes: Vec<u8> = comm.recv_vec(i, Tag::PassMessage)?;
                                    self.recv_buffer[i][s].fill_from(&bytes)?;
                                }
                                Ok(())
                            }),
                        ));
                    }
                    for (i, h) in handles {
                        join_worker(h, "dense receive")?;
                        push_queue(&recv_queue, i);
                    }
                    push_queue(&recv_queue, pid);
                    Ok(())
                })
            });

            // Signal sweeps over the incoming compressed index, one
            // destination partition per step, pipelined into the sender.
            let mut current = pid;
            for _step in 0..parts {
                current = (current + 1) % parts;
                let i = current;
                self.current_send_part.store(i, Ordering::Relaxed);
                for (t, st) in self.thread_state.iter().enumerate() {
                    let r = self.tuned_dense[i][t];
                    st.assign(r.curr, r.end);
                }
                self.pool.broadcast(|me| {
                    let states = &self.thread_state;
                    let sweep = |s_i: usize, p: usize| {
                        let (v, span) = self.incoming[s_i].compressed_span(p);
                        dense_signal(&ctx, v, span);
                    };
                    loop {
                        let lo = states[me].claim(BASIC_CHUNK);
                        if lo >= states[me].end() {
                            break;
                        }
                        let hi = (lo + BASIC_CHUNK).min(states[me].end());
                        for p in lo..hi {
                            sweep(me / tps, p);
                        }
                    }
                    states[me].enter_stealing();
                    for off in 1..threads {
                        let peer = (me + off) % threads;
                        while states[peer].is_working() {
                            let lo = states[peer].claim(BASIC_CHUNK);
                            if lo >= states[peer].end() {
                                continue;
                            }
                            let hi = (lo + BASIC_CHUNK).min(states[peer].end());
                            for p in lo..hi {
                                sweep(peer / tps, p);
                            }
                        }
                    }
                    ctx.flush_thread(me);
                });
                if i != pid {
                    push_queue(&send_queue, i);
                }
            }

            // Slot application in receive-completion order; no stealing on
            // this side, each worker drains its own socket's buffer.
            for step in 0..parts {
                let i = wait_queue(&recv_queue, step);
                let used = if i == pid {
                    &self.send_buffer[i]
                } else {
                    &self.recv_buffer[i]
                };
                for (t, st) in self.thread_state.iter().enumerate() {
                    let s = t / tps;
                    let r = even_split(used[s].len_units(), tps, t % tps);
                    st.assign(r.curr, r.end);
                }
                let partial = self.pool.broadcast(|me| {
                    let mut local = R::zero();
                    let states = &self.thread_state;
                    let buf = used[me / tps].units::<M>();
                    loop {
                        let lo = states[me].claim(BASIC_CHUNK);
                        if lo >= states[me].end() {
                            break;
                        }
                        let hi = (lo + BASIC_CHUNK).min(states[me].end());
                        for u in &buf[lo..hi] {
                            let (v, m) = (u.vertex, u.msg);
                            local = local.combine(dense_slot(v, m));
                        }
                    }
                    states[me].enter_stealing();
                    local
                });
                reducer = partial.into_iter().fold(reducer, |acc, r| acc.combine(r));
            }

            join_worker(sender, "dense sender")?;
            join_worker(receiver, "dense receiver")?;
            Ok(())
        })?;
        Ok(reducer)
    }
}
