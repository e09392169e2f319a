//! The partitioned graph value.
//!
//! A `Graph` is one process's view of the cluster: its partition boundaries,
//! its per-socket adjacency shards, the remote windows and caches over its
//! delegated far-memory peers, the worker pool, and the exchange buffers the
//! edge engine runs over. All graph-derived memory is allocated during load,
//! frozen for the process lifetime, and dropped at teardown.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, info};

use crate::bitmap::{scan_active, Bitmap};
use crate::buffer::{MessageBuffer, PerThread, ThreadBuffer};
use crate::cache::{CacheStats, RemoteAdjCache};
use crate::comm::{ops, Communicator, RemoteWindow, Tag, WindowBuf};
use crate::config::EngineConfig;
use crate::error::{GaleError, Result};
use crate::io::PositionedFile;
use crate::partition::{find_partition, locality_aware_chunks};
use crate::prefetch::CacheLookup;
use crate::storage::adjacency::{AdjacencyShard, ShardBuilder};
use crate::storage::loader::{accumulate_degrees, shuffle_pass, RouteBy};
use crate::types::{AdjUnit, EdgeData, EdgeId, EdgeRecord, Reducer, VertexId};
use crate::vertex::VertexArray;
use crate::workers::{even_split, tune_chunks, ChunkRange, ThreadState, WorkerPool, BASIC_CHUNK};

/// One adjacency side's remote windows, per socket.
pub(crate) struct SideWindows<W> {
    pub bitmap: Vec<Arc<W>>,
    pub index: Vec<Arc<W>>,
    pub list: Vec<Arc<W>>,
}

impl<W> Clone for SideWindows<W> {
    fn clone(&self) -> Self {
        SideWindows {
            bitmap: self.bitmap.clone(),
            index: self.index.clone(),
            list: self.list.clone(),
        }
    }
}

/// Preloaded mirrors and edge-cache tables for the partitions this process
/// proxies, keyed by far partition then socket.
pub(crate) struct RemoteCaches<E: EdgeData> {
    per_partition: HashMap<usize, Vec<RemoteAdjCache<E>>>,
}

impl<E: EdgeData> RemoteCaches<E> {
    fn empty() -> Self {
        RemoteCaches {
            per_partition: HashMap::new(),
        }
    }
}

impl<E: EdgeData> CacheLookup<E> for RemoteCaches<E> {
    fn cache(&self, remote: usize, socket: usize) -> &RemoteAdjCache<E> {
        &self.per_partition[&remote][socket]
    }
}

pub struct Graph<E: EdgeData, C: Communicator> {
    pub(crate) cfg: EngineConfig,
    pub(crate) comm: C,
    /// Communicator over this process's role class; for compute ranks this
    /// is the compute communicator the engine reduces over.
    pub(crate) compute_comm: C,
    pub(crate) partition_id: usize,
    pub(crate) partitions: usize,
    pub(crate) compute_partitions: usize,
    pub(crate) alpha: u64,
    symmetric: bool,
    vertices: VertexId,
    edges: EdgeId,
    pub(crate) out_degree: Arc<Vec<VertexId>>,
    pub(crate) in_degree: Arc<Vec<VertexId>>,
    pub(crate) partition_offset: Vec<VertexId>,
    pub(crate) local_partition_offset: Vec<VertexId>,
    pub(crate) local_partition_offsets: Vec<Vec<VertexId>>,
    pub(crate) owned_vertices: VertexId,
    pub(crate) outgoing: Vec<AdjacencyShard<E>>,
    pub(crate) incoming: Vec<AdjacencyShard<E>>,
    pub(crate) outgoing_windows: SideWindows<C::Window>,
    pub(crate) incoming_windows: SideWindows<C::Window>,
    pub(crate) outgoing_caches: Arc<RemoteCaches<E>>,
    pub(crate) incoming_caches: Arc<RemoteCaches<E>>,
    pub(crate) thread_state: Vec<ThreadState>,
    pub(crate) tuned_dense: Vec<Vec<ChunkRange>>,
    pub(crate) tuned_sparse: Vec<Vec<ChunkRange>>,
    pub(crate) local_send: PerThread<ThreadBuffer>,
    pub(crate) send_buffer: Vec<Vec<MessageBuffer>>,
    pub(crate) recv_buffer: Vec<Vec<MessageBuffer>>,
    pub(crate) current_send_part: AtomicUsize,
    pub(crate) pool: WorkerPool,
    pub(crate) stats: CacheStats,
}

impl<E: EdgeData, C: Communicator> Graph<E, C> {
    /// Load a directed graph: both the outgoing (CSR by source, routed by
    /// destination owner) and incoming (CSR by destination, routed by
    /// source owner) sides are built.
    pub fn load_directed(comm: C, cfg: EngineConfig, path: &Path, vertices: VertexId) -> Result<Self> {
        Self::load_impl(comm, cfg, path, vertices, false)
    }

    /// Load a directed edge file as a symmetric graph: each record is
    /// ingested twice, once per direction, and the incoming side aliases
    /// the outgoing side.
    pub fn load_undirected_from_directed(
        comm: C,
        cfg: EngineConfig,
        path: &Path,
        vertices: VertexId,
    ) -> Result<Self> {
        Self::load_impl(comm, cfg, path, vertices, true)
    }

    fn load_impl(
        comm: C,
        cfg: EngineConfig,
        path: &Path,
        vertices: VertexId,
        symmetric: bool,
    ) -> Result<Self> {
        cfg.validate()?;
        if comm.size() != cfg.partitions {
            return Err(GaleError::config(format!(
                "communicator spans {} ranks but config says {} partitions",
                comm.size(),
                cfg.partitions
            )));
        }
        let partitions = cfg.partitions;
        let compute_partitions = cfg.compute_partitions;
        let partition_id = comm.rank();
        let sockets = cfg.sockets;
        let alpha = cfg.alpha();

        let record = std::mem::size_of::<EdgeRecord<E>>() as u64;
        let file_len = PositionedFile::open(path)?.len()?;
        if file_len % record != 0 {
            return Err(GaleError::config(format!(
                "edge file is {file_len} bytes, not a multiple of the {record}-byte record"
            )));
        }
        let edges: EdgeId = file_len / record;
        info!(
            rank = partition_id,
            vertices, edges, symmetric, "loading graph"
        );

        let (out_degree, in_degree) =
            accumulate_degrees::<E, C>(&comm, path, vertices, edges, symmetric)?;

        // Locality-aware chunking over the global degree vector, cross
        // checked so every process lands on identical boundaries.
        let partition_offset = locality_aware_chunks(
            &out_degree,
            0,
            vertices,
            partitions,
            alpha,
            cfg.page_vertices,
        );
        Self::verify_boundaries(&comm, &partition_offset)?;
        let owned_vertices = partition_offset[partition_id + 1] - partition_offset[partition_id];

        // NUMA sub-chunking of the owned slice, gathered so every process
        // knows every peer's socket boundaries.
        let local_partition_offset = locality_aware_chunks(
            &out_degree,
            partition_offset[partition_id],
            partition_offset[partition_id + 1],
            sockets,
            alpha,
            cfg.page_vertices,
        );
        let local_partition_offsets = comm.all_gather(&local_partition_offset)?;

        let compute_comm = comm.split(u32::from(partition_id >= compute_partitions))?;

        // Outgoing side: route by destination owner, key shards by source.
        let outgoing = Self::build_side(
            &comm,
            path,
            vertices,
            edges,
            &partition_offset,
            &local_partition_offset,
            partition_id,
            sockets,
            RouteBy::Dst,
            symmetric,
        )?;
        let incoming = if symmetric {
            outgoing.iter().map(clone_shard).collect()
        } else {
            Self::build_side(
                &comm,
                path,
                vertices,
                edges,
                &partition_offset,
                &local_partition_offset,
                partition_id,
                sockets,
                RouteBy::Src,
                symmetric,
            )?
        };

        // Publish windows once the CSR is frozen. Creation order is part of
        // the collective protocol: outgoing then incoming, socket-major,
        // bitmap/index/list.
        let is_far = partition_id >= compute_partitions;
        let outgoing_windows = Self::publish_side(&comm, is_far, &outgoing)?;
        let incoming_windows = if symmetric {
            outgoing_windows.clone()
        } else {
            Self::publish_side(&comm, is_far, &incoming)?
        };

        // Compute ranks hold shared-lock sessions over every far peer's
        // adjacency-list exposure for the engine lifetime.
        if !is_far {
            for fp in compute_partitions..partitions {
                for s in 0..sockets {
                    outgoing_windows.list[s].lock_shared(fp)?;
                    if !symmetric {
                        incoming_windows.list[s].lock_shared(fp)?;
                    }
                }
            }
        }

        // Preload the bitmap and index mirrors for the delegated set.
        let delegated = delegated_partitions(partition_id, compute_partitions, partitions);
        let outgoing_caches = if is_far {
            Arc::new(RemoteCaches::empty())
        } else {
            Arc::new(Self::preload_caches(
                &cfg,
                vertices,
                sockets,
                &delegated,
                &outgoing_windows,
            )?)
        };
        let incoming_caches = if symmetric {
            Arc::clone(&outgoing_caches)
        } else if is_far {
            Arc::new(RemoteCaches::empty())
        } else {
            Arc::new(Self::preload_caches(
                &cfg,
                vertices,
                sockets,
                &delegated,
                &incoming_windows,
            )?)
        };

        let tuned_dense = Self::tune_all(&incoming, &partition_offset, &cfg, alpha);
        let tuned_sparse = if symmetric {
            tuned_dense.clone()
        } else {
            Self::tune_all(&outgoing, &partition_offset, &cfg, alpha)
        };

        let threads = cfg.threads();
        let pool = WorkerPool::new(sockets, cfg.threads_per_socket)?;
        let thread_state = (0..threads).map(|_| ThreadState::new()).collect();
        let local_send = PerThread::new(threads, ThreadBuffer::new);
        let send_buffer = (0..partitions)
            .map(|_| (0..sockets).map(|_| MessageBuffer::new(partitions)).collect())
            .collect();
        let recv_buffer = (0..partitions)
            .map(|_| (0..sockets).map(|_| MessageBuffer::new(partitions)).collect())
            .collect();

        comm.barrier()?;
        info!(rank = partition_id, owned = owned_vertices, "load complete");

        Ok(Graph {
            cfg,
            comm,
            compute_comm,
            partition_id,
            partitions,
            compute_partitions,
            alpha,
            symmetric,
            vertices,
            edges,
            out_degree: Arc::new(out_degree),
            in_degree: Arc::new(in_degree),
            partition_offset,
            local_partition_offset,
            local_partition_offsets,
            owned_vertices,
            outgoing,
            incoming,
            outgoing_windows,
            incoming_windows,
            outgoing_caches,
            incoming_caches,
            thread_state,
            tuned_dense,
            tuned_sparse,
            local_send,
            send_buffer,
            recv_buffer,
            current_send_part: AtomicUsize::new(0),
            pool,
            stats: CacheStats::default(),
        })
    }

    fn verify_boundaries(comm: &C, partition_offset: &[VertexId]) -> Result<()> {
        let checks: [fn(VertexId, VertexId) -> VertexId; 2] =
            [ops::max::<VertexId>, ops::min::<VertexId>];
        for op in checks {
            let mut check = partition_offset.to_vec();
            comm.all_reduce(&mut check, op)?;
            if check != partition_offset {
                return Err(GaleError::config(
                    "partition boundaries diverge across processes".to_string(),
                ));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_side(
        comm: &C,
        path: &Path,
        vertices: VertexId,
        edges: EdgeId,
        partition_offset: &[VertexId],
        local_partition_offset: &[VertexId],
        partition_id: usize,
        sockets: usize,
        route: RouteBy,
        mirror: bool,
    ) -> Result<Vec<AdjacencyShard<E>>> {
        let my_start = partition_offset[partition_id];
        let my_end = partition_offset[partition_id + 1];
        let mut builders: Vec<ShardBuilder<E>> =
            (0..sockets).map(|_| ShardBuilder::new(vertices)).collect();

        // Count pass.
        shuffle_pass::<E, C, _>(comm, path, edges, partition_offset, route, mirror, |r| {
            let (key, other) = match route {
                RouteBy::Dst => (r.dst, r.src),
                RouteBy::Src => (r.src, r.dst),
            };
            if key < my_start || key >= my_end {
                return Err(GaleError::protocol(format!(
                    "misrouted edge endpoint {key} outside [{my_start}, {my_end})"
                )));
            }
            let socket = find_partition(local_partition_offset, key);
            builders[socket].record(other);
            Ok(())
        })?;
        comm.barrier()?;

        for b in builders.iter_mut() {
            b.finalize_counts();
        }

        // Place pass.
        shuffle_pass::<E, C, _>(comm, path, edges, partition_offset, route, mirror, |r| {
            let (key, other) = match route {
                RouteBy::Dst => (r.dst, r.src),
                RouteBy::Src => (r.src, r.dst),
            };
            let socket = find_partition(local_partition_offset, key);
            builders[socket].place(
                other,
                AdjUnit {
                    neighbour: key,
                    data: r.data,
                },
            );
            Ok(())
        })?;
        comm.barrier()?;

        let shards: Vec<AdjacencyShard<E>> = builders.into_iter().map(|b| b.freeze()).collect();
        for (s, shard) in shards.iter().enumerate() {
            debug!(
                rank = partition_id,
                socket = s,
                edges = shard.edge_count,
                ?route,
                "shard frozen"
            );
        }
        Ok(shards)
    }

    fn publish_side(
        comm: &C,
        is_far: bool,
        shards: &[AdjacencyShard<E>],
    ) -> Result<SideWindows<C::Window>> {
        let mut windows = SideWindows {
            bitmap: Vec::new(),
            index: Vec::new(),
            list: Vec::new(),
        };
        for shard in shards {
            let bitmap_backing: Option<Arc<dyn WindowBuf>> = if is_far {
                Some(Arc::new(shard.bitmap.snapshot_words()))
            } else {
                None
            };
            windows
                .bitmap
                .push(Arc::new(comm.window_create(bitmap_backing)?));
            let index_backing: Option<Arc<dyn WindowBuf>> = if is_far {
                Some(Arc::clone(&shard.index) as Arc<dyn WindowBuf>)
            } else {
                None
            };
            windows
                .index
                .push(Arc::new(comm.window_create(index_backing)?));
            let list_backing: Option<Arc<dyn WindowBuf>> = if is_far {
                Some(Arc::clone(&shard.list) as Arc<dyn WindowBuf>)
            } else {
                None
            };
            windows
                .list
                .push(Arc::new(comm.window_create(list_backing)?));
        }
        Ok(windows)
    }

    fn preload_caches(
        cfg: &EngineConfig,
        vertices: VertexId,
        sockets: usize,
        delegated: &[usize],
        windows: &SideWindows<C::Window>,
    ) -> Result<RemoteCaches<E>> {
        let mut per_partition = HashMap::new();
        for &fp in delegated {
            let per_socket = (0..sockets)
                .map(|s| {
                    RemoteAdjCache::preload(
                        fp,
                        vertices,
                        cfg.edge_cache_entries,
                        windows.bitmap[s].as_ref(),
                        windows.index[s].as_ref(),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            per_partition.insert(fp, per_socket);
        }
        Ok(RemoteCaches { per_partition })
    }

    fn tune_all(
        shards: &[AdjacencyShard<E>],
        partition_offset: &[VertexId],
        cfg: &EngineConfig,
        alpha: u64,
    ) -> Vec<Vec<ChunkRange>> {
        let compressed: Vec<Vec<crate::types::CompressedAdjIndex>> =
            shards.iter().map(|s| s.compressed.clone()).collect();
        (0..cfg.partitions)
            .map(|i| {
                tune_chunks(
                    &compressed,
                    partition_offset,
                    i,
                    cfg.sockets,
                    cfg.threads_per_socket,
                    alpha,
                )
            })
            .collect()
    }

    // ---- topology accessors ----

    pub fn vertices(&self) -> VertexId {
        self.vertices
    }

    pub fn edges(&self) -> EdgeId {
        self.edges
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn compute_partitions(&self) -> usize {
        self.compute_partitions
    }

    pub fn is_compute(&self) -> bool {
        self.partition_id < self.compute_partitions
    }

    pub fn owned_range(&self) -> (VertexId, VertexId) {
        (
            self.partition_offset[self.partition_id],
            self.partition_offset[self.partition_id + 1],
        )
    }

    pub fn partition_offsets(&self) -> &[VertexId] {
        &self.partition_offset
    }

    pub fn local_partition_offsets_of(&self, partition: usize) -> &[VertexId] {
        &self.local_partition_offsets[partition]
    }

    pub fn out_degree(&self) -> &[VertexId] {
        &self.out_degree
    }

    pub fn in_degree(&self) -> &[VertexId] {
        &self.in_degree
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn outgoing_shards(&self) -> &[AdjacencyShard<E>] {
        &self.outgoing
    }

    pub fn incoming_shards(&self) -> &[AdjacencyShard<E>] {
        &self.incoming
    }

    pub fn get_partition_id(&self, v: VertexId) -> usize {
        find_partition(&self.partition_offset, v)
    }

    pub fn get_local_partition_id(&self, v: VertexId) -> usize {
        find_partition(&self.local_partition_offset, v)
    }

    /// Far-memory partitions proxied by `partition`, ascending.
    pub fn delegated_partitions_of(&self, partition: usize) -> Vec<usize> {
        delegated_partitions(partition, self.compute_partitions, self.partitions)
    }

    pub fn delegated_partitions(&self) -> Vec<usize> {
        self.delegated_partitions_of(self.partition_id)
    }

    pub fn alloc_vertex_subset(&self) -> Bitmap {
        Bitmap::new(self.vertices)
    }

    pub fn alloc_vertex_array<T: Pod + Send>(&self) -> VertexArray<T> {
        VertexArray::new(self.vertices)
    }

    pub(crate) fn ensure_compute(&self) -> Result<()> {
        if !self.is_compute() {
            return Err(GaleError::config(
                "far-memory partitions do not execute kernels".to_string(),
            ));
        }
        Ok(())
    }

    // ---- vertex array operations ----

    /// Write `value` across the owned range and each delegated range;
    /// other positions are left untouched. Workers touch their own
    /// socket's sub-range first, which is what places the pages.
    pub fn fill_vertex_array<T: Pod + Send + Sync>(&self, array: &VertexArray<T>, value: T) {
        let tps = self.pool.threads_per_socket();
        let lpo = &self.local_partition_offset;
        self.pool.broadcast(|t| {
            let s = t / tps;
            let range = even_split((lpo[s + 1] - lpo[s]) as usize, tps, t % tps);
            array.fill_range(
                lpo[s] + range.curr as VertexId,
                lpo[s] + range.end as VertexId,
                value,
            );
        });
        let threads = self.pool.threads();
        for fp in self.delegated_partitions() {
            let start = self.partition_offset[fp];
            let end = self.partition_offset[fp + 1];
            self.pool.broadcast(|t| {
                let range = even_split((end - start) as usize, threads, t);
                array.fill_range(
                    start + range.curr as VertexId,
                    start + range.end as VertexId,
                    value,
                );
            });
        }
    }

    /// Collect the owned range of every compute partition and every
    /// delegated range at `root`, over the compute communicator.
    pub fn gather_vertex_array<T: Pod + Send>(
        &self,
        array: &VertexArray<T>,
        root: usize,
    ) -> Result<()> {
        self.ensure_compute()?;
        if root >= self.compute_partitions {
            return Err(GaleError::config(format!(
                "gather root {root} is not a compute partition"
            )));
        }
        let po = &self.partition_offset;
        let c = self.compute_partitions;
        if self.partition_id != root {
            let span = array.snapshot_range(po[self.partition_id], po[self.partition_id + 1]);
            self.compute_comm
                .send(root, Tag::GatherVertexArray, &span)?;
        } else {
            for i in 0..c {
                if i == self.partition_id {
                    continue;
                }
                let expect = (po[i + 1] - po[i]) as usize;
                let span: Vec<T> = self.compute_comm.recv_vec(i, Tag::GatherVertexArray)?;
                if span.len() != expect {
                    return Err(GaleError::protocol(format!(
                        "gathered {} units from rank {i}, expected {expect}",
                        span.len()
                    )));
                }
                array.store_range(po[i], &span);
            }
        }
        if c < self.partitions {
            if self.partition_id != root {
                for i in c..self.partitions {
                    if i % c == self.partition_id {
                        let span = array.snapshot_range(po[i], po[i + 1]);
                        self.compute_comm.send(root, Tag::GatherVertexArray, &span)?;
                    }
                }
            } else {
                for i in c..self.partitions {
                    let proxy = i % c;
                    if proxy == self.partition_id {
                        continue;
                    }
                    let expect = (po[i + 1] - po[i]) as usize;
                    let span: Vec<T> =
                        self.compute_comm.recv_vec(proxy, Tag::GatherVertexArray)?;
                    if span.len() != expect {
                        return Err(GaleError::protocol(format!(
                            "gathered {} delegated units for partition {i}, expected {expect}",
                            span.len()
                        )));
                    }
                    array.store_range(po[i], &span);
                }
            }
        }
        Ok(())
    }

    /// Dump to a shared file of `sizeof(T) * V` bytes; partition 0
    /// pre-extends it, then every compute partition writes its owned and
    /// delegated byte ranges in place.
    pub fn dump_vertex_array<T: Pod + Send>(
        &self,
        array: &VertexArray<T>,
        path: &Path,
    ) -> Result<()> {
        self.ensure_compute()?;
        let unit = std::mem::size_of::<T>() as u64;
        let file_length = unit * self.vertices as u64;
        if self.partition_id == 0 {
            let file = PositionedFile::open_rw(path)?;
            if file.len()? != file_length {
                file.set_len(file_length)?;
            }
        }
        self.compute_comm.barrier()?;
        let file = PositionedFile::open_rw(path)?;
        let write_span = |start: VertexId, end: VertexId| -> Result<()> {
            let span = array.snapshot_range(start, end);
            file.write_all_at(unit * start as u64, bytemuck::cast_slice(&span))
        };
        let (a, b) = self.owned_range();
        write_span(a, b)?;
        for fp in self.delegated_partitions() {
            write_span(self.partition_offset[fp], self.partition_offset[fp + 1])?;
        }
        self.compute_comm.barrier()?;
        Ok(())
    }

    /// Restore from a dump file; the file length must match exactly.
    pub fn restore_vertex_array<T: Pod + Send>(
        &self,
        array: &VertexArray<T>,
        path: &Path,
    ) -> Result<()> {
        self.ensure_compute()?;
        let unit = std::mem::size_of::<T>() as u64;
        let file = PositionedFile::open(path)?;
        let expect = unit * self.vertices as u64;
        if file.len()? != expect {
            return Err(GaleError::config(format!(
                "vertex dump is {} bytes, expected {expect}",
                file.len()?
            )));
        }
        let read_span = |start: VertexId, end: VertexId| -> Result<()> {
            let mut span = vec![T::zeroed(); (end - start) as usize];
            file.read_exact_at(unit * start as u64, bytemuck::cast_slice_mut(&mut span))?;
            array.store_range(start, &span);
            Ok(())
        };
        let (a, b) = self.owned_range();
        read_span(a, b)?;
        for fp in self.delegated_partitions() {
            read_span(self.partition_offset[fp], self.partition_offset[fp + 1])?;
        }
        Ok(())
    }

    // ---- parallel vertex processing ----

    /// Work-stealing parallel map-reduce over the active bits of the owned
    /// range, then over each delegated far-memory range, finished by an
    /// all-reduce SUM across the compute communicator.
    pub fn process_vertices<R, F>(&self, process: F, active: &Bitmap) -> Result<R>
    where
        R: Reducer,
        F: Fn(VertexId) -> R + Sync,
    {
        self.ensure_compute()?;
        let tps = self.pool.threads_per_socket();
        let lpo = &self.local_partition_offset;
        for (t, st) in self.thread_state.iter().enumerate() {
            let s = t / tps;
            let range = even_split((lpo[s + 1] - lpo[s]) as usize, tps, t % tps);
            st.assign(lpo[s] as usize + range.curr, lpo[s] as usize + range.end);
        }
        let mut reducer = self.steal_scan(active, &process);

        for fp in self.delegated_partitions() {
            let start = self.partition_offset[fp] as usize;
            let size = (self.partition_offset[fp + 1] - self.partition_offset[fp]) as usize;
            let threads = self.pool.threads();
            for (t, st) in self.thread_state.iter().enumerate() {
                let range = even_split(size, threads, t);
                st.assign(start + range.curr, start + range.end);
            }
            reducer = reducer.combine(self.steal_scan(active, &process));
        }

        let mut out = [reducer];
        self.compute_comm
            .all_reduce(&mut out, |a: R, b: R| a.combine(b))?;
        Ok(out[0])
    }

    /// One claim-then-steal sweep over whatever ranges `thread_state`
    /// currently holds.
    fn steal_scan<R, F>(&self, active: &Bitmap, process: &F) -> R
    where
        R: Reducer,
        F: Fn(VertexId) -> R + Sync,
    {
        let threads = self.pool.threads();
        let states = &self.thread_state;
        let partial = self.pool.broadcast(|me| {
            let mut local = R::zero();
            loop {
                let b = states[me].claim(BASIC_CHUNK);
                if b >= states[me].end() {
                    break;
                }
                let end = (b + BASIC_CHUNK).min(states[me].end());
                scan_active(active, b as VertexId, end as VertexId, |v| {
                    local = local.combine(process(v));
                });
            }
            states[me].enter_stealing();
            for off in 1..threads {
                let peer = (me + off) % threads;
                while states[peer].is_working() {
                    let b = states[peer].claim(BASIC_CHUNK);
                    if b >= states[peer].end() {
                        continue;
                    }
                    let end = (b + BASIC_CHUNK).min(states[peer].end());
                    scan_active(active, b as VertexId, end as VertexId, |v| {
                        local = local.combine(process(v));
                    });
                }
            }
            local
        });
        partial
            .into_iter()
            .fold(R::zero(), |acc, r| acc.combine(r))
    }

    /// Swap the outgoing and incoming sides: degrees, shards, windows,
    /// caches and tuned chunks.
    pub fn transpose(&mut self) {
        std::mem::swap(&mut self.out_degree, &mut self.in_degree);
        std::mem::swap(&mut self.outgoing, &mut self.incoming);
        std::mem::swap(&mut self.outgoing_windows, &mut self.incoming_windows);
        std::mem::swap(&mut self.outgoing_caches, &mut self.incoming_caches);
        std::mem::swap(&mut self.tuned_dense, &mut self.tuned_sparse);
    }
}

impl<E: EdgeData, C: Communicator> Drop for Graph<E, C> {
    fn drop(&mut self) {
        // Release the lifetime shared-lock sessions; peers may already be
        // gone, so failures are ignored.
        if self.is_compute() {
            for fp in self.compute_partitions..self.partitions {
                for s in 0..self.cfg.sockets {
                    let _ = self.outgoing_windows.list[s].unlock(fp);
                    if !self.symmetric {
                        let _ = self.incoming_windows.list[s].unlock(fp);
                    }
                }
            }
        }
    }
}

fn clone_shard<E: EdgeData>(shard: &AdjacencyShard<E>) -> AdjacencyShard<E> {
    AdjacencyShard {
        bitmap: Arc::clone(&shard.bitmap),
        index: Arc::clone(&shard.index),
        list: Arc::clone(&shard.list),
        compressed: shard.compressed.clone(),
        edge_count: shard.edge_count,
    }
}

pub(crate) fn delegated_partitions(
    partition: usize,
    compute_partitions: usize,
    partitions: usize,
) -> Vec<usize> {
    (compute_partitions..partitions)
        .filter(|i| i % compute_partitions == partition)
        .collect()
}
