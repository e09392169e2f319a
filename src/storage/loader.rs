//! Edge-file scanning and the shuffle pipeline.
//!
//! The edge file is a flat array of packed `(src, dst[, payload])` records.
//! Every process reads one contiguous record range. Loading streams the
//! file twice per adjacency side: a count pass and a place pass, each
//! routing edges to their owning partition in chunked sends, with a single
//! receive thread per process consuming them. A one-byte sentinel from
//! every sender terminates a receive loop.

use std::path::Path;

use bytemuck::Zeroable;
use tracing::debug;

use crate::comm::{Communicator, Tag};
use crate::error::{GaleError, Result};
use crate::io::PositionedFile;
use crate::partition::find_partition;
use crate::types::{EdgeData, EdgeId, EdgeRecord, VertexId};

/// Records per read chunk and per routed send chunk.
pub(crate) const CHUNK_EDGES: usize = 1 << 16;

/// Which endpoint routes an edge to its owning partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteBy {
    /// Outgoing side: the destination's owner stores the edge.
    Dst,
    /// Incoming side: the source's owner stores the edge.
    Src,
}

/// This process's contiguous record range of the edge file: the trailing
/// remainder goes to the last process.
pub(crate) fn read_range(edges: EdgeId, rank: usize, size: usize) -> (EdgeId, EdgeId) {
    let per = edges / size as EdgeId;
    let start = per * rank as EdgeId;
    let count = if rank == size - 1 {
        edges - start
    } else {
        per
    };
    (start, count)
}

/// Stream `count` records starting at record `start`, in `CHUNK_EDGES`
/// batches.
pub(crate) fn scan_records<E, F>(
    path: &Path,
    start: EdgeId,
    count: EdgeId,
    mut f: F,
) -> Result<()>
where
    E: EdgeData,
    F: FnMut(&[EdgeRecord<E>]) -> Result<()>,
{
    let unit = std::mem::size_of::<EdgeRecord<E>>() as u64;
    let file = PositionedFile::open(path)?;
    let mut buf: Vec<EdgeRecord<E>> = vec![EdgeRecord::zeroed(); CHUNK_EDGES];
    let mut done: EdgeId = 0;
    while done < count {
        let batch = (count - done).min(CHUNK_EDGES as EdgeId) as usize;
        let bytes = bytemuck::cast_slice_mut(&mut buf[..batch]);
        file.read_exact_at((start + done) * unit, bytes)?;
        f(&buf[..batch])?;
        done += batch as EdgeId;
    }
    Ok(())
}

/// Degree pass: read this process's range, bump per-endpoint counters, then
/// all-reduce SUM so every process holds global degrees. For symmetric
/// graphs both endpoints count toward `out`; for directed graphs `src`
/// counts toward `out` and `dst` toward `in`.
pub(crate) fn accumulate_degrees<E, C>(
    comm: &C,
    path: &Path,
    vertices: VertexId,
    edges: EdgeId,
    symmetric: bool,
) -> Result<(Vec<VertexId>, Vec<VertexId>)>
where
    E: EdgeData,
    C: Communicator,
{
    let mut out_degree = vec![0 as VertexId; vertices as usize];
    let mut in_degree = if symmetric {
        Vec::new()
    } else {
        vec![0 as VertexId; vertices as usize]
    };
    let (start, count) = read_range(edges, comm.rank(), comm.size());
    scan_records::<E, _>(path, start, count, |records| {
        for r in records {
            let (src, dst) = (r.src, r.dst);
            if src >= vertices || dst >= vertices {
                return Err(GaleError::config(format!(
                    "edge ({src}, {dst}) out of range for {vertices} vertices"
                )));
            }
            if symmetric {
                out_degree[src as usize] += 1;
                out_degree[dst as usize] += 1;
            } else {
                out_degree[src as usize] += 1;
                in_degree[dst as usize] += 1;
            }
        }
        Ok(())
    })?;
    comm.all_reduce(&mut out_degree, crate::comm::ops::sum)?;
    if symmetric {
        in_degree = out_degree.clone();
    } else {
        comm.all_reduce(&mut in_degree, crate::comm::ops::sum)?;
    }
    debug!(rank = comm.rank(), "degree pass complete");
    Ok((out_degree, in_degree))
}

/// One shuffle pass: re-read this process's record range, route every edge
/// by its `route` endpoint, send in chunks, and feed received edges to
/// `on_edge` on the receive thread. When `mirror` is set each read edge is
/// also routed a second time with src/dst swapped (symmetric loading).
pub(crate) fn shuffle_pass<E, C, F>(
    comm: &C,
    path: &Path,
    edges: EdgeId,
    partition_offset: &[VertexId],
    route: RouteBy,
    mirror: bool,
    on_edge: F,
) -> Result<()>
where
    E: EdgeData,
    C: Communicator,
    F: FnMut(EdgeRecord<E>) -> Result<()> + Send,
{
    let partitions = comm.size();
    let (start, count) = read_range(edges, comm.rank(), comm.size());
    std::thread::scope(|scope| -> Result<()> {
        let receiver = scope.spawn(move || receive_loop::<E, C, F>(comm, partitions, on_edge));

        let send_result = (|| -> Result<()> {
            let mut buffers: Vec<Vec<EdgeRecord<E>>> =
                (0..partitions).map(|_| Vec::with_capacity(CHUNK_EDGES)).collect();
            let mut route_one = |r: EdgeRecord<E>| -> Result<()> {
                let key = match route {
                    RouteBy::Dst => r.dst,
                    RouteBy::Src => r.src,
                };
                let p = find_partition(partition_offset, key);
                buffers[p].push(r);
                if buffers[p].len() == CHUNK_EDGES {
                    comm.send(p, Tag::ShuffleGraph, &buffers[p])?;
                    buffers[p].clear();
                }
                Ok(())
            };
            scan_records::<E, _>(path, start, count, |records| {
                for r in records {
                    route_one(*r)?;
                }
                if mirror {
                    for r in records {
                        route_one(r.swapped())?;
                    }
                }
                Ok(())
            })?;
            for p in 0..partitions {
                if !buffers[p].is_empty() {
                    comm.send(p, Tag::ShuffleGraph, &buffers[p])?;
                }
            }
            Ok(())
        })();

        // Sentinels terminate every peer's receive loop; send them even on
        // a local failure so nobody hangs on our silence.
        for p in 0..partitions {
            let _ = comm.send(p, Tag::ShuffleGraph, &[0u8]);
        }
        let recv_result = receiver
            .join()
            .map_err(|_| GaleError::Corruption("shuffle receive thread panicked".into()))?;
        send_result?;
        recv_result
    })
}

fn receive_loop<E, C, F>(comm: &C, partitions: usize, mut on_edge: F) -> Result<()>
where
    E: EdgeData,
    C: Communicator,
    F: FnMut(EdgeRecord<E>) -> Result<()>,
{
    let unit = std::mem::size_of::<EdgeRecord<E>>();
    let mut finished = 0usize;
    let mut received: u64 = 0;
    while finished < partitions {
        let env = comm.probe(None, Tag::ShuffleGraph)?;
        if env.bytes == 1 {
            let _: Vec<u8> = comm.recv_vec(env.source, Tag::ShuffleGraph)?;
            finished += 1;
            continue;
        }
        if env.bytes % unit != 0 {
            return Err(GaleError::protocol(format!(
                "shuffle message of {} bytes from rank {} is not a whole number of records",
                env.bytes, env.source
            )));
        }
        let records: Vec<EdgeRecord<E>> = comm.recv_vec(env.source, Tag::ShuffleGraph)?;
        received += records.len() as u64;
        for r in records {
            on_edge(r)?;
        }
    }
    debug!(rank = comm.rank(), received, "shuffle pass received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::LocalCluster;
    use crate::types::Empty;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn write_edge_file(dir: &Path, edges: &[(u32, u32)]) -> PathBuf {
        let path = dir.join("edges.bin");
        let records: Vec<EdgeRecord<Empty>> = edges
            .iter()
            .map(|&(src, dst)| EdgeRecord {
                src,
                dst,
                data: Empty,
            })
            .collect();
        std::fs::write(&path, bytemuck::cast_slice(&records)).unwrap();
        path
    }

    #[test]
    fn read_range_covers_all_records() {
        let (s0, c0) = read_range(10, 0, 3);
        let (s1, c1) = read_range(10, 1, 3);
        let (s2, c2) = read_range(10, 2, 3);
        assert_eq!((s0, c0), (0, 3));
        assert_eq!((s1, c1), (3, 3));
        assert_eq!((s2, c2), (6, 4));
    }

    #[test]
    fn degrees_sum_across_ranks() {
        let dir = tempdir().unwrap();
        let path = write_edge_file(dir.path(), &[(0, 1), (1, 2), (2, 0), (0, 2)]);
        let comms = LocalCluster::comms(2);
        let outs: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let path = path.clone();
                    s.spawn(move || {
                        accumulate_degrees::<Empty, _>(&comm, &path, 3, 4, false).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (out_degree, in_degree) in &outs {
            assert_eq!(out_degree, &vec![2, 1, 1]);
            assert_eq!(in_degree, &vec![1, 1, 2]);
        }
    }

    #[test]
    fn shuffle_routes_by_destination() {
        let dir = tempdir().unwrap();
        let path = write_edge_file(dir.path(), &[(0, 1), (1, 2), (2, 0)]);
        let offsets = vec![0u32, 2, 3];
        let comms = LocalCluster::comms(2);
        let got = Mutex::new(vec![Vec::new(), Vec::new()]);
        std::thread::scope(|s| {
            for comm in comms {
                let path = path.clone();
                let offsets = offsets.clone();
                let got = &got;
                s.spawn(move || {
                    let mut mine = Vec::new();
                    shuffle_pass::<Empty, _, _>(
                        &comm,
                        &path,
                        3,
                        &offsets,
                        RouteBy::Dst,
                        false,
                        |r| {
                            mine.push((r.src, r.dst));
                            Ok(())
                        },
                    )
                    .unwrap();
                    mine.sort_unstable();
                    got.lock().unwrap()[comm.rank()] = mine;
                });
            }
        });
        let got = got.into_inner().unwrap();
        // Partition 0 owns vertices [0, 2): receives edges with dst 0 or 1.
        assert_eq!(got[0], vec![(0, 1), (2, 0)]);
        // Partition 1 owns vertex 2.
        assert_eq!(got[1], vec![(1, 2)]);
    }

    #[test]
    fn mirrored_shuffle_doubles_edges() {
        let dir = tempdir().unwrap();
        let path = write_edge_file(dir.path(), &[(0, 1)]);
        let offsets = vec![0u32, 2];
        let comms = LocalCluster::comms(1);
        let mut mine = Vec::new();
        shuffle_pass::<Empty, _, _>(
            &comms[0],
            &path,
            1,
            &offsets,
            RouteBy::Dst,
            true,
            |r| {
                mine.push((r.src, r.dst));
                Ok(())
            },
        )
        .unwrap();
        mine.sort_unstable();
        assert_eq!(mine, vec![(0, 1), (1, 0)]);
    }
}
