//! Connected components by label propagation (minimum label wins).

use tracing::info;

use crate::comm::Communicator;
use crate::error::Result;
use crate::graph::Graph;
use crate::types::{EdgeData, VertexId};
use crate::vertex::VertexArray;

/// Propagate minimum labels until a fixpoint; intended for symmetric
/// graphs, where the result is the connected component id of each vertex
/// (on directed graphs it computes the analogous forward-propagation
/// fixpoint).
pub fn connected_components<E, C>(graph: &mut Graph<E, C>) -> Result<VertexArray<VertexId>>
where
    E: EdgeData,
    C: Communicator,
{
    let label = graph.alloc_vertex_array::<VertexId>();
    // Every rank seeds the full array: dense sweeps read labels of remote
    // sources, and min-propagation tolerates staleness but not zeros.
    for v in 0..graph.vertices() {
        label.set(v, v);
    }
    let seed = graph.alloc_vertex_subset();
    seed.fill();

    let mut active = seed;
    let mut changed: u64 = 1;
    let mut round = 0usize;
    while changed > 0 {
        let next = graph.alloc_vertex_subset();
        changed = graph.process_edges(
            |ctx, src| {
                ctx.emit(src, label.get(src));
            },
            |_src, incoming, adj| {
                let mut updates = 0u64;
                for unit in adj {
                    let dst = unit.neighbour;
                    loop {
                        let current = label.get(dst);
                        if incoming >= current {
                            break;
                        }
                        if label.claim(dst, current, incoming) {
                            next.set_bit(dst);
                            updates += 1;
                            break;
                        }
                    }
                }
                updates
            },
            |ctx, dst, adj_in| {
                let mut best = label.get(dst);
                for unit in adj_in {
                    best = best.min(label.get(unit.neighbour));
                }
                if best < label.get(dst) {
                    ctx.emit(dst, best);
                }
            },
            |dst, candidate| {
                loop {
                    let current = label.get(dst);
                    if candidate >= current {
                        return 0u64;
                    }
                    if label.claim(dst, current, candidate) {
                        next.set_bit(dst);
                        return 1;
                    }
                }
            },
            &active,
            None,
        )?;
        active = next;
        round += 1;
        if graph.partition_id() == 0 {
            info!(round, changed, "label propagation round");
        }
    }
    Ok(label)
}
