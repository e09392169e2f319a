//! Frontier-driven breadth-first search.

use tracing::info;

use crate::comm::Communicator;
use crate::error::Result;
use crate::graph::Graph;
use crate::types::{EdgeData, VertexId, INVALID_VERTEX};
use crate::vertex::VertexArray;

/// BFS from `root`; returns the parent array, `INVALID_VERTEX` for
/// unreached vertices and `root` for itself.
pub fn bfs<E, C>(graph: &mut Graph<E, C>, root: VertexId) -> Result<VertexArray<VertexId>>
where
    E: EdgeData,
    C: Communicator,
{
    let parent = graph.alloc_vertex_array::<VertexId>();
    graph.fill_vertex_array(&parent, INVALID_VERTEX);
    parent.set(root, root);

    let mut active = graph.alloc_vertex_subset();
    active.set_bit(root);
    let mut frontier: u64 = 1;
    let mut level = 0usize;

    while frontier > 0 {
        let next = graph.alloc_vertex_subset();
        let discovered: u64 = graph.process_edges(
            |ctx, src| {
                ctx.emit(src, src);
            },
            |_src, src, adj| {
                let mut found = 0u64;
                for unit in adj {
                    let dst = unit.neighbour;
                    if parent.get(dst) == INVALID_VERTEX
                        && parent.claim(dst, INVALID_VERTEX, src)
                    {
                        next.set_bit(dst);
                        found += 1;
                    }
                }
                found
            },
            |ctx, dst, adj_in| {
                if parent.get(dst) != INVALID_VERTEX {
                    return;
                }
                for unit in adj_in {
                    let src = unit.neighbour;
                    if active.get_bit(src) {
                        ctx.emit(dst, src);
                        break;
                    }
                }
            },
            |dst, src| {
                if parent.get(dst) == INVALID_VERTEX && parent.claim(dst, INVALID_VERTEX, src) {
                    next.set_bit(dst);
                    1u64
                } else {
                    0
                }
            },
            &active,
            Some(&active),
        )?;
        active = next;
        frontier = discovered;
        level += 1;
        if graph.partition_id() == 0 {
            info!(level, frontier, "bfs level");
        }
    }
    Ok(parent)
}
