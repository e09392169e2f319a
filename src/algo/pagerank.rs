//! PageRank over the signal/slot engine.

use tracing::info;

use crate::comm::Communicator;
use crate::error::Result;
use crate::graph::Graph;
use crate::types::{EdgeData, VertexId};
use crate::vertex::VertexArray;

#[derive(Debug, Clone, Copy)]
pub struct PageRankOptions {
    pub damping: f64,
    pub iterations: usize,
}

impl Default for PageRankOptions {
    fn default() -> Self {
        PageRankOptions {
            damping: 0.85,
            iterations: 20,
        }
    }
}

/// Classic power iteration: ranks start at 1.0, each round every vertex
/// scatters `rank / out_degree` along its outgoing edges and settles at
/// `(1 - d) + d * sum(incoming)`. Returns the rank array; the delta of the
/// final iteration is logged at rank 0.
pub fn pagerank<E, C>(
    graph: &mut Graph<E, C>,
    options: PageRankOptions,
) -> Result<VertexArray<f64>>
where
    E: EdgeData,
    C: Communicator,
{
    let curr = graph.alloc_vertex_array::<f64>();
    let acc = graph.alloc_vertex_array::<f64>();
    graph.fill_vertex_array(&curr, 1.0);

    let active = graph.alloc_vertex_subset();
    active.fill();

    let d = options.damping;
    let out_degree: Vec<VertexId> = graph.out_degree().to_vec();
    for iteration in 0..options.iterations {
        graph.fill_vertex_array(&acc, 0.0);
        let _msgs: u64 = graph.process_edges(
            |ctx, src| {
                let deg = out_degree[src as usize].max(1) as f64;
                ctx.emit(src, curr.get(src) / deg);
            },
            |_src, contribution, adj| {
                for unit in adj {
                    acc.write_add(unit.neighbour, contribution);
                }
                adj.len() as u64
            },
            |ctx, dst, adj_in| {
                let mut sum = 0.0;
                for unit in adj_in {
                    let src = unit.neighbour;
                    sum += curr.get(src) / out_degree[src as usize].max(1) as f64;
                }
                ctx.emit(dst, sum);
            },
            |dst, sum| {
                acc.write_add(dst, sum);
                1u64
            },
            &active,
            None,
        )?;
        let delta: f64 = graph.process_vertices(
            |v| {
                let next = (1.0 - d) + d * acc.get(v);
                let diff = (next - curr.get(v)).abs();
                curr.set(v, next);
                diff
            },
            &active,
        )?;
        if graph.partition_id() == 0 {
            info!(iteration, delta, "pagerank iteration");
        }
    }
    Ok(curr)
}
