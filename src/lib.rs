pub mod algo;
pub mod bitmap;
pub mod buffer;
pub mod cache;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod io;
pub mod partition;
pub mod prefetch;
pub mod storage;
pub mod types;
pub mod vertex;
pub mod workers;

pub use crate::bitmap::Bitmap;
pub use crate::buffer::EmitCtx;
pub use crate::comm::local::{LocalCluster, LocalComm};
pub use crate::comm::{Communicator, RemoteWindow, Tag};
pub use crate::config::{EngineConfig, EngineMode};
pub use crate::error::{GaleError, Result};
pub use crate::graph::Graph;
pub use crate::types::{
    AdjUnit, EdgeData, EdgeId, EdgeRecord, Empty, PartitionId, Reducer, SocketId, VertexId,
    INVALID_VERTEX,
};
pub use crate::vertex::VertexArray;
