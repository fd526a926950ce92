//! Dependency graphs, blocks and the edges between them.

pub mod block;
pub mod edge;
pub mod graph;
pub mod node;

pub use block::Block;
pub use edge::{AttachedEdge, Edge, TransferKind};
pub use graph::Graph;
pub use node::{Node, NodeId, NodeKind, NodeRef, OpKind};
