//! Tile movement scheduling and loop-nest code generation for tiled GEMM
//! kernels.
//!
//! Tensors live in one of three memory tiers. Compute nodes and tensors form
//! per-tier [`Graph`]s; a [`Block`] wraps a graph in a loop nest together with
//! the [`AttachedEdge`]s that move tiles in and out of it, and becomes a node
//! of the next tier's graph. Any connected graph or block can emit its
//! [`Instruction`] stream and plan storage with [`Graph::allocate_var`].

pub mod access;
pub mod allocate;
pub mod codegen;
pub mod dataflow;
mod env;
pub mod error;
pub mod tensor;
pub mod var;
pub mod walk;

pub use access::{AccessMap, AffineExpr, TileIndex};
pub use allocate::{AllocateOptions, Allocation, AllocationPlan, LiveRange};
pub use codegen::{
    expand, instructions_to_json, render, render_declarations, Instruction, RenderOptions,
    TraceEvent, Transfer,
};
pub use dataflow::{
    AttachedEdge, Block, Edge, Graph, Node, NodeId, NodeKind, NodeRef, OpKind, TransferKind,
};
pub use error::{FlowError, FlowResult};
pub use tensor::{DType, Layout, Tensor, TensorRef, Tier};
pub use var::{IterVarRef, IterationVar};
