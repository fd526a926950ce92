use thiserror::Error;

use crate::tensor::Tier;

/// Every way graph construction, validation, scheduling or allocation can fail.
///
/// All structural checks run when values are built or when a graph is
/// connected; a connected [`crate::Graph`] or a constructed [`crate::Block`]
/// never fails during codegen.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("node {node} was already added to the graph")]
    DuplicateNode { node: String },
    #[error("edge {from} -> {to} references node {missing} which is not in the graph")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },
    #[error("dependency cycle through nodes [{}]", .nodes.join(", "))]
    Cycle { nodes: Vec<String> },
    #[error("graph must be connected before {operation}")]
    NotConnected { operation: &'static str },
    #[error("malformed access map: {reason}")]
    AccessMapShape { reason: String },
    #[error("access {edge} leaves dimension {dim} unselected but it spans {tiles} tiles")]
    UnderSpecifiedAccess {
        edge: String,
        dim: usize,
        tiles: usize,
    },
    #[error(
        "access {edge} reaches tiles {min}..={max} along dimension {dim}, valid tiles are 0..{tiles}"
    )]
    AccessOutOfBounds {
        edge: String,
        dim: usize,
        min: i64,
        max: i64,
        tiles: usize,
    },
    #[error("{from_tier} tensor {from} cannot be linked directly to {to_tier} tensor {to}")]
    TierMismatch {
        from: String,
        from_tier: Tier,
        to: String,
        to_tier: Tier,
    },
    #[error("invalid tensor name {name:?}: {reason}")]
    InvalidTensorName { name: String, reason: String },
    #[error("invalid shape for tensor {tensor}: {reason}")]
    InvalidShape { tensor: String, reason: String },
    #[error("iteration var {name} has inverted range {low}..{high}")]
    InvalidRange { name: String, low: i64, high: i64 },
    #[error("iteration var {name} is declared twice in {context}")]
    DuplicateIterationVar { name: String, context: String },
    #[error("iteration var {var} used by {context} is not bound by the enclosing loop nest")]
    UnboundIterationVar { var: String, context: String },
    #[error("block {role} tensor {tensor} does not appear in the body graph")]
    MissingBlockTensor { role: &'static str, tensor: String },
    #[error("tensor name {name} refers to two different tensors")]
    TensorNameConflict { name: String },
    #[error("{op} operand {operand} is invalid: {reason}")]
    InvalidOperand {
        op: String,
        operand: String,
        reason: String,
    },
    #[error("{op} operand {operand} is not linked to its compute node in this graph")]
    UnlinkedOperand { op: String, operand: String },
    #[error("loop markers are unbalanced at {var}")]
    UnbalancedLoop { var: String },
    #[error("{tier} storage needs {required} bytes but only {capacity} are available")]
    CapacityExceeded {
        tier: Tier,
        required: usize,
        capacity: usize,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FlowResult<T> = Result<T, FlowError>;
