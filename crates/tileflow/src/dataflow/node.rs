use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataflow::block::Block;
use crate::error::{FlowError, FlowResult};
use crate::tensor::TensorRef;

static NODE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Process-unique node identity. Two handles name the same node exactly when
/// their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    fn next() -> Self {
        NodeId(NODE_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Compute operations a node may perform. The last operand is always the
/// result tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// `acc += a * b` over operands `[a, b, acc]`.
    Gemm,
    /// Element type conversion over operands `[src, dst]`.
    Convert,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Gemm => "gemm",
            OpKind::Convert => "convert",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            OpKind::Gemm => 3,
            OpKind::Convert => 2,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Tensor(TensorRef),
    Compute { op: OpKind, operands: Vec<NodeRef> },
    Block(Block),
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
}

pub type NodeRef = Arc<Node>;

impl Node {
    pub fn tensor(tensor: &TensorRef) -> NodeRef {
        Self::with_kind(NodeKind::Tensor(Arc::clone(tensor)))
    }

    /// GEMM over tensor nodes `a: [m, k]`, `b: [k, n]` and `acc: [m, n]`,
    /// all held in one tier.
    pub fn gemm(a: &NodeRef, b: &NodeRef, acc: &NodeRef) -> FlowResult<NodeRef> {
        let op = OpKind::Gemm;
        let lhs = operand_tensor(op, a)?;
        let rhs = operand_tensor(op, b)?;
        let out = operand_tensor(op, acc)?;
        for tensor in [lhs, rhs, out] {
            if tensor.rank() != 2 {
                return Err(invalid_operand(
                    op,
                    tensor,
                    format!("expected a rank 2 tile, found rank {}", tensor.rank()),
                ));
            }
        }
        check_same_tier(op, lhs, [rhs, out])?;
        let (m, k) = (lhs.shape()[0], lhs.shape()[1]);
        if rhs.shape()[0] != k {
            return Err(invalid_operand(
                op,
                rhs,
                format!("expected {k} rows to match {}, found {:?}", lhs.name(), rhs.shape()),
            ));
        }
        let n = rhs.shape()[1];
        if out.shape() != [m, n] {
            return Err(invalid_operand(
                op,
                out,
                format!("expected accumulator shape [{m}, {n}], found {:?}", out.shape()),
            ));
        }
        Ok(Self::with_kind(NodeKind::Compute {
            op,
            operands: vec![Arc::clone(a), Arc::clone(b), Arc::clone(acc)],
        }))
    }

    /// Conversion between two tensors of one shape and tier.
    pub fn convert(src: &NodeRef, dst: &NodeRef) -> FlowResult<NodeRef> {
        let op = OpKind::Convert;
        let from = operand_tensor(op, src)?;
        let to = operand_tensor(op, dst)?;
        if from.shape() != to.shape() {
            return Err(invalid_operand(
                op,
                to,
                format!("expected shape {:?}, found {:?}", from.shape(), to.shape()),
            ));
        }
        check_same_tier(op, from, [to])?;
        Ok(Self::with_kind(NodeKind::Compute {
            op,
            operands: vec![Arc::clone(src), Arc::clone(dst)],
        }))
    }

    pub fn block(block: Block) -> NodeRef {
        Self::with_kind(NodeKind::Block(block))
    }

    fn with_kind(kind: NodeKind) -> NodeRef {
        Arc::new(Node {
            id: NodeId::next(),
            kind,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn as_tensor(&self) -> Option<&TensorRef> {
        match &self.kind {
            NodeKind::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match &self.kind {
            NodeKind::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Compute operands, empty for tensor and block nodes.
    pub fn operands(&self) -> &[NodeRef] {
        match &self.kind {
            NodeKind::Compute { operands, .. } => operands,
            _ => &[],
        }
    }

    pub fn label(&self) -> String {
        match &self.kind {
            NodeKind::Tensor(tensor) => tensor.name().to_string(),
            NodeKind::Compute { op, operands } => {
                let names: Vec<String> = operands.iter().map(|node| node.label()).collect();
                format!("{op}({})", names.join(", "))
            }
            NodeKind::Block(block) => block.label(),
        }
    }
}

fn operand_tensor(op: OpKind, node: &NodeRef) -> FlowResult<&TensorRef> {
    node.as_tensor().ok_or_else(|| FlowError::InvalidOperand {
        op: op.name().to_string(),
        operand: node.label(),
        reason: "operands must be tensor nodes".to_string(),
    })
}

fn check_same_tier<'a>(
    op: OpKind,
    first: &TensorRef,
    rest: impl IntoIterator<Item = &'a TensorRef>,
) -> FlowResult<()> {
    for tensor in rest {
        if tensor.tier() != first.tier() {
            return Err(invalid_operand(
                op,
                tensor,
                format!(
                    "lives in {} memory but {} lives in {} memory",
                    tensor.tier(),
                    first.name(),
                    first.tier()
                ),
            ));
        }
    }
    Ok(())
}

fn invalid_operand(op: OpKind, tensor: &TensorRef, reason: String) -> FlowError {
    FlowError::InvalidOperand {
        op: op.name().to_string(),
        operand: tensor.name().to_string(),
        reason,
    }
}
