//! Abstract instruction stream emitted from graphs and blocks.

pub mod render;
pub mod trace;

use serde::{Deserialize, Serialize};

use crate::access::TileIndex;
use crate::dataflow::{AttachedEdge, Block, Graph, NodeKind, OpKind, TransferKind};
use crate::error::FlowResult;

pub use render::{
    collect_block_transfers, collect_transfers, render, render_declarations, RenderOptions,
    TransferDecl,
};
pub use trace::{expand, TraceEvent};

/// One tile copy between adjacent tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: String,
    pub dest: String,
    pub kind: TransferKind,
    pub index: TileIndex,
}

impl Transfer {
    fn from_edge(edge: &AttachedEdge) -> Self {
        Self {
            source: edge.source().name().to_string(),
            dest: edge.dest().name().to_string(),
            kind: edge.kind(),
            index: edge.index_expr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Compute {
        op: OpKind,
        operands: Vec<String>,
        result: String,
    },
    Load(Transfer),
    Store(Transfer),
    LoopBegin {
        var: String,
        low: i64,
        high: i64,
    },
    LoopEnd {
        var: String,
    },
}

pub fn instructions_to_json(instructions: &[Instruction]) -> FlowResult<String> {
    Ok(serde_json::to_string_pretty(instructions)?)
}

pub(crate) fn emit_graph(graph: &Graph, out: &mut Vec<Instruction>) -> FlowResult<()> {
    for node in graph.topological_order()? {
        match node.kind() {
            NodeKind::Tensor(_) => {}
            NodeKind::Compute { op, operands } => {
                let mut names: Vec<String> = operands.iter().map(|node| node.label()).collect();
                let result = names.pop().unwrap_or_default();
                out.push(Instruction::Compute {
                    op: *op,
                    operands: names,
                    result,
                });
            }
            NodeKind::Block(block) => emit_block(block, out)?,
        }
    }
    Ok(())
}

pub(crate) fn emit_block(block: &Block, out: &mut Vec<Instruction>) -> FlowResult<()> {
    emit_level(block, 0, out)
}

fn emit_level(block: &Block, depth: usize, out: &mut Vec<Instruction>) -> FlowResult<()> {
    for edge in block.loads() {
        if block.placement_depth(edge.access()) == depth {
            out.push(Instruction::Load(Transfer::from_edge(edge)));
        }
    }
    match block.iteration_vars().get(depth) {
        Some(var) => {
            out.push(Instruction::LoopBegin {
                var: var.name().to_string(),
                low: var.low(),
                high: var.high(),
            });
            emit_level(block, depth + 1, out)?;
            out.push(Instruction::LoopEnd {
                var: var.name().to_string(),
            });
        }
        None => emit_graph(block.body(), out)?,
    }
    for edge in block.stores() {
        if block.placement_depth(edge.access()) == depth {
            out.push(Instruction::Store(Transfer::from_edge(edge)));
        }
    }
    Ok(())
}
