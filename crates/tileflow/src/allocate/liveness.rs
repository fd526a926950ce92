use std::collections::HashMap;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::codegen::{Instruction, Transfer};
use crate::dataflow::OpKind;
use crate::error::{FlowError, FlowResult};
use crate::tensor::TensorRef;

/// Inclusive range of instruction positions during which a tensor holds a
/// value that is still needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn cover(&mut self, pos: usize) {
        self.start = self.start.min(pos);
        self.end = self.end.max(pos);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Use,
    Def,
    ReadWrite,
}

#[derive(Debug)]
struct LoopFrame<'a> {
    var: &'a str,
    start: usize,
    first: Vec<(&'a str, Access)>,
}

#[derive(Debug, Default)]
pub(crate) struct Liveness {
    pub(crate) ranges: HashMap<String, LiveRange>,
    /// Tensor names in order of first reference.
    pub(crate) order: Vec<String>,
}

/// Stamps every tensor reference with its instruction position.
///
/// A tensor whose first reference inside a loop reads its previous value is
/// carried across iterations, so its range is widened to the whole loop.
pub(crate) fn analyze(
    instructions: &[Instruction],
    tensors: &HashMap<String, TensorRef>,
) -> FlowResult<Liveness> {
    let mut liveness = Liveness::default();
    let mut frames: Vec<LoopFrame<'_>> = Vec::new();

    for (pos, inst) in instructions.iter().enumerate() {
        match inst {
            Instruction::LoopBegin { var, .. } => frames.push(LoopFrame {
                var,
                start: pos,
                first: Vec::new(),
            }),
            Instruction::LoopEnd { var } => {
                let frame = match frames.pop() {
                    Some(frame) if frame.var == var.as_str() => frame,
                    _ => return Err(FlowError::UnbalancedLoop { var: var.clone() }),
                };
                for (name, access) in frame.first {
                    if access == Access::Def {
                        continue;
                    }
                    if let Some(range) = liveness.ranges.get_mut(name) {
                        range.cover(frame.start);
                        range.cover(pos);
                        trace!("{name} is carried across loop {var}: live {}..={}", range.start, range.end);
                    }
                }
            }
            Instruction::Load(transfer) | Instruction::Store(transfer) => {
                let dest_access = if writes_partial_dest(transfer, tensors) {
                    Access::ReadWrite
                } else {
                    Access::Def
                };
                liveness.reference(&mut frames, &transfer.source, Access::Use, pos);
                liveness.reference(&mut frames, &transfer.dest, dest_access, pos);
            }
            Instruction::Compute {
                op,
                operands,
                result,
            } => {
                for operand in operands {
                    liveness.reference(&mut frames, operand, Access::Use, pos);
                }
                let result_access = match op {
                    OpKind::Gemm => Access::ReadWrite,
                    OpKind::Convert => Access::Def,
                };
                liveness.reference(&mut frames, result, result_access, pos);
            }
        }
    }
    if let Some(frame) = frames.pop() {
        return Err(FlowError::UnbalancedLoop {
            var: frame.var.to_string(),
        });
    }
    Ok(liveness)
}

impl Liveness {
    /// Keeps an already referenced tensor live through `end`.
    pub(crate) fn keep_live(&mut self, name: &str, end: usize) {
        if let Some(range) = self.ranges.get_mut(name) {
            range.cover(end);
            trace!("{name} is a graph output: live {}..={}", range.start, range.end);
        }
    }

    fn reference<'a>(
        &mut self,
        frames: &mut [LoopFrame<'a>],
        name: &'a str,
        access: Access,
        pos: usize,
    ) {
        trace!("{name}: {access:?} at {pos}");
        match self.ranges.get_mut(name) {
            Some(range) => range.cover(pos),
            None => {
                self.ranges.insert(name.to_string(), LiveRange::new(pos, pos));
                self.order.push(name.to_string());
            }
        }
        for frame in frames.iter_mut() {
            if !frame.first.iter().any(|(seen, _)| *seen == name) {
                frame.first.push((name, access));
            }
        }
    }
}

fn writes_partial_dest(transfer: &Transfer, tensors: &HashMap<String, TensorRef>) -> bool {
    match (tensors.get(&transfer.source), tensors.get(&transfer.dest)) {
        (Some(source), Some(dest)) => dest
            .shape()
            .iter()
            .zip(source.shape())
            .any(|(dest, source)| dest > source),
        _ => false,
    }
}
